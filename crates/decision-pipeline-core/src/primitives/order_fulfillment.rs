// crates/decision-pipeline-core/src/primitives/order_fulfillment.rs
// ============================================================================
// Module: Order Fulfillment Risk Primitive
// Description: Rolls order line decisions up to the order.
// Purpose: Mark an order at risk when any of its lines is at risk.
// Dependencies: crate::primitives, serde, serde_json
// ============================================================================

//! ## Overview
//! Inputs carry pre-aggregated line counts plus references to the line
//! decisions. Evidence keeps at most
//! [`MAX_SOURCE_REFS`](crate::primitives::MAX_SOURCE_REFS) line references.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::core::decision::Confidence;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
use crate::primitives::BUILTIN_PRIMITIVE_VERSION;
use crate::primitives::ChildDecisionRef;
use crate::primitives::EvaluationError;
use crate::primitives::FetchCapability;
use crate::primitives::Primitive;
use crate::primitives::PrimitiveInput;
use crate::primitives::ResultParts;
use crate::primitives::Rule;
use crate::primitives::capped_source_refs;
use crate::primitives::evidence_id_for;
use crate::primitives::json_map;

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Order has no lines.
const UNKNOWN_NO_LINES_FOUND: Rule = Rule {
    rule_id: "order_fulfillment_risk.unknown_no_lines_found",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["NO_LINES_FOUND"],
};

/// At least one line is at risk.
const AT_RISK_HAS_AT_RISK_LINES: Rule = Rule {
    rule_id: "order_fulfillment_risk.at_risk_has_at_risk_lines",
    state: DecisionState::AtRisk,
    confidence: Confidence::High,
    drivers: &["HAS_AT_RISK_LINES"],
};

/// Every line is unknown.
const UNKNOWN_ALL_LINES_UNKNOWN: Rule = Rule {
    rule_id: "order_fulfillment_risk.unknown_all_lines_unknown",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["ALL_LINES_UNKNOWN"],
};

/// No line is at risk and at least one is known.
const NOT_AT_RISK_ALL_LINES_OK: Rule = Rule {
    rule_id: "order_fulfillment_risk.not_at_risk_all_lines_ok",
    state: DecisionState::NotAtRisk,
    confidence: Confidence::High,
    drivers: &["ALL_LINES_OK"],
};

// ============================================================================
// SECTION: Facts
// ============================================================================

/// Line rollup for one order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct OrderFulfillmentFacts {
    /// Customer owning the order.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Lines on the order.
    #[serde(default)]
    pub order_line_count_total: u64,
    /// Lines at risk.
    #[serde(default)]
    pub order_line_count_at_risk: u64,
    /// Lines with unknown risk.
    #[serde(default)]
    pub order_line_count_unknown: u64,
    /// Lines not at risk.
    #[serde(default)]
    pub order_line_count_not_at_risk: u64,
    /// Subject ids of the at-risk lines.
    #[serde(default)]
    pub at_risk_line_subject_ids: Vec<String>,
    /// Line decision references.
    #[serde(default)]
    pub source_line_refs: Vec<ChildDecisionRef>,
}

/// Order rollup takes no settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderFulfillmentConfig {}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Order fulfillment risk primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFulfillmentRisk;

impl Primitive for OrderFulfillmentRisk {
    const NAME: &'static str = "order_fulfillment_risk";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "order_risk_inputs",
        subject_type: "order",
    };
    const STATES: &'static [DecisionState] =
        &[DecisionState::AtRisk, DecisionState::NotAtRisk, DecisionState::Unknown];

    type Config = OrderFulfillmentConfig;
    type Facts = OrderFulfillmentFacts;

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        _config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let rule = if facts.order_line_count_total == 0 {
            &UNKNOWN_NO_LINES_FOUND
        } else if facts.order_line_count_at_risk > 0 {
            &AT_RISK_HAS_AT_RISK_LINES
        } else if facts.order_line_count_unknown == facts.order_line_count_total {
            &UNKNOWN_ALL_LINES_UNKNOWN
        } else {
            &NOT_AT_RISK_ALL_LINES_OK
        };

        let mut parts = ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, ""));
        parts.metrics = json_map(json!({
            "order_line_count_total": facts.order_line_count_total,
            "order_line_count_at_risk": facts.order_line_count_at_risk,
            "order_line_count_unknown": facts.order_line_count_unknown,
            "order_line_count_not_at_risk": facts.order_line_count_not_at_risk,
            "at_risk_line_subject_ids": facts.at_risk_line_subject_ids,
        }));
        if let Some(customer_id) = facts.customer_id.as_deref().filter(|id| !id.is_empty()) {
            parts.metrics.insert("customer_id".to_string(), json!(customer_id));
        }
        parts.references = json_map(json!({
            "applied_rule_id": rule.rule_id,
            "source_lines": capped_source_refs(&facts.source_line_refs, "line_subject_id"),
            "rollup_counts": {
                "total": facts.order_line_count_total,
                "at_risk": facts.order_line_count_at_risk,
                "unknown": facts.order_line_count_unknown,
                "not_at_risk": facts.order_line_count_not_at_risk,
            },
        }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}
