// crates/decision-pipeline-core/src/primitives/customer_impact.rs
// ============================================================================
// Module: Customer Order Impact Risk Primitive
// Description: Rolls order decisions up to the customer.
// Purpose: Tier customers by how many of their orders are at risk.
// Dependencies: crate::primitives, serde, serde_json
// ============================================================================

//! ## Overview
//! The number of at-risk orders is compared against the high and medium
//! thresholds. Customers with no at-risk orders stay `LOW_IMPACT` unless every
//! order is unknown.

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
use crate::primitives::BindError;
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

/// Customer has no orders.
const UNKNOWN_NO_ORDERS_FOUND: Rule = Rule {
    rule_id: "customer_order_impact_risk.unknown_no_orders_found",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["NO_ORDERS_FOUND"],
};

/// At-risk orders at or above the high threshold.
const HIGH_IMPACT: Rule = Rule {
    rule_id: "customer_order_impact_risk.high_impact",
    state: DecisionState::HighImpact,
    confidence: Confidence::High,
    drivers: &["HIGH_IMPACT"],
};

/// At-risk orders at or above the medium threshold.
const MEDIUM_IMPACT: Rule = Rule {
    rule_id: "customer_order_impact_risk.medium_impact",
    state: DecisionState::MediumImpact,
    confidence: Confidence::High,
    drivers: &["MEDIUM_IMPACT"],
};

/// Some at-risk orders below the medium threshold.
const LOW_IMPACT: Rule = Rule {
    rule_id: "customer_order_impact_risk.low_impact",
    state: DecisionState::LowImpact,
    confidence: Confidence::Medium,
    drivers: &["LOW_IMPACT"],
};

/// Every order is unknown.
const UNKNOWN_ALL_ORDERS_UNKNOWN: Rule = Rule {
    rule_id: "customer_order_impact_risk.unknown_all_orders_unknown",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["ALL_ORDERS_UNKNOWN"],
};

/// No order is at risk.
const LOW_IMPACT_NO_AT_RISK: Rule = Rule {
    rule_id: "customer_order_impact_risk.low_impact_no_at_risk",
    state: DecisionState::LowImpact,
    confidence: Confidence::Medium,
    drivers: &["NO_AT_RISK_ORDERS"],
};

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Customer impact thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerImpactConfig {
    /// At-risk order count for `HIGH_IMPACT`.
    pub high_threshold: u64,
    /// At-risk order count for `MEDIUM_IMPACT`.
    pub medium_threshold: u64,
}

impl Default for CustomerImpactConfig {
    fn default() -> Self {
        Self {
            high_threshold: 5,
            medium_threshold: 2,
        }
    }
}

/// Order rollup for one customer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CustomerImpactFacts {
    /// Orders for the customer.
    #[serde(default)]
    pub order_count_total: u64,
    /// Orders at risk.
    #[serde(default)]
    pub order_count_at_risk: u64,
    /// Orders with unknown risk.
    #[serde(default)]
    pub order_count_unknown: u64,
    /// Subject ids of the at-risk orders.
    #[serde(default)]
    pub at_risk_order_subject_ids: Vec<String>,
    /// Order decision references.
    #[serde(default)]
    pub source_order_refs: Vec<ChildDecisionRef>,
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Customer order impact risk primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerOrderImpactRisk;

impl Primitive for CustomerOrderImpactRisk {
    const NAME: &'static str = "customer_order_impact_risk";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "customer_impact_inputs",
        subject_type: "customer",
    };
    const STATES: &'static [DecisionState] = &[
        DecisionState::HighImpact,
        DecisionState::MediumImpact,
        DecisionState::LowImpact,
        DecisionState::Unknown,
    ];

    type Config = CustomerImpactConfig;
    type Facts = CustomerImpactFacts;

    fn validate_config(config: &Self::Config) -> Result<(), BindError> {
        if config.medium_threshold == 0 || config.medium_threshold > config.high_threshold {
            return Err(BindError::invalid(
                Self::NAME,
                "thresholds must satisfy 0 < medium_threshold <= high_threshold",
            ));
        }
        Ok(())
    }

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let at_risk = facts.order_count_at_risk;
        let rule = if facts.order_count_total == 0 {
            &UNKNOWN_NO_ORDERS_FOUND
        } else if at_risk >= config.high_threshold {
            &HIGH_IMPACT
        } else if at_risk >= config.medium_threshold {
            &MEDIUM_IMPACT
        } else if at_risk > 0 {
            &LOW_IMPACT
        } else if facts.order_count_unknown == facts.order_count_total {
            &UNKNOWN_ALL_ORDERS_UNKNOWN
        } else {
            &LOW_IMPACT_NO_AT_RISK
        };

        let thresholds = json!({
            "high_threshold": config.high_threshold,
            "medium_threshold": config.medium_threshold,
        });
        let mut parts = ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, ""));
        parts.metrics = json_map(json!({
            "order_count_total": facts.order_count_total,
            "order_count_at_risk": at_risk,
            "order_count_unknown": facts.order_count_unknown,
            "at_risk_order_subject_ids": facts.at_risk_order_subject_ids,
        }));
        parts.references = json_map(json!({
            "applied_rule_id": rule.rule_id,
            "source_orders": capped_source_refs(&facts.source_order_refs, "order_subject_id"),
            "rollup_counts": {
                "total": facts.order_count_total,
                "at_risk": at_risk,
                "unknown": facts.order_count_unknown,
            },
            "thresholds": thresholds.clone(),
        }));
        parts.thresholds = json_map(thresholds);
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}
