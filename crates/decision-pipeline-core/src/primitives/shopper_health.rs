// crates/decision-pipeline-core/src/primitives/shopper_health.rs
// ============================================================================
// Module: Shopper Health Classification Primitive
// Description: Composes lapse risk and cadence trend into a health tier.
// Purpose: Give downstream consumers one actionable state per shopper.
// Dependencies: crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! This primitive consumes the decisions of `operational_risk` and
//! `shopper_frequency_trend` for the same shopper. Its evidence links back to
//! the upstream evidence so the full chain is auditable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;

use crate::core::decision::Confidence;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
use crate::core::time::lenient;
use crate::primitives::BUILTIN_PRIMITIVE_VERSION;
use crate::primitives::EvaluationError;
use crate::primitives::FetchCapability;
use crate::primitives::Primitive;
use crate::primitives::PrimitiveInput;
use crate::primitives::ResultParts;
use crate::primitives::Rule;
use crate::primitives::evidence_id_for;
use crate::primitives::json_map;
use crate::primitives::timestamp_value;

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Upstream risk primitive name.
const RISK_PRIMITIVE: &str = "operational_risk";
/// Upstream trend primitive name.
const TREND_PRIMITIVE: &str = "shopper_frequency_trend";

/// Shopper is at risk of lapsing.
const URGENT_AT_RISK: Rule = Rule {
    rule_id: "shopper_health_classification.urgent_at_risk",
    state: DecisionState::Urgent,
    confidence: Confidence::High,
    drivers: &["LAPSE_RISK"],
};

/// Neither upstream signal is known.
const UNKNOWN_INSUFFICIENT_SIGNALS: Rule = Rule {
    rule_id: "shopper_health_classification.unknown_insufficient_signals",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["INSUFFICIENT_SIGNALS"],
};

/// Active shopper whose cadence is slowing.
const WATCHLIST_DECLINING: Rule = Rule {
    rule_id: "shopper_health_classification.watchlist_declining",
    state: DecisionState::Watchlist,
    confidence: Confidence::Medium,
    drivers: &["CADENCE_DECLINING"],
};

/// Slowing cadence with unknown lapse risk.
const WATCHLIST_DECLINING_RISK_UNKNOWN: Rule = Rule {
    rule_id: "shopper_health_classification.watchlist_declining_risk_unknown",
    state: DecisionState::Watchlist,
    confidence: Confidence::Low,
    drivers: &["CADENCE_DECLINING", "RISK_UNKNOWN"],
};

/// Active shopper with a steady or improving cadence.
const HEALTHY_OK: Rule = Rule {
    rule_id: "shopper_health_classification.healthy_ok",
    state: DecisionState::Healthy,
    confidence: Confidence::High,
    drivers: &["RISK_OK", "CADENCE_OK"],
};

/// Any other combination.
const UNKNOWN_PARTIAL_SIGNALS: Rule = Rule {
    rule_id: "shopper_health_classification.unknown_partial_signals",
    state: DecisionState::Unknown,
    confidence: Confidence::Medium,
    drivers: &["PARTIAL_SIGNALS"],
};

// ============================================================================
// SECTION: Facts
// ============================================================================

/// Upstream decisions for one shopper.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ShopperHealthFacts {
    /// `operational_risk` state.
    #[serde(default)]
    pub risk_state: Option<String>,
    /// `shopper_frequency_trend` state.
    #[serde(default)]
    pub trend_state: Option<String>,
    /// Evidence ids of the risk decision.
    #[serde(default)]
    pub risk_evidence_refs: Vec<String>,
    /// Evidence ids of the trend decision.
    #[serde(default)]
    pub trend_evidence_refs: Vec<String>,
    /// As-of time of the risk decision.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub risk_source_as_of_ts: Option<OffsetDateTime>,
    /// As-of time of the trend decision.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub trend_source_as_of_ts: Option<OffsetDateTime>,
}

/// Composition takes no settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShopperHealthConfig {}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Shopper health classification primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopperHealthClassification;

impl Primitive for ShopperHealthClassification {
    const NAME: &'static str = "shopper_health_classification";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "shopper_health_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] = &[
        DecisionState::Urgent,
        DecisionState::Watchlist,
        DecisionState::Healthy,
        DecisionState::Unknown,
    ];

    type Config = ShopperHealthConfig;
    type Facts = ShopperHealthFacts;

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        _config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let risk = facts.risk_state.as_deref().unwrap_or("UNKNOWN");
        let trend = facts.trend_state.as_deref().unwrap_or("UNKNOWN");
        let rule = classify(risk, trend);

        let mut source_primitives = Vec::new();
        if facts.risk_state.is_some() {
            source_primitives.push(source_entry(
                RISK_PRIMITIVE,
                facts.risk_source_as_of_ts.unwrap_or(input.as_of_ts),
                &facts.risk_evidence_refs,
            )?);
        }
        if facts.trend_state.is_some() {
            source_primitives.push(source_entry(
                TREND_PRIMITIVE,
                facts.trend_source_as_of_ts.unwrap_or(input.as_of_ts),
                &facts.trend_evidence_refs,
            )?);
        }

        let mut parts = ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, ""));
        parts.metrics = json_map(json!({
            "risk_state": risk,
            "trend_state": trend,
        }));
        if let Some(ts) = facts.risk_source_as_of_ts {
            parts.metrics.insert("risk_source_as_of_ts".to_string(), timestamp_value(ts)?);
        }
        if let Some(ts) = facts.trend_source_as_of_ts {
            parts.metrics.insert("trend_source_as_of_ts".to_string(), timestamp_value(ts)?);
        }
        parts.references = json_map(json!({
            "applied_rule_id": rule.rule_id,
            "source_primitives": source_primitives,
            "composition_inputs": {
                "risk_state": facts.risk_state,
                "trend_state": facts.trend_state,
            },
        }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}

/// Picks the first matching rule.
fn classify(risk: &str, trend: &str) -> &'static Rule {
    match (risk, trend) {
        ("AT_RISK", _) => &URGENT_AT_RISK,
        ("UNKNOWN", "UNKNOWN") => &UNKNOWN_INSUFFICIENT_SIGNALS,
        ("NOT_AT_RISK", "DECLINING") => &WATCHLIST_DECLINING,
        ("UNKNOWN", "DECLINING") => &WATCHLIST_DECLINING_RISK_UNKNOWN,
        ("NOT_AT_RISK", "STABLE" | "IMPROVING") => &HEALTHY_OK,
        _ => &UNKNOWN_PARTIAL_SIGNALS,
    }
}

/// Builds one upstream reference entry.
fn source_entry(
    primitive_name: &str,
    as_of_ts: OffsetDateTime,
    evidence_refs: &[String],
) -> Result<Value, EvaluationError> {
    Ok(json!({
        "primitive_name": primitive_name,
        "primitive_version": BUILTIN_PRIMITIVE_VERSION,
        "as_of_ts": timestamp_value(as_of_ts)?,
        "evidence_refs": evidence_refs,
    }))
}
