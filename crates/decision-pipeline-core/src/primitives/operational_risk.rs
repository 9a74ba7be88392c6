// crates/decision-pipeline-core/src/primitives/operational_risk.rs
// ============================================================================
// Module: Operational Risk Primitive
// Description: Lapse risk from days since a shopper's last trip.
// Purpose: Flag shoppers whose last trip is older than the configured window.
// Dependencies: crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! A shopper with no recorded trip is `UNKNOWN`. Otherwise the shopper is
//! `AT_RISK` once the days since the last trip reach `at_risk_days`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::core::decision::Confidence;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
use crate::core::time::days_between;
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
use crate::primitives::optional_timestamp_value;
use crate::primitives::timestamp_value;

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Rule id shared by every outcome.
pub const RULE_AT_RISK_DAYS: &str = "operational_risk.at_risk_days";
/// Driver shared by every outcome.
pub const DRIVER_DAYS_SINCE_LAST_TRIP: &str = "days_since_last_trip";

/// No trip on record.
const NO_TRIP: Rule = Rule {
    rule_id: RULE_AT_RISK_DAYS,
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &[DRIVER_DAYS_SINCE_LAST_TRIP],
};

/// Last trip older than the window.
const LAPSED: Rule = Rule {
    rule_id: RULE_AT_RISK_DAYS,
    state: DecisionState::AtRisk,
    confidence: Confidence::High,
    drivers: &[DRIVER_DAYS_SINCE_LAST_TRIP],
};

/// Last trip within the window.
const ACTIVE: Rule = Rule {
    rule_id: RULE_AT_RISK_DAYS,
    state: DecisionState::NotAtRisk,
    confidence: Confidence::High,
    drivers: &[DRIVER_DAYS_SINCE_LAST_TRIP],
};

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Operational risk settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationalRiskConfig {
    /// Days since the last trip at which a shopper is at risk.
    pub at_risk_days: i64,
}

impl Default for OperationalRiskConfig {
    fn default() -> Self {
        Self {
            at_risk_days: 30,
        }
    }
}

/// Per-shopper trip facts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct OperationalRiskFacts {
    /// Most recent trip.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub last_trip_ts: Option<OffsetDateTime>,
    /// Precomputed days since the last trip.
    #[serde(default)]
    pub days_since_last_trip: Option<i64>,
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Operational risk primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationalRisk;

impl Primitive for OperationalRisk {
    const NAME: &'static str = "operational_risk";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "operational_risk_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] =
        &[DecisionState::AtRisk, DecisionState::NotAtRisk, DecisionState::Unknown];

    type Config = OperationalRiskConfig;
    type Facts = OperationalRiskFacts;

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let (rule, days) = match facts.last_trip_ts {
            None => (&NO_TRIP, facts.days_since_last_trip),
            Some(last_trip) => {
                let days = facts
                    .days_since_last_trip
                    .unwrap_or_else(|| days_between(last_trip.date(), input.as_of_ts.date()));
                let rule = if days >= config.at_risk_days { &LAPSED } else { &ACTIVE };
                (rule, Some(days))
            }
        };

        let mut parts = ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, ""));
        parts.metrics = json_map(json!({ "days_since_last_trip": days.unwrap_or(-1) }));
        parts.thresholds = json_map(json!({ "at_risk_days": config.at_risk_days }));
        parts.references = json_map(json!({
            "last_trip_ts": optional_timestamp_value(facts.last_trip_ts)?,
            "days_since_last_trip": days,
            "as_of_ts": timestamp_value(input.as_of_ts)?,
        }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}
