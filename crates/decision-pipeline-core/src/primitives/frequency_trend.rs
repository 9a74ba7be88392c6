// crates/decision-pipeline-core/src/primitives/frequency_trend.rs
// ============================================================================
// Module: Shopper Frequency Trend Primitive
// Description: Cadence trend from recent versus baseline trip gaps.
// Purpose: Classify shoppers as declining, stable, or improving.
// Dependencies: crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! The ratio of the most recent trip gap to the shopper's baseline average
//! gap decides the trend. Five guard rules run first and return `UNKNOWN`
//! when the history is too thin or out of range. The driver of every outcome
//! is the id of the rule that fired.

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
use crate::primitives::BindError;
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

/// Last or previous trip missing.
pub const RULE_INSUFFICIENT_TRIP_HISTORY: &str =
    "shopper_frequency_trend.insufficient_trip_history";
/// Baseline trip count missing or below the minimum.
pub const RULE_INSUFFICIENT_BASELINE: &str = "shopper_frequency_trend.insufficient_baseline";
/// Baseline gap missing or non-positive.
pub const RULE_BASELINE_INVALID: &str = "shopper_frequency_trend.baseline_invalid";
/// Recent gap missing.
pub const RULE_RECENT_GAP_MISSING: &str = "shopper_frequency_trend.recent_gap_missing";
/// Recent gap above the reasonable maximum.
pub const RULE_RECENT_GAP_OUT_OF_RANGE: &str = "shopper_frequency_trend.recent_gap_out_of_range";
/// Ratio at or above the decline threshold.
pub const RULE_CADENCE_SLOWING: &str = "shopper_frequency_trend.cadence_slowing";
/// Ratio at or below the improve threshold.
pub const RULE_CADENCE_ACCELERATING: &str = "shopper_frequency_trend.cadence_accelerating";
/// Ratio between the thresholds.
pub const RULE_CADENCE_STABLE: &str = "shopper_frequency_trend.cadence_stable";

/// Rule table row for missing trips.
const INSUFFICIENT_TRIP_HISTORY: Rule = Rule {
    rule_id: RULE_INSUFFICIENT_TRIP_HISTORY,
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &[RULE_INSUFFICIENT_TRIP_HISTORY],
};
/// Rule table row for a thin baseline.
const INSUFFICIENT_BASELINE: Rule = Rule {
    rule_id: RULE_INSUFFICIENT_BASELINE,
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &[RULE_INSUFFICIENT_BASELINE],
};
/// Rule table row for an invalid baseline gap.
const BASELINE_INVALID: Rule = Rule {
    rule_id: RULE_BASELINE_INVALID,
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &[RULE_BASELINE_INVALID],
};
/// Rule table row for a missing recent gap.
const RECENT_GAP_MISSING: Rule = Rule {
    rule_id: RULE_RECENT_GAP_MISSING,
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &[RULE_RECENT_GAP_MISSING],
};
/// Rule table row for an implausible recent gap.
const RECENT_GAP_OUT_OF_RANGE: Rule = Rule {
    rule_id: RULE_RECENT_GAP_OUT_OF_RANGE,
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &[RULE_RECENT_GAP_OUT_OF_RANGE],
};
/// Rule table row for a slowing cadence.
const CADENCE_SLOWING: Rule = Rule {
    rule_id: RULE_CADENCE_SLOWING,
    state: DecisionState::Declining,
    confidence: Confidence::High,
    drivers: &[RULE_CADENCE_SLOWING],
};
/// Rule table row for an accelerating cadence.
const CADENCE_ACCELERATING: Rule = Rule {
    rule_id: RULE_CADENCE_ACCELERATING,
    state: DecisionState::Improving,
    confidence: Confidence::High,
    drivers: &[RULE_CADENCE_ACCELERATING],
};
/// Rule table row for a steady cadence.
const CADENCE_STABLE: Rule = Rule {
    rule_id: RULE_CADENCE_STABLE,
    state: DecisionState::Stable,
    confidence: Confidence::High,
    drivers: &[RULE_CADENCE_STABLE],
};

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Frequency trend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyTrendConfig {
    /// Days of history the baseline covers.
    pub baseline_window_days: i64,
    /// Minimum baseline trips for a usable baseline.
    pub min_baseline_trips: i64,
    /// Ratio at or above which cadence is declining.
    pub decline_ratio_threshold: f64,
    /// Ratio at or below which cadence is improving.
    pub improve_ratio_threshold: f64,
    /// Largest recent gap treated as plausible.
    pub max_reasonable_gap_days: f64,
}

impl Default for FrequencyTrendConfig {
    fn default() -> Self {
        Self {
            baseline_window_days: 90,
            min_baseline_trips: 4,
            decline_ratio_threshold: 1.5,
            improve_ratio_threshold: 0.75,
            max_reasonable_gap_days: 365.0,
        }
    }
}

/// Per-shopper cadence facts.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FrequencyTrendFacts {
    /// Most recent trip.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub last_trip_ts: Option<OffsetDateTime>,
    /// Trip before the most recent one.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub prev_trip_ts: Option<OffsetDateTime>,
    /// Days between the last two trips.
    #[serde(default)]
    pub recent_gap_days: Option<f64>,
    /// Average gap over the baseline window.
    #[serde(default)]
    pub baseline_avg_gap_days: Option<f64>,
    /// Trips in the baseline window.
    #[serde(default)]
    pub baseline_trip_count: Option<i64>,
    /// Baseline window reported by the source.
    #[serde(default)]
    pub baseline_window_days: Option<i64>,
}

impl FrequencyTrendFacts {
    /// Returns the recent gap, deriving it from the trip dates when absent.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Day counts are far below 2^52.")]
    pub fn effective_recent_gap(&self) -> Option<f64> {
        self.recent_gap_days.or_else(|| match (self.last_trip_ts, self.prev_trip_ts) {
            (Some(last), Some(prev)) => Some(days_between(prev.date(), last.date()) as f64),
            _ => None,
        })
    }
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Shopper frequency trend primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopperFrequencyTrend;

impl Primitive for ShopperFrequencyTrend {
    const NAME: &'static str = "shopper_frequency_trend";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "shopper_frequency_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] = &[
        DecisionState::Declining,
        DecisionState::Stable,
        DecisionState::Improving,
        DecisionState::Unknown,
    ];

    type Config = FrequencyTrendConfig;
    type Facts = FrequencyTrendFacts;

    fn validate_config(config: &Self::Config) -> Result<(), BindError> {
        if config.improve_ratio_threshold >= config.decline_ratio_threshold {
            return Err(BindError::invalid(
                Self::NAME,
                "improve_ratio_threshold must be below decline_ratio_threshold",
            ));
        }
        if config.max_reasonable_gap_days <= 0.0 {
            return Err(BindError::invalid(Self::NAME, "max_reasonable_gap_days must be positive"));
        }
        Ok(())
    }

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let recent_gap = facts.effective_recent_gap();
        let (rule, ratio) = classify(facts, recent_gap, config);

        let mut parts = ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, ""));
        parts.metrics = json_map(json!({
            "recent_gap_days": recent_gap.unwrap_or(-1.0),
            "baseline_avg_gap_days": facts.baseline_avg_gap_days.unwrap_or(-1.0),
            "baseline_trip_count": facts.baseline_trip_count.unwrap_or(-1),
        }));
        if let Some(ratio) = ratio {
            parts.metrics.insert("ratio".to_string(), json!(ratio));
        }
        parts.thresholds = json_map(json!({
            "min_baseline_trips": config.min_baseline_trips,
            "decline_ratio_threshold": config.decline_ratio_threshold,
            "improve_ratio_threshold": config.improve_ratio_threshold,
            "max_reasonable_gap_days": config.max_reasonable_gap_days,
            "baseline_window_days": config.baseline_window_days,
        }));
        parts.references = json_map(json!({
            "as_of_ts": timestamp_value(input.as_of_ts)?,
            "last_trip_ts": optional_timestamp_value(facts.last_trip_ts)?,
            "prev_trip_ts": optional_timestamp_value(facts.prev_trip_ts)?,
            "recent_gap_days": recent_gap,
            "baseline_avg_gap_days": facts.baseline_avg_gap_days,
            "baseline_trip_count": facts.baseline_trip_count,
            "ratio": ratio,
        }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}

/// Walks the rule table in priority order.
fn classify(
    facts: &FrequencyTrendFacts,
    recent_gap: Option<f64>,
    config: &FrequencyTrendConfig,
) -> (&'static Rule, Option<f64>) {
    if facts.last_trip_ts.is_none() || facts.prev_trip_ts.is_none() {
        return (&INSUFFICIENT_TRIP_HISTORY, None);
    }
    if facts.baseline_trip_count.is_none_or(|count| count < config.min_baseline_trips) {
        return (&INSUFFICIENT_BASELINE, None);
    }
    let baseline = match facts.baseline_avg_gap_days {
        Some(gap) if gap > 0.0 => gap,
        _ => return (&BASELINE_INVALID, None),
    };
    let Some(recent) = recent_gap else {
        return (&RECENT_GAP_MISSING, None);
    };
    if recent > config.max_reasonable_gap_days {
        return (&RECENT_GAP_OUT_OF_RANGE, None);
    }
    let ratio = recent / baseline;
    let rule = if ratio >= config.decline_ratio_threshold {
        &CADENCE_SLOWING
    } else if ratio <= config.improve_ratio_threshold {
        &CADENCE_ACCELERATING
    } else {
        &CADENCE_STABLE
    };
    (rule, Some(ratio))
}
