// crates/decision-pipeline-core/src/activation/outcome.rs
// ============================================================================
// Module: Activation Policy Outcome
// Description: Policy configuration, outcome assembly, and the selection pipeline.
// Purpose: Turn scored candidates into a bounded, explained selection.
// Dependencies: crate::activation, crate::core::decision, serde
// ============================================================================

//! ## Overview
//! [`select`] runs the full activation pipeline: exclusions, stable ranking,
//! category cap, max items, match rate, drivers, and confidence. Primitives
//! with their own ordering call the individual steps and finish with
//! [`build_policy_outcome`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::activation::exclusions::ExcludeBy;
use crate::activation::exclusions::ExclusionRule;
use crate::activation::exclusions::apply_exclusions;
use crate::activation::item::ActivationItem;
use crate::activation::ordering::compute_match_rate;
use crate::activation::ordering::stable_rank;
use crate::activation::reasons::aggregate_drivers;
use crate::activation::selection::apply_category_cap;
use crate::activation::selection::apply_max_items;
use crate::core::decision::Confidence;

// ============================================================================
// SECTION: Policy Config
// ============================================================================

/// Default match rate at or above which confidence is HIGH.
pub const DEFAULT_MIN_MATCH_RATE_FOR_HIGH_CONFIDENCE: f64 = 0.5;

/// Activation policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Field used to match exclusion sets.
    pub exclude_by: ExcludeBy,
    /// Recent-purchase lookback window in days.
    pub exclude_lookback_days: u32,
    /// Maximum number of selected items.
    pub max_items: usize,
    /// Optional per-category cap.
    pub category_cap: Option<usize>,
    /// Match rate at or above which confidence is HIGH.
    pub min_match_rate_for_high_confidence: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exclude_by: ExcludeBy::ItemGroupId,
            exclude_lookback_days: 14,
            max_items: 20,
            category_cap: None,
            min_match_rate_for_high_confidence: DEFAULT_MIN_MATCH_RATE_FOR_HIGH_CONFIDENCE,
        }
    }
}

// ============================================================================
// SECTION: Policy Outcome
// ============================================================================

/// Result of applying the activation policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutcome {
    /// Selected items in final order.
    pub selected_items: Vec<ActivationItem>,
    /// Excluded items with their reasons.
    pub excluded_items: Vec<ActivationItem>,
    /// Number of excluded items.
    pub excluded_count: usize,
    /// Number of candidates considered.
    pub candidates_count: usize,
    /// Fraction of selected items with a positive score.
    pub match_rate: f64,
    /// Primitive-level drivers.
    pub drivers: Vec<String>,
    /// Confidence derived from the match rate.
    pub computed_confidence: Confidence,
}

/// Derives confidence from the selection size and match rate.
#[must_use]
pub fn derive_confidence(selected_len: usize, match_rate: f64, threshold: f64) -> Confidence {
    if selected_len == 0 {
        Confidence::Low
    } else if match_rate >= threshold {
        Confidence::High
    } else if match_rate > 0.0 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Assembles a policy outcome and derives its confidence.
#[must_use]
pub fn build_policy_outcome(
    selected_items: Vec<ActivationItem>,
    excluded_items: Vec<ActivationItem>,
    candidates_count: usize,
    match_rate: f64,
    drivers: Vec<String>,
    config: &PolicyConfig,
) -> PolicyOutcome {
    let computed_confidence = derive_confidence(
        selected_items.len(),
        match_rate,
        config.min_match_rate_for_high_confidence,
    );
    PolicyOutcome {
        excluded_count: excluded_items.len(),
        selected_items,
        excluded_items,
        candidates_count,
        match_rate,
        drivers,
        computed_confidence,
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Runs the activation pipeline over `candidates`.
#[must_use]
pub fn select(
    candidates: &[ActivationItem],
    rules: &[&dyn ExclusionRule],
    config: &PolicyConfig,
) -> PolicyOutcome {
    let partition = apply_exclusions(candidates, rules);
    let ranked = stable_rank(&partition.eligible);
    let capped = match config.category_cap {
        Some(cap) => apply_category_cap(&ranked, cap),
        None => ranked,
    };
    let selected = apply_max_items(&capped, config.max_items);
    let match_rate = compute_match_rate(&selected);
    let drivers = aggregate_drivers(&selected, &partition.excluded);
    build_policy_outcome(selected, partition.excluded, candidates.len(), match_rate, drivers, config)
}
