// crates/decision-pipeline-core/src/activation/ordering.rs
// ============================================================================
// Module: Activation Ordering
// Description: Deterministic ranking and match-rate computation.
// Purpose: Rank candidates identically on every run regardless of input order.
// Dependencies: crate::activation::item
// ============================================================================

//! ## Overview
//! [`stable_rank`] orders candidates by score descending, then ad position
//! ascending with absent positions last, then gtin (or item group id)
//! ascending. Scores compare with [`f64::total_cmp`] so the order is total
//! even for NaN and signed zeros.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;

use crate::activation::item::ActivationItem;

// ============================================================================
// SECTION: Ranking
// ============================================================================

/// Compares two items by the stable ranking key.
#[must_use]
pub fn rank_order(left: &ActivationItem, right: &ActivationItem) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| compare_ad_position(left.metadata.ad_position, right.metadata.ad_position))
        .then_with(|| left.tie_breaker().cmp(right.tie_breaker()))
}

/// Returns a new vector sorted by the stable ranking key.
#[must_use]
pub fn stable_rank(items: &[ActivationItem]) -> Vec<ActivationItem> {
    let mut ranked = items.to_vec();
    ranked.sort_by(rank_order);
    ranked
}

/// Orders present positions ascending and absent positions last.
fn compare_ad_position(left: Option<i64>, right: Option<i64>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ============================================================================
// SECTION: Match Rate
// ============================================================================

/// Returns the fraction of items with a positive score, or `0.0` when empty.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Candidate lists are far below 2^52 items.")]
pub fn compute_match_rate(items: &[ActivationItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let matched = items.iter().filter(|item| item.score > 0.0).count();
    matched as f64 / items.len() as f64
}
