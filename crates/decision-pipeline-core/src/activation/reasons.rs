// crates/decision-pipeline-core/src/activation/reasons.rs
// ============================================================================
// Module: Activation Reasons
// Description: Item reason annotations and primitive-level driver aggregation.
// Purpose: Explain why items were selected or excluded.
// Dependencies: crate::activation::item
// ============================================================================

//! ## Overview
//! Reason helpers return annotated copies and never duplicate a code.
//! [`aggregate_drivers`] produces the primitive-level drivers in a fixed order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::activation::item::ActivationItem;

// ============================================================================
// SECTION: Driver Codes
// ============================================================================

/// Driver emitted for every policy evaluation.
pub const ACTIVATION_POLICY_APPLIED: &str = "ACTIVATION_POLICY_APPLIED";
/// Driver emitted when a selected item has a positive score.
pub const AFFINITY_MATCH: &str = "AFFINITY_MATCH";
/// Driver emitted when any candidate was excluded.
pub const EXCLUSIONS_APPLIED: &str = "EXCLUSIONS_APPLIED";

// ============================================================================
// SECTION: Item Reasons
// ============================================================================

/// Returns `item` with `reason` appended to its selection reasons.
#[must_use]
pub fn add_reason(mut item: ActivationItem, reason: &str) -> ActivationItem {
    push_unique(&mut item.metadata.reasons, reason);
    item
}

/// Returns `item` with `reason` appended to its exclusion reasons.
#[must_use]
pub fn add_excluded_reason(mut item: ActivationItem, reason: &str) -> ActivationItem {
    push_unique(&mut item.metadata.excluded_reasons, reason);
    item
}

/// Appends `reason` when absent.
fn push_unique(reasons: &mut Vec<String>, reason: &str) {
    if !reasons.iter().any(|existing| existing == reason) {
        reasons.push(reason.to_string());
    }
}

// ============================================================================
// SECTION: Drivers
// ============================================================================

/// Aggregates primitive-level drivers from the selection and exclusions.
#[must_use]
pub fn aggregate_drivers(selected: &[ActivationItem], excluded: &[ActivationItem]) -> Vec<String> {
    let mut drivers = vec![ACTIVATION_POLICY_APPLIED.to_string()];
    if selected.iter().any(|item| item.score > 0.0) {
        drivers.push(AFFINITY_MATCH.to_string());
    }
    if !excluded.is_empty() {
        drivers.push(EXCLUSIONS_APPLIED.to_string());
    }
    drivers
}
