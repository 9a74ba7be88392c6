// crates/decision-pipeline-core/src/activation/selection.rs
// ============================================================================
// Module: Activation Selection
// Description: Order-preserving caps applied to ranked candidates.
// Purpose: Bound the slate size and per-category concentration.
// Dependencies: crate::activation::item
// ============================================================================

//! ## Overview
//! Both caps preserve the input order, so they must run after ranking.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::activation::item::ActivationItem;

// ============================================================================
// SECTION: Caps
// ============================================================================

/// Keeps the first `max_items` items.
#[must_use]
pub fn apply_max_items(items: &[ActivationItem], max_items: usize) -> Vec<ActivationItem> {
    items.iter().take(max_items).cloned().collect()
}

/// Keeps at most `cap` items per category, in order.
///
/// Items without a category are never capped.
#[must_use]
pub fn apply_category_cap(items: &[ActivationItem], cap: usize) -> Vec<ActivationItem> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        match item.category.as_deref() {
            None => kept.push(item.clone()),
            Some(category) => {
                let count = counts.entry(category).or_insert(0);
                if *count < cap {
                    *count += 1;
                    kept.push(item.clone());
                }
            }
        }
    }
    kept
}
