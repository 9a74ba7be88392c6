// crates/decision-pipeline-core/src/activation/exclusions.rs
// ============================================================================
// Module: Activation Exclusions
// Description: Exclusion rules and the eligible/excluded partition.
// Purpose: Remove candidates that overlap the weekly ad or were bought recently.
// Dependencies: crate::activation::item, serde
// ============================================================================

//! ## Overview
//! Exclusion rules inspect one item at a time and report whether it should
//! be dropped and why. [`apply_exclusions`] runs every rule against every
//! item. An item matched by any rule is excluded and carries the union of
//! all matching reasons. Input items are never mutated; excluded items are
//! returned as annotated copies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::activation::item::ActivationItem;
use crate::activation::reasons::add_excluded_reason;

// ============================================================================
// SECTION: Reason Codes
// ============================================================================

/// Reason recorded when an item is already featured in the weekly ad.
pub const WEEKLY_AD_OVERLAP_EXCLUSION: &str = "WEEKLY_AD_OVERLAP_EXCLUSION";
/// Reason recorded when an item was purchased within the lookback window.
pub const RECENT_PURCHASE_EXCLUSION: &str = "RECENT_PURCHASE_EXCLUSION";

// ============================================================================
// SECTION: Exclusion Result
// ============================================================================

/// Outcome of a single exclusion check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExclusionResult {
    /// True when the item should be excluded.
    pub excluded: bool,
    /// Reasons reported by the check.
    pub reasons: Vec<String>,
}

impl ExclusionResult {
    /// Returns a result that keeps the item.
    #[must_use]
    pub const fn keep() -> Self {
        Self {
            excluded: false,
            reasons: Vec::new(),
        }
    }

    /// Returns a result that excludes the item for `reason`.
    #[must_use]
    pub fn exclude(reason: impl Into<String>) -> Self {
        Self {
            excluded: true,
            reasons: vec![reason.into()],
        }
    }
}

// ============================================================================
// SECTION: Exclusion Rules
// ============================================================================

/// Exclusion check applied to each candidate.
pub trait ExclusionRule {
    /// Checks a single item.
    fn check(&self, item: &ActivationItem) -> ExclusionResult;
}

impl<F> ExclusionRule for F
where
    F: Fn(&ActivationItem) -> ExclusionResult,
{
    fn check(&self, item: &ActivationItem) -> ExclusionResult {
        self(item)
    }
}

/// Item field used to match an exclusion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcludeBy {
    /// Match on the resolved item group id.
    #[default]
    ItemGroupId,
    /// Match on the gtin.
    Gtin,
}

impl ExcludeBy {
    /// Returns the key of `item` this mode matches on.
    #[must_use]
    pub fn key_of(self, item: &ActivationItem) -> Option<&str> {
        match self {
            Self::ItemGroupId => Some(item.item_group_id.as_str()),
            Self::Gtin => item.gtin.as_deref(),
        }
    }
}

/// Set-membership exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    /// Keys that trigger exclusion.
    keys: BTreeSet<String>,
    /// Item field matched against `keys`.
    exclude_by: ExcludeBy,
    /// Reason recorded on a match.
    reason: String,
}

impl ExclusionSet {
    /// Creates a rule excluding items whose key is in `keys`.
    #[must_use]
    pub fn new(
        keys: impl IntoIterator<Item = String>,
        exclude_by: ExcludeBy,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            exclude_by,
            reason: reason.into(),
        }
    }

    /// Creates a weekly-ad overlap rule keyed by item group id.
    #[must_use]
    pub fn weekly_ad_overlap(keys: impl IntoIterator<Item = String>) -> Self {
        Self::new(keys, ExcludeBy::ItemGroupId, WEEKLY_AD_OVERLAP_EXCLUSION)
    }

    /// Creates a recent-purchase rule keyed by item group id.
    #[must_use]
    pub fn recent_purchase(keys: impl IntoIterator<Item = String>) -> Self {
        Self::new(keys, ExcludeBy::ItemGroupId, RECENT_PURCHASE_EXCLUSION)
    }

    /// Returns the number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true when the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ExclusionRule for ExclusionSet {
    fn check(&self, item: &ActivationItem) -> ExclusionResult {
        match self.exclude_by.key_of(item) {
            Some(key) if self.keys.contains(key) => ExclusionResult::exclude(self.reason.clone()),
            _ => ExclusionResult::keep(),
        }
    }
}

/// Excludes `item` when its group id is in `excluded_group_ids`.
#[must_use]
pub fn exclude_if_in_set(
    item: &ActivationItem,
    excluded_group_ids: &BTreeSet<String>,
    reason: &str,
) -> ExclusionResult {
    if excluded_group_ids.contains(&item.item_group_id) {
        ExclusionResult::exclude(reason)
    } else {
        ExclusionResult::keep()
    }
}

/// Excludes `item` when its group id was purchased recently.
#[must_use]
pub fn exclude_if_recent_purchase(
    item: &ActivationItem,
    recent_purchase_group_ids: &BTreeSet<String>,
    reason: &str,
) -> ExclusionResult {
    exclude_if_in_set(item, recent_purchase_group_ids, reason)
}

// ============================================================================
// SECTION: Partition
// ============================================================================

/// Items split by the exclusion rules.
///
/// # Invariants
/// - `eligible.len() + excluded.len()` equals the input length.
/// - Each excluded item carries every reason that matched it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExclusionPartition {
    /// Items that passed every rule, in input order.
    pub eligible: Vec<ActivationItem>,
    /// Items matched by at least one rule, in input order.
    pub excluded: Vec<ActivationItem>,
    /// Count of exclusions per reason.
    pub reason_counts: BTreeMap<String, u64>,
}

impl ExclusionPartition {
    /// Returns how many excluded items carry `reason`.
    #[must_use]
    pub fn count_for(&self, reason: &str) -> u64 {
        self.reason_counts.get(reason).copied().unwrap_or(0)
    }
}

/// Applies every rule to every item.
#[must_use]
pub fn apply_exclusions(items: &[ActivationItem], rules: &[&dyn ExclusionRule]) -> ExclusionPartition {
    let mut partition = ExclusionPartition::default();
    for item in items {
        let mut is_excluded = false;
        let mut reasons = Vec::new();
        for rule in rules {
            let result = rule.check(item);
            if result.excluded {
                is_excluded = true;
                for reason in result.reasons {
                    *partition.reason_counts.entry(reason.clone()).or_insert(0) += 1;
                    reasons.push(reason);
                }
            }
        }
        if is_excluded {
            let excluded =
                reasons.iter().fold(item.clone(), |acc, reason| add_excluded_reason(acc, reason));
            partition.excluded.push(excluded);
        } else {
            partition.eligible.push(item.clone());
        }
    }
    partition
}
