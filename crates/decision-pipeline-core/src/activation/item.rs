// crates/decision-pipeline-core/src/activation/item.rs
// ============================================================================
// Module: Activation Items
// Description: Candidate items and identity resolution for selection policies.
// Purpose: Give every candidate a stable item group id before ranking.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! An [`ActivationItem`] is a candidate a selection primitive may surface to a
//! shopper. Its `item_group_id` is resolved from the linkcode first and the
//! gtin second. Items whose identity cannot be resolved are rejected at
//! construction so the caller can skip and count them.
//!
//! Metadata is a closed set of well-known fields plus an open extension map
//! for primitive-specific display data (titles, prices, image urls).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Identity resolution failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Neither linkcode nor gtin is present.
    #[error("cannot resolve item_group_id: linkcode and gtin are both empty")]
    Unresolvable,
}

/// Resolves an item group id, preferring a non-empty linkcode over a non-empty gtin.
#[must_use]
pub fn resolve_item_group_id<'a>(linkcode: Option<&'a str>, gtin: Option<&'a str>) -> Option<&'a str> {
    linkcode.filter(|value| !value.is_empty()).or_else(|| gtin.filter(|value| !value.is_empty()))
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Item metadata: well-known policy fields plus an open extension map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Position of the item in the printed ad, used as a ranking tie-breaker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_position: Option<i64>,
    /// Baseline shelf price used for offer pricing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_price: Option<f64>,
    /// Selection reasons attached to the item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Exclusion reasons attached to the item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_reasons: Vec<String>,
    /// Primitive-specific extension fields.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// SECTION: Activation Item
// ============================================================================

/// Candidate item processed by the activation policy.
///
/// # Invariants
/// - `item_group_id` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationItem {
    /// Resolved group identifier (linkcode, else gtin).
    pub item_group_id: String,
    /// Global trade item number.
    pub gtin: Option<String>,
    /// Retailer link code grouping item variants.
    pub linkcode: Option<String>,
    /// Merchandising category.
    pub category: Option<String>,
    /// Affinity or ranking score.
    pub score: f64,
    /// Item metadata.
    pub metadata: ItemMetadata,
}

impl ActivationItem {
    /// Builds an item, resolving its group id from the linkcode and gtin.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unresolvable`] when both identifiers are empty.
    pub fn new(linkcode: Option<String>, gtin: Option<String>) -> Result<Self, IdentityError> {
        let item_group_id = resolve_item_group_id(linkcode.as_deref(), gtin.as_deref())
            .ok_or(IdentityError::Unresolvable)?
            .to_string();
        Ok(Self::from_parts(item_group_id, linkcode, gtin))
    }

    /// Builds an item with a pre-resolved group id, falling back to resolution
    /// when the supplied id is empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unresolvable`] when no identifier is usable.
    pub fn from_group_id(
        item_group_id: Option<String>,
        linkcode: Option<String>,
        gtin: Option<String>,
    ) -> Result<Self, IdentityError> {
        match item_group_id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(Self::from_parts(id, linkcode, gtin)),
            None => Self::new(linkcode, gtin),
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    /// Sets the score.
    #[must_use]
    pub const fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the ranking tie-breaker: gtin, else item group id.
    #[must_use]
    pub fn tie_breaker(&self) -> &str {
        self.gtin.as_deref().filter(|gtin| !gtin.is_empty()).unwrap_or(&self.item_group_id)
    }

    /// Assembles an item from resolved identity parts.
    fn from_parts(item_group_id: String, linkcode: Option<String>, gtin: Option<String>) -> Self {
        Self {
            item_group_id,
            gtin,
            linkcode,
            category: None,
            score: 0.0,
            metadata: ItemMetadata::default(),
        }
    }
}
