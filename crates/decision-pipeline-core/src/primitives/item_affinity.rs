// crates/decision-pipeline-core/src/primitives/item_affinity.rs
// ============================================================================
// Module: Shopper Item Affinity Score Primitive
// Description: Publishes a shopper's top affinity items as a decision.
// Purpose: Expose the affinity feature to downstream selection primitives.
// Dependencies: crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! The affinity feature arrives pre-ranked. This primitive records it as a
//! `COMPUTED` decision, or `UNKNOWN` when the shopper has no affinity items.
//! [`AffinityItem`] and [`ShopperAffinity`] are shared with the weekly ad slate
//! and coupon offer primitives.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::core::decision::Confidence;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
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
use crate::primitives::timestamp_value;

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Evidence id suffix.
const EVIDENCE_SUFFIX: &str = "-affinity-v1";

/// Affinity items present.
const COMPUTED_HAS_ITEMS: Rule = Rule {
    rule_id: "shopper_item_affinity_score.computed_has_items",
    state: DecisionState::Computed,
    confidence: Confidence::High,
    drivers: &["TOP_AFFINITY_COMPUTED"],
};

/// No affinity items.
const UNKNOWN_NO_ITEMS: Rule = Rule {
    rule_id: "shopper_item_affinity_score.unknown_no_items",
    state: DecisionState::Unknown,
    confidence: Confidence::Low,
    drivers: &["NO_AFFINITY_ITEMS"],
};

// ============================================================================
// SECTION: Shared Affinity Types
// ============================================================================

/// One ranked affinity item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AffinityItem {
    /// Rank within the shopper's list.
    #[serde(default)]
    pub rank: Option<i64>,
    /// Item group identifier.
    #[serde(default)]
    pub item_group_id: Option<String>,
    /// Affinity score.
    #[serde(default)]
    pub affinity_score: Option<f64>,
    /// Trips containing the item.
    #[serde(default)]
    pub trip_count: Option<i64>,
    /// Days since the item was last bought.
    #[serde(default)]
    pub days_since_last_purchase: Option<i64>,
    /// Total sales for the item.
    #[serde(default)]
    pub total_sales: Option<f64>,
    /// Example gtin in the group.
    #[serde(default)]
    pub gtin_sample: Option<String>,
    /// Example linkcode in the group.
    #[serde(default)]
    pub linkcode_sample: Option<String>,
    /// Category.
    #[serde(default)]
    pub category: Option<String>,
    /// Brand.
    #[serde(default)]
    pub brand: Option<String>,
    /// Display name.
    #[serde(default)]
    pub item_name: Option<String>,
    /// Image URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A shopper's affinity feature row.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ShopperAffinity {
    /// Shopper identifier.
    #[serde(default)]
    pub shopper_id: Option<String>,
    /// Feature as-of time.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub as_of_ts: Option<OffsetDateTime>,
    /// Ranked items.
    #[serde(default, deserialize_with = "nullable_list")]
    pub top_affinity_items: Vec<AffinityItem>,
}

impl ShopperAffinity {
    /// Returns item group id to score for the first `top_k` items.
    ///
    /// Items without a group id are skipped. A missing score counts as zero.
    #[must_use]
    pub fn score_map(&self, top_k: Option<usize>) -> BTreeMap<String, f64> {
        let limit = top_k.unwrap_or(self.top_affinity_items.len());
        self.top_affinity_items
            .iter()
            .take(limit)
            .filter_map(|item| {
                let id = item.item_group_id.as_deref().filter(|id| !id.is_empty())?;
                Some((id.to_string(), item.affinity_score.unwrap_or(0.0)))
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Affinity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemAffinityConfig {
    /// Purchase history window the feature covers.
    pub lookback_days: u32,
    /// Items kept per shopper.
    pub top_k: u32,
}

impl Default for ItemAffinityConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            top_k: 50,
        }
    }
}

/// Affinity facts for one shopper.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ItemAffinityFacts {
    /// Ranked items; null is treated as empty.
    #[serde(default, deserialize_with = "nullable_list")]
    pub top_affinity_items: Vec<AffinityItem>,
    /// Window reported by the source, overriding config.
    #[serde(default)]
    pub lookback_days: Option<u32>,
    /// Item count reported by the source, overriding config.
    #[serde(default)]
    pub top_k: Option<u32>,
}

/// Deserializes a nullable list, treating null as empty.
///
/// # Errors
///
/// Returns a deserialization error when the value is neither null nor a list.
pub(crate) fn nullable_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Shopper item affinity score primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopperItemAffinityScore;

impl Primitive for ShopperItemAffinityScore {
    const NAME: &'static str = "shopper_item_affinity_score";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "shopper_item_affinity_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] = &[DecisionState::Computed, DecisionState::Unknown];

    type Config = ItemAffinityConfig;
    type Facts = ItemAffinityFacts;

    fn validate_config(config: &Self::Config) -> Result<(), BindError> {
        if config.top_k == 0 {
            return Err(BindError::invalid(Self::NAME, "top_k must be positive"));
        }
        Ok(())
    }

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let rule =
            if facts.top_affinity_items.is_empty() { &UNKNOWN_NO_ITEMS } else { &COMPUTED_HAS_ITEMS };
        let as_of = timestamp_value(input.as_of_ts)?;

        let mut parts =
            ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, EVIDENCE_SUFFIX));
        parts.metrics = json_map(json!({
            "lookback_days": facts.lookback_days.unwrap_or(config.lookback_days),
            "top_k": facts.top_k.unwrap_or(config.top_k),
            "as_of_ts": as_of.clone(),
            "top_items": facts.top_affinity_items,
        }));
        parts.references = json_map(json!({ "source_as_of_ts": as_of }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}
