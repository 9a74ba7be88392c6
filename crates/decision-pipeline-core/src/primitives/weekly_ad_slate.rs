// crates/decision-pipeline-core/src/primitives/weekly_ad_slate.rs
// ============================================================================
// Module: Shopper Weekly Ad Slate Primitive
// Description: Ranks current weekly ad items for one shopper.
// Purpose: Personalize the weekly ad using affinity and purchase history.
// Dependencies: crate::activation, crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! Every candidate is an item in the current ad. Candidates are scored by the
//! shopper's affinity, recently purchased items are excluded, and the rest are
//! ordered by score, then promo price (missing prices last), then gtin, then
//! item group id. The category cap and slate size apply last.
//!
//! Candidates whose identity cannot be resolved are skipped and counted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;

use crate::activation::AFFINITY_MATCH;
use crate::activation::ActivationItem;
use crate::activation::ExcludeBy;
use crate::activation::ExclusionSet;
use crate::activation::ItemMetadata;
use crate::activation::RECENT_PURCHASE_EXCLUSION;
use crate::activation::add_reason;
use crate::activation::apply_category_cap;
use crate::activation::apply_exclusions;
use crate::activation::apply_max_items;
use crate::activation::compute_match_rate;
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
use crate::primitives::item_affinity::ShopperAffinity;
use crate::primitives::item_affinity::nullable_list;
use crate::primitives::json_map;
use crate::primitives::timestamp_value;

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Evidence id suffix.
const EVIDENCE_SUFFIX: &str = "-weekly-ad-slate-v1";
/// Item is in the current ad.
pub const IN_CURRENT_AD: &str = "IN_CURRENT_AD";
/// Recent purchases were removed from the slate.
pub const RECENT_PURCHASE_EXCLUSIONS: &str = "RECENT_PURCHASE_EXCLUSIONS";
/// No ad item survived selection.
pub const NO_ELIGIBLE_AD_ITEMS: &str = "NO_ELIGIBLE_AD_ITEMS";

/// Slate has items. Drivers and confidence are derived per slate.
const COMPUTED_SLATE: Rule = Rule {
    rule_id: "shopper_weekly_ad_slate.computed_slate",
    state: DecisionState::Computed,
    confidence: Confidence::High,
    drivers: &[IN_CURRENT_AD],
};

/// Slate is empty and sparse emission is off.
const UNKNOWN_NO_ITEMS: Rule = Rule {
    rule_id: "shopper_weekly_ad_slate.unknown_no_items",
    state: DecisionState::Unknown,
    confidence: Confidence::Medium,
    drivers: &[NO_ELIGIBLE_AD_ITEMS],
};

/// Metadata key holding the candidate's promo price.
const PROMO_PRICE_KEY: &str = "promo_price";
/// Metadata key holding the candidate's title.
const TITLE_KEY: &str = "title";
/// Metadata key holding the candidate's ad group.
const AD_GROUP_KEY: &str = "ad_group_id";

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Weekly ad slate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklyAdSlateConfig {
    /// Maximum slate size.
    pub slate_size_k: usize,
    /// Affinity items considered for scoring.
    pub affinity_top_k: usize,
    /// Purchase window for recent-purchase exclusion.
    pub exclude_lookback_days: u32,
    /// Item field matched against recent purchases.
    pub exclude_by: ExcludeBy,
    /// Maximum items per category.
    pub category_cap: Option<usize>,
    /// Match rate at which confidence is high.
    pub min_match_rate_for_high_confidence: f64,
    /// Skip emitting a decision when the slate is empty.
    pub sparse_emission: bool,
    /// Ad identifier.
    pub ad_id: String,
    /// Ad scope type, such as `store`.
    pub scope_type: String,
    /// Ad scope value.
    pub scope_value: String,
    /// Freshness window for candidates and affinity, in hours.
    pub hours_window: u32,
}

impl Default for WeeklyAdSlateConfig {
    fn default() -> Self {
        Self {
            slate_size_k: 20,
            affinity_top_k: 50,
            exclude_lookback_days: 14,
            exclude_by: ExcludeBy::ItemGroupId,
            category_cap: None,
            min_match_rate_for_high_confidence: 0.5,
            sparse_emission: true,
            ad_id: String::new(),
            scope_type: String::new(),
            scope_value: String::new(),
            hours_window: 36,
        }
    }
}

/// One item in the current weekly ad.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AdCandidate {
    /// Ad identifier.
    #[serde(default)]
    pub ad_id: Option<String>,
    /// Ad group (block) identifier.
    #[serde(default)]
    pub ad_group_id: Option<String>,
    /// Ad scope type.
    #[serde(default)]
    pub scope_type: Option<String>,
    /// Ad scope value.
    #[serde(default)]
    pub scope_value: Option<String>,
    /// Candidate feed as-of time.
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub as_of_ts: Option<OffsetDateTime>,
    /// Gtin.
    #[serde(default)]
    pub gtin: Option<String>,
    /// Linkcode.
    #[serde(default)]
    pub linkcode: Option<String>,
    /// Pre-resolved item group id.
    #[serde(default)]
    pub item_group_id: Option<String>,
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Promo copy.
    #[serde(default)]
    pub promo_text: Option<String>,
    /// Image URL.
    #[serde(default)]
    pub primary_image_url: Option<String>,
    /// Promo price.
    #[serde(default)]
    pub promo_price: Option<f64>,
    /// Category.
    #[serde(default)]
    pub category: Option<String>,
}

/// Slate inputs for one shopper.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct WeeklyAdSlateFacts {
    /// Current ad items.
    #[serde(default, deserialize_with = "nullable_list")]
    pub candidates: Vec<AdCandidate>,
    /// Shopper affinity feature.
    #[serde(default)]
    pub shopper_affinity: Option<ShopperAffinity>,
    /// Keys purchased within the lookback window.
    #[serde(default, deserialize_with = "nullable_list")]
    pub recent_purchase_keys: Vec<String>,
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Shopper weekly ad slate primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopperWeeklyAdSlate;

impl Primitive for ShopperWeeklyAdSlate {
    const NAME: &'static str = "shopper_weekly_ad_slate";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "shopper_weekly_ad_slate_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] = &[DecisionState::Computed, DecisionState::Unknown];

    type Config = WeeklyAdSlateConfig;
    type Facts = WeeklyAdSlateFacts;

    fn validate_config(config: &Self::Config) -> Result<(), BindError> {
        if config.slate_size_k == 0 {
            return Err(BindError::invalid(Self::NAME, "slate_size_k must be positive"));
        }
        if !(0.0..=1.0).contains(&config.min_match_rate_for_high_confidence) {
            return Err(BindError::invalid(
                Self::NAME,
                "min_match_rate_for_high_confidence must be within [0, 1]",
            ));
        }
        Ok(())
    }

    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts = &input.facts;
        let (items, unresolved_count) = score_candidates(facts, config);

        let recent_purchases = ExclusionSet::new(
            facts.recent_purchase_keys.iter().cloned(),
            config.exclude_by,
            RECENT_PURCHASE_EXCLUSION,
        );
        let partition = apply_exclusions(&items, &[&recent_purchases]);
        let excluded_count = partition.excluded.len();

        let mut ranked = partition.eligible;
        ranked.sort_by(slate_order);
        let capped = match config.category_cap {
            Some(cap) if cap > 0 => apply_category_cap(&ranked, cap),
            _ => ranked,
        };
        let slate = apply_max_items(&capped, config.slate_size_k);
        if slate.is_empty() && config.sparse_emission {
            return Ok(None);
        }

        let match_rate = compute_match_rate(&slate);
        let mut parts = if slate.is_empty() {
            ResultParts::from_rule(&UNKNOWN_NO_ITEMS, evidence_id_for(&input.subject_id, EVIDENCE_SUFFIX))
        } else {
            let mut parts = ResultParts::from_rule(
                &COMPUTED_SLATE,
                evidence_id_for(&input.subject_id, EVIDENCE_SUFFIX),
            );
            if slate.iter().any(|item| item.score > 0.0) {
                parts.drivers.push(AFFINITY_MATCH.to_string());
            }
            if excluded_count > 0 {
                parts.drivers.push(RECENT_PURCHASE_EXCLUSIONS.to_string());
            }
            parts.confidence = if match_rate >= config.min_match_rate_for_high_confidence {
                Confidence::High
            } else {
                Confidence::Medium
            };
            parts
        };

        parts.metrics = json_map(json!({
            "ad_id": config.ad_id,
            "scope_type": config.scope_type,
            "scope_value": config.scope_value,
            "slate_size_k": config.slate_size_k,
            "exclude_lookback_days": config.exclude_lookback_days,
            "excluded_count": excluded_count,
            "candidates_count": facts.candidates.len(),
            "unresolved_identity_count": unresolved_count,
            "match_rate": match_rate,
            "items": slate_metrics(&slate),
        }));
        parts.thresholds = json_map(json!({
            "min_match_rate_for_high_confidence": config.min_match_rate_for_high_confidence,
        }));

        let candidates_as_of =
            facts.candidates.iter().filter_map(|candidate| candidate.as_of_ts).max();
        let affinity_as_of = facts.shopper_affinity.as_ref().and_then(|affinity| affinity.as_of_ts);
        parts.references = json_map(json!({
            "as_of": {
                "ad_candidates_as_of_ts": timestamp_value(candidates_as_of.unwrap_or(input.as_of_ts))?,
                "affinity_as_of_ts": timestamp_value(affinity_as_of.unwrap_or(input.as_of_ts))?,
            },
        }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds scored activation items, returning them with the unresolved count.
fn score_candidates(
    facts: &WeeklyAdSlateFacts,
    config: &WeeklyAdSlateConfig,
) -> (Vec<ActivationItem>, usize) {
    let scores = facts
        .shopper_affinity
        .as_ref()
        .map(|affinity| affinity.score_map(Some(config.affinity_top_k)))
        .unwrap_or_default();
    let mut unresolved_count = 0;
    let mut items = Vec::with_capacity(facts.candidates.len());
    for candidate in &facts.candidates {
        let Ok(item) = ActivationItem::from_group_id(
            candidate.item_group_id.clone(),
            candidate.linkcode.clone(),
            candidate.gtin.clone(),
        ) else {
            unresolved_count += 1;
            continue;
        };
        let score = scores.get(&item.item_group_id).copied().unwrap_or(0.0);
        let mut extra = Map::new();
        extra.insert(TITLE_KEY.to_string(), json!(candidate.title));
        extra.insert(PROMO_PRICE_KEY.to_string(), json!(candidate.promo_price));
        extra.insert(AD_GROUP_KEY.to_string(), json!(candidate.ad_group_id));
        let metadata = ItemMetadata {
            extra,
            ..ItemMetadata::default()
        };
        let mut item = add_reason(
            item.with_category(candidate.category.clone()).with_score(score).with_metadata(metadata),
            IN_CURRENT_AD,
        );
        if score > 0.0 {
            item = add_reason(item, AFFINITY_MATCH);
        }
        items.push(item);
    }
    (items, unresolved_count)
}

/// Returns the promo price recorded on an item.
fn promo_price(item: &ActivationItem) -> Option<f64> {
    item.metadata.extra.get(PROMO_PRICE_KEY).and_then(Value::as_f64)
}

/// Orders by score DESC, promo price ASC with missing prices last, gtin ASC,
/// then item group id ASC.
fn slate_order(left: &ActivationItem, right: &ActivationItem) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| match (promo_price(left), promo_price(right)) {
            (Some(l), Some(r)) => l.total_cmp(&r),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| {
            left.gtin.as_deref().unwrap_or_default().cmp(right.gtin.as_deref().unwrap_or_default())
        })
        .then_with(|| left.item_group_id.cmp(&right.item_group_id))
}

/// Renders slate items with one-based ranks.
fn slate_metrics(slate: &[ActivationItem]) -> Vec<Value> {
    slate
        .iter()
        .zip(1_usize..)
        .map(|(item, rank)| {
            let extra = &item.metadata.extra;
            json!({
                "rank": rank,
                "item_group_id": item.item_group_id,
                "gtin": item.gtin,
                "linkcode": item.linkcode,
                "score": item.score,
                "title": extra.get(TITLE_KEY).cloned().unwrap_or(Value::Null),
                "promo_price": extra.get(PROMO_PRICE_KEY).cloned().unwrap_or(Value::Null),
                "ad_group_id": extra.get(AD_GROUP_KEY).cloned().unwrap_or(Value::Null),
                "reasons": item.metadata.reasons,
            })
        })
        .collect()
}
