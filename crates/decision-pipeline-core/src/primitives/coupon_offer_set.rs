// crates/decision-pipeline-core/src/primitives/coupon_offer_set.rs
// ============================================================================
// Module: Shopper Coupon Offer Set Primitive
// Description: Selects discounted coupon offers for one shopper.
// Purpose: Offer high-affinity items that are eligible and not already on ad.
// Dependencies: crate::activation, crate::primitives, serde, serde_json, time
// ============================================================================

//! ## Overview
//! Candidates are the shopper's top affinity items. The activation policy
//! engine gates them:
//! - items must appear in the eligibility map;
//! - items in the current weekly ad or bought recently are excluded;
//! - items without a baseline price are skipped unless the fallback keeps them.
//!
//! The survivors are ranked, capped per category, and trimmed to
//! `max_offers`. Each selected item with a baseline price becomes an offer
//! priced at the configured discount.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::activation::ACTIVATION_POLICY_APPLIED;
use crate::activation::ActivationItem;
use crate::activation::ExclusionRule;
use crate::activation::ItemMetadata;
use crate::activation::PolicyConfig;
use crate::activation::PolicyOutcome;
use crate::activation::RECENT_PURCHASE_EXCLUSION;
use crate::activation::WEEKLY_AD_OVERLAP_EXCLUSION;
use crate::activation::add_excluded_reason;
use crate::activation::aggregate_drivers;
use crate::activation::apply_category_cap;
use crate::activation::apply_exclusions;
use crate::activation::apply_max_items;
use crate::activation::build_policy_outcome;
use crate::activation::compute_match_rate;
use crate::activation::exclude_if_in_set;
use crate::activation::exclude_if_recent_purchase;
use crate::activation::stable_rank;
use crate::core::decision::Confidence;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
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
const EVIDENCE_SUFFIX: &str = "-coupon-offer-set-v1";
/// Offers were restricted to eligible items.
pub const ELIGIBILITY_POLICY_ENFORCED: &str = "ELIGIBILITY_POLICY_ENFORCED";
/// Offers exclude items on the current weekly ad.
pub const NOT_IN_WEEKLY_AD: &str = "NOT_IN_WEEKLY_AD";
/// Offers carry a discount off the baseline price.
pub const COUPON_DISCOUNT_APPLIED: &str = "COUPON_DISCOUNT_APPLIED";
/// Offer item has positive affinity.
pub const HIGH_AFFINITY: &str = "HIGH_AFFINITY";
/// Item was skipped for lack of a baseline price.
pub const BASELINE_PRICE_MISSING: &str = "BASELINE_PRICE_MISSING";

/// At least one offer. Drivers and confidence are derived per offer set.
const COMPUTED_OFFERS: Rule = Rule {
    rule_id: "shopper_coupon_offer_set.computed_offers",
    state: DecisionState::Computed,
    confidence: Confidence::High,
    drivers: &[ACTIVATION_POLICY_APPLIED],
};

/// No offers and sparse emission is off.
const UNKNOWN_NO_OFFERS: Rule = Rule {
    rule_id: "shopper_coupon_offer_set.unknown_no_offers",
    state: DecisionState::Unknown,
    confidence: Confidence::Medium,
    drivers: &[ACTIVATION_POLICY_APPLIED],
};

// ============================================================================
// SECTION: Config and Facts
// ============================================================================

/// Handling of selected items that lack a baseline price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingFallbackMode {
    /// Drop the item before ranking.
    #[default]
    Skip,
    /// Keep the item in the selection; it yields no offer.
    Keep,
}

/// Coupon offer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouponOfferSetConfig {
    /// Maximum offers per shopper.
    pub max_offers: usize,
    /// Percentage taken off the baseline price.
    pub discount_pct: u32,
    /// Affinity items considered as candidates.
    pub affinity_top_k: usize,
    /// Purchase window for recent-purchase exclusion.
    pub exclude_lookback_days: u32,
    /// Match rate at which confidence is high.
    pub min_match_rate_for_high_confidence: f64,
    /// Skip emitting a decision when no offer is produced.
    pub sparse_emission: bool,
    /// Handling of items without a baseline price.
    pub pricing_fallback_mode: PricingFallbackMode,
    /// Maximum offers per category.
    pub category_cap: Option<usize>,
    /// Ad whose items are excluded.
    pub ad_id: String,
    /// Ad scope type.
    pub scope_type: String,
    /// Ad scope value.
    pub scope_value: String,
    /// Freshness window for affinity and eligibility, in hours.
    pub hours_window: u32,
}

impl Default for CouponOfferSetConfig {
    fn default() -> Self {
        Self {
            max_offers: 10,
            discount_pct: 25,
            affinity_top_k: 50,
            exclude_lookback_days: 14,
            min_match_rate_for_high_confidence: 0.5,
            sparse_emission: true,
            pricing_fallback_mode: PricingFallbackMode::Skip,
            category_cap: None,
            ad_id: String::new(),
            scope_type: String::new(),
            scope_value: String::new(),
            hours_window: 72,
        }
    }
}

/// Eligibility record for one item group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct EligibleItem {
    /// Gtin.
    #[serde(default)]
    pub gtin: Option<String>,
    /// Linkcode.
    #[serde(default)]
    pub linkcode: Option<String>,
    /// Reasons recorded by the eligibility feed.
    #[serde(default, deserialize_with = "nullable_list")]
    pub ineligible_reasons: Vec<String>,
}

/// Offer inputs for one shopper.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CouponOfferSetFacts {
    /// Shopper affinity feature.
    #[serde(default)]
    pub shopper_affinity: Option<ShopperAffinity>,
    /// Item groups on the current weekly ad.
    #[serde(default, deserialize_with = "nullable_list")]
    pub weekly_ad_item_groups: Vec<String>,
    /// Item groups eligible for coupons.
    #[serde(default)]
    pub eligible_map: BTreeMap<String, EligibleItem>,
    /// Item groups bought within the lookback window.
    #[serde(default, deserialize_with = "nullable_list")]
    pub recent_purchase_keys: Vec<String>,
    /// Baseline price per item group.
    #[serde(default)]
    pub baseline_prices: BTreeMap<String, f64>,
}

/// One priced coupon offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponOffer {
    /// One-based rank within the selection.
    pub rank: usize,
    /// Item group identifier.
    pub item_group_id: String,
    /// Gtin.
    pub gtin: Option<String>,
    /// Linkcode.
    pub linkcode: Option<String>,
    /// Affinity score.
    pub affinity_score: f64,
    /// Baseline price.
    pub baseline_price: f64,
    /// Discounted price, rounded to cents.
    pub offer_price: f64,
    /// Offer reasons.
    pub reasons: Vec<String>,
}

// ============================================================================
// SECTION: Primitive
// ============================================================================

/// Shopper coupon offer set primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopperCouponOfferSet;

impl Primitive for ShopperCouponOfferSet {
    const NAME: &'static str = "shopper_coupon_offer_set";
    const VERSION: &'static str = BUILTIN_PRIMITIVE_VERSION;
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "shopper_coupon_offer_set_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] = &[DecisionState::Computed, DecisionState::Unknown];

    type Config = CouponOfferSetConfig;
    type Facts = CouponOfferSetFacts;

    fn validate_config(config: &Self::Config) -> Result<(), BindError> {
        if config.max_offers == 0 {
            return Err(BindError::invalid(Self::NAME, "max_offers must be positive"));
        }
        if config.discount_pct > 100 {
            return Err(BindError::invalid(Self::NAME, "discount_pct must be within [0, 100]"));
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
        let selection = select_offers(facts, config);
        let offers = price_offers(&selection.outcome.selected_items, config.discount_pct);
        if offers.is_empty() && config.sparse_emission {
            return Ok(None);
        }

        let rule = if offers.is_empty() { &UNKNOWN_NO_OFFERS } else { &COMPUTED_OFFERS };
        let mut parts =
            ResultParts::from_rule(rule, evidence_id_for(&input.subject_id, EVIDENCE_SUFFIX));
        parts.drivers.clone_from(&selection.outcome.drivers);
        parts.confidence = offer_confidence(&selection.outcome, config);
        parts.metrics = json_map(json!({
            "max_offers": config.max_offers,
            "discount_pct": config.discount_pct,
            "candidate_count": selection.outcome.candidates_count,
            "eligible_count": selection.eligible_count,
            "excluded_weekly_ad_count": selection.excluded_weekly_ad_count,
            "excluded_recent_purchase_count": selection.excluded_recent_purchase_count,
            "excluded_pricing_missing_count": selection.excluded_pricing_missing_count,
            "offers": offers,
        }));
        let affinity_as_of = facts.shopper_affinity.as_ref().and_then(|affinity| affinity.as_of_ts);
        parts.references = json_map(json!({
            "context": {
                "ad_id": config.ad_id,
                "scope_type": config.scope_type,
                "scope_value": config.scope_value,
            },
            "as_of": {
                "affinity_as_of_ts": timestamp_value(affinity_as_of.unwrap_or(input.as_of_ts))?,
                "eligibility_as_of_ts": timestamp_value(input.as_of_ts)?,
            },
        }));
        Ok(Some(parts.into_result(input.as_of_ts, versions)))
    }
}

// ============================================================================
// SECTION: Selection
// ============================================================================

/// Selection outcome plus per-stage counts.
#[derive(Debug, Clone)]
struct OfferSelection {
    /// Policy outcome over the priced candidates.
    outcome: PolicyOutcome,
    /// Candidates present in the eligibility map.
    eligible_count: usize,
    /// Items excluded for weekly ad overlap.
    excluded_weekly_ad_count: u64,
    /// Items excluded for a recent purchase.
    excluded_recent_purchase_count: u64,
    /// Items skipped for a missing baseline price.
    excluded_pricing_missing_count: usize,
}

/// Runs the activation pipeline over the shopper's affinity candidates.
fn select_offers(facts: &CouponOfferSetFacts, config: &CouponOfferSetConfig) -> OfferSelection {
    let scores = facts
        .shopper_affinity
        .as_ref()
        .map(|affinity| affinity.score_map(Some(config.affinity_top_k)))
        .unwrap_or_default();
    let mut candidates: Vec<(String, f64)> = scores.into_iter().collect();
    candidates.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    let candidates_count = candidates.len();

    let items: Vec<ActivationItem> = candidates
        .into_iter()
        .filter_map(|(item_group_id, score)| {
            let eligible = facts.eligible_map.get(&item_group_id)?;
            let metadata = ItemMetadata {
                baseline_price: facts.baseline_prices.get(&item_group_id).copied(),
                ..ItemMetadata::default()
            };
            ActivationItem::from_group_id(
                Some(item_group_id),
                eligible.linkcode.clone(),
                eligible.gtin.clone(),
            )
            .ok()
            .map(|item| item.with_score(score).with_metadata(metadata))
        })
        .collect();
    let eligible_count = items.len();

    let weekly_ad: BTreeSet<String> = facts.weekly_ad_item_groups.iter().cloned().collect();
    let recent: BTreeSet<String> = facts.recent_purchase_keys.iter().cloned().collect();
    let weekly_ad_rule =
        |item: &ActivationItem| exclude_if_in_set(item, &weekly_ad, WEEKLY_AD_OVERLAP_EXCLUSION);
    let recent_rule = |item: &ActivationItem| {
        exclude_if_recent_purchase(item, &recent, RECENT_PURCHASE_EXCLUSION)
    };
    let rules: [&dyn ExclusionRule; 2] = [&weekly_ad_rule, &recent_rule];
    let partition = apply_exclusions(&items, &rules);

    let (priced, missing_price): (Vec<ActivationItem>, Vec<ActivationItem>) =
        partition.eligible.iter().cloned().partition(|item| {
            item.metadata.baseline_price.is_some()
                || config.pricing_fallback_mode == PricingFallbackMode::Keep
        });
    let excluded_pricing_missing_count = missing_price.len();
    let mut all_excluded = partition.excluded.clone();
    all_excluded
        .extend(missing_price.into_iter().map(|item| add_excluded_reason(item, BASELINE_PRICE_MISSING)));

    let ranked = stable_rank(&priced);
    let capped = match config.category_cap {
        Some(cap) if cap > 0 => apply_category_cap(&ranked, cap),
        _ => ranked,
    };
    let selected = apply_max_items(&capped, config.max_offers);
    let match_rate = compute_match_rate(&selected);

    let mut drivers = aggregate_drivers(&selected, &all_excluded);
    drivers.extend(
        [ELIGIBILITY_POLICY_ENFORCED, NOT_IN_WEEKLY_AD, COUPON_DISCOUNT_APPLIED]
            .map(str::to_string),
    );
    let policy = PolicyConfig {
        max_items: config.max_offers,
        category_cap: config.category_cap,
        exclude_lookback_days: config.exclude_lookback_days,
        min_match_rate_for_high_confidence: config.min_match_rate_for_high_confidence,
        ..PolicyConfig::default()
    };
    OfferSelection {
        outcome: build_policy_outcome(
            selected,
            all_excluded,
            candidates_count,
            match_rate,
            drivers,
            &policy,
        ),
        eligible_count,
        excluded_weekly_ad_count: partition.count_for(WEEKLY_AD_OVERLAP_EXCLUSION),
        excluded_recent_purchase_count: partition.count_for(RECENT_PURCHASE_EXCLUSION),
        excluded_pricing_missing_count,
    }
}

/// Coupon confidence: HIGH at or above the threshold, MEDIUM otherwise.
fn offer_confidence(outcome: &PolicyOutcome, config: &CouponOfferSetConfig) -> Confidence {
    if !outcome.selected_items.is_empty()
        && outcome.match_rate >= config.min_match_rate_for_high_confidence
    {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

// ============================================================================
// SECTION: Pricing
// ============================================================================

/// Prices the selected items. Items without a baseline price yield no offer.
#[must_use]
pub fn price_offers(selected: &[ActivationItem], discount_pct: u32) -> Vec<CouponOffer> {
    let multiplier = 1.0 - f64::from(discount_pct) / 100.0;
    selected
        .iter()
        .zip(1_usize..)
        .filter_map(|(item, rank)| {
            let baseline_price = item.metadata.baseline_price?;
            let mut reasons = Vec::with_capacity(3);
            if item.score > 0.0 {
                reasons.push(HIGH_AFFINITY.to_string());
            }
            reasons.push(NOT_IN_WEEKLY_AD.to_string());
            reasons.push(COUPON_DISCOUNT_APPLIED.to_string());
            Some(CouponOffer {
                rank,
                item_group_id: item.item_group_id.clone(),
                gtin: item.gtin.clone(),
                linkcode: item.linkcode.clone(),
                affinity_score: item.score,
                baseline_price,
                offer_price: round_to_cents(baseline_price * multiplier),
                reasons,
            })
        })
        .collect()
}

/// Rounds a price to two decimal places.
fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

