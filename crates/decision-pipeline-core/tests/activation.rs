// crates/decision-pipeline-core/tests/activation.rs
// ============================================================================
// Module: Activation Policy Tests
// Description: Unit and property tests for the activation policy engine.
// Purpose: Pin ranking, exclusion, capping, and confidence behavior.
// ============================================================================

//! Tests for identity resolution, exclusions, ranking, caps, and outcomes.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::float_cmp,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use decision_pipeline_core::Confidence;
use decision_pipeline_core::activation::ACTIVATION_POLICY_APPLIED;
use decision_pipeline_core::activation::AFFINITY_MATCH;
use decision_pipeline_core::activation::ActivationItem;
use decision_pipeline_core::activation::EXCLUSIONS_APPLIED;
use decision_pipeline_core::activation::ExcludeBy;
use decision_pipeline_core::activation::ExclusionResult;
use decision_pipeline_core::activation::ExclusionRule;
use decision_pipeline_core::activation::ExclusionSet;
use decision_pipeline_core::activation::IdentityError;
use decision_pipeline_core::activation::ItemMetadata;
use decision_pipeline_core::activation::PolicyConfig;
use decision_pipeline_core::activation::RECENT_PURCHASE_EXCLUSION;
use decision_pipeline_core::activation::WEEKLY_AD_OVERLAP_EXCLUSION;
use decision_pipeline_core::activation::aggregate_drivers;
use decision_pipeline_core::activation::apply_category_cap;
use decision_pipeline_core::activation::apply_exclusions;
use decision_pipeline_core::activation::apply_max_items;
use decision_pipeline_core::activation::compute_match_rate;
use decision_pipeline_core::activation::derive_confidence;
use decision_pipeline_core::activation::exclude_if_in_set;
use decision_pipeline_core::activation::resolve_item_group_id;
use decision_pipeline_core::activation::select;
use decision_pipeline_core::activation::stable_rank;
use proptest::prelude::*;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn item(id: &str, score: f64) -> ActivationItem {
    ActivationItem::from_group_id(Some(id.to_string()), None, None).unwrap().with_score(score)
}

fn ids(items: &[ActivationItem]) -> Vec<&str> {
    items.iter().map(|item| item.item_group_id.as_str()).collect()
}

fn item_strategy() -> impl Strategy<Value = ActivationItem> {
    (
        "[A-E]{1,2}",
        prop::option::of("[0-9]{2}"),
        prop::sample::select(vec![0.0, 0.1, 0.5, 0.9, 1.0]),
        prop::option::of(0_i64 .. 3),
        prop::option::of(prop::sample::select(vec!["dairy", "bakery", "produce"])),
    )
        .prop_map(|(id, gtin, score, ad_position, category)| {
            ActivationItem::from_group_id(Some(id), None, gtin)
                .unwrap()
                .with_score(score)
                .with_category(category.map(str::to_string))
                .with_metadata(ItemMetadata {
                    ad_position,
                    ..ItemMetadata::default()
                })
        })
}

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Verifies that linkcode wins over gtin and empty strings are skipped.
#[test]
fn item_group_id_prefers_linkcode() {
    assert_eq!(resolve_item_group_id(Some("L1"), Some("G1")), Some("L1"));
    assert_eq!(resolve_item_group_id(Some(""), Some("G1")), Some("G1"));
    assert_eq!(resolve_item_group_id(None, Some("G1")), Some("G1"));
    assert_eq!(resolve_item_group_id(Some(""), None), None);
}

/// Verifies that items without any identifier cannot be built.
#[test]
fn unresolvable_identity_fails_construction() {
    let result = ActivationItem::new(None, Some(String::new()));
    assert!(matches!(result, Err(IdentityError::Unresolvable)));
    let fallback = ActivationItem::from_group_id(Some(String::new()), None, Some("G7".to_string()));
    assert_eq!(fallback.unwrap().item_group_id, "G7");
}

// ============================================================================
// SECTION: Worked Examples
// ============================================================================

/// Verifies that equal scores break ties lexicographically before the cap.
#[test]
fn equal_scores_tie_break_lexicographically() {
    let ranked = stable_rank(&[item("B", 0.9), item("C", 0.3), item("A", 0.9)]);
    assert_eq!(ids(&apply_max_items(&ranked, 2)), vec!["A", "B"]);
}

/// Verifies the single-set exclusion example.
#[test]
fn exclude_if_in_set_partitions_items() {
    let excluded: BTreeSet<String> = BTreeSet::from(["A".to_string()]);
    let rule = |candidate: &ActivationItem| {
        exclude_if_in_set(candidate, &excluded, WEEKLY_AD_OVERLAP_EXCLUSION)
    };
    let partition = apply_exclusions(&[item("A", 0.9), item("B", 0.9)], &[&rule]);

    assert_eq!(ids(&partition.eligible), vec!["B"]);
    assert_eq!(ids(&partition.excluded), vec!["A"]);
    assert_eq!(
        partition.excluded[0].metadata.excluded_reasons,
        vec![WEEKLY_AD_OVERLAP_EXCLUSION.to_string()]
    );
    assert_eq!(
        partition.reason_counts,
        BTreeMap::from([(WEEKLY_AD_OVERLAP_EXCLUSION.to_string(), 1)])
    );
}

/// Verifies that every matching rule contributes its reason.
#[test]
fn exclusions_accumulate_all_matching_reasons() {
    let weekly = ExclusionSet::weekly_ad_overlap(["A".to_string(), "B".to_string()]);
    let recent = ExclusionSet::recent_purchase(["A".to_string()]);
    let original = vec![item("A", 0.5), item("B", 0.5), item("C", 0.5)];
    let partition = apply_exclusions(&original, &[&weekly, &recent]);

    assert_eq!(ids(&partition.eligible), vec!["C"]);
    assert_eq!(
        partition.excluded[0].metadata.excluded_reasons,
        vec![WEEKLY_AD_OVERLAP_EXCLUSION.to_string(), RECENT_PURCHASE_EXCLUSION.to_string()]
    );
    assert_eq!(partition.count_for(WEEKLY_AD_OVERLAP_EXCLUSION), 2);
    assert_eq!(partition.count_for(RECENT_PURCHASE_EXCLUSION), 1);
    assert!(original[0].metadata.excluded_reasons.is_empty());
}

/// Verifies that gtin matching ignores items without a gtin.
#[test]
fn gtin_exclusion_skips_items_without_gtin() {
    let rule = ExclusionSet::new(["0001".to_string()], ExcludeBy::Gtin, "BLOCKED");
    let with_gtin =
        ActivationItem::from_group_id(Some("A".to_string()), None, Some("0001".to_string()))
            .unwrap();
    assert_eq!(rule.check(&with_gtin), ExclusionResult::exclude("BLOCKED"));
    assert_eq!(rule.check(&item("0001", 1.0)), ExclusionResult::keep());
}

// ============================================================================
// SECTION: Ranking and Caps
// ============================================================================

/// Verifies that present ad positions sort before absent ones at equal score.
#[test]
fn ad_position_orders_before_tie_breaker() {
    let positioned = |id: &str, position: Option<i64>| {
        item(id, 0.5).with_metadata(ItemMetadata {
            ad_position: position,
            ..ItemMetadata::default()
        })
    };
    let ranked = stable_rank(&[positioned("A", None), positioned("B", Some(2)), positioned("C", Some(1))]);
    assert_eq!(ids(&ranked), vec!["C", "B", "A"]);
}

/// Verifies that gtin is the tie-breaker when present.
#[test]
fn gtin_breaks_ties_before_group_id() {
    let with_gtin = |id: &str, gtin: &str| {
        ActivationItem::from_group_id(Some(id.to_string()), None, Some(gtin.to_string()))
            .unwrap()
            .with_score(0.5)
    };
    let ranked = stable_rank(&[with_gtin("A", "002"), with_gtin("B", "001")]);
    assert_eq!(ids(&ranked), vec!["B", "A"]);
}

/// Verifies that uncategorized items pass the category cap.
#[test]
fn category_cap_keeps_uncategorized_items() {
    let dairy = |id: &str| item(id, 1.0).with_category(Some("dairy".to_string()));
    let capped = apply_category_cap(&[dairy("A"), item("X", 1.0), dairy("B"), item("Y", 1.0)], 1);
    assert_eq!(ids(&capped), vec!["A", "X", "Y"]);
}

/// Verifies match rate on empty and mixed inputs.
#[test]
fn match_rate_counts_positive_scores() {
    assert_eq!(compute_match_rate(&[]), 0.0);
    assert_eq!(compute_match_rate(&[item("A", 0.0), item("B", 0.2)]), 0.5);
}

// ============================================================================
// SECTION: Drivers and Confidence
// ============================================================================

/// Verifies driver aggregation order and conditions.
#[test]
fn drivers_follow_fixed_order() {
    assert_eq!(aggregate_drivers(&[item("A", 0.0)], &[]), vec![ACTIVATION_POLICY_APPLIED]);
    assert_eq!(
        aggregate_drivers(&[item("A", 0.4)], &[item("B", 0.4)]),
        vec![ACTIVATION_POLICY_APPLIED, AFFINITY_MATCH, EXCLUSIONS_APPLIED]
    );
}

/// Verifies each confidence band.
#[test]
fn confidence_bands() {
    assert_eq!(derive_confidence(0, 1.0, 0.6), Confidence::Low);
    assert_eq!(derive_confidence(3, 0.6, 0.6), Confidence::High);
    assert_eq!(derive_confidence(3, 0.3, 0.6), Confidence::Medium);
    assert_eq!(derive_confidence(3, 0.0, 0.6), Confidence::Low);
}

/// Verifies the full pipeline over exclusions, caps, and max items.
#[test]
fn select_runs_full_pipeline() {
    let config = PolicyConfig {
        max_items: 2,
        category_cap: Some(1),
        min_match_rate_for_high_confidence: 0.5,
        ..PolicyConfig::default()
    };
    let candidates = vec![
        item("A", 0.9).with_category(Some("dairy".to_string())),
        item("B", 0.8).with_category(Some("dairy".to_string())),
        item("C", 0.7),
        item("D", 0.6),
    ];
    let rule = ExclusionSet::weekly_ad_overlap(["C".to_string()]);
    let outcome = select(&candidates, &[&rule], &config);

    assert_eq!(ids(&outcome.selected_items), vec!["A", "D"]);
    assert_eq!(ids(&outcome.excluded_items), vec!["C"]);
    assert_eq!(outcome.excluded_count, 1);
    assert_eq!(outcome.candidates_count, 4);
    assert_eq!(outcome.match_rate, 1.0);
    assert_eq!(outcome.computed_confidence, Confidence::High);
    assert_eq!(
        outcome.drivers,
        vec![ACTIVATION_POLICY_APPLIED, AFFINITY_MATCH, EXCLUSIONS_APPLIED]
    );
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn stable_rank_is_idempotent(items in prop::collection::vec(item_strategy(), 0 .. 24)) {
        let ranked = stable_rank(&items);
        prop_assert_eq!(stable_rank(&ranked), ranked);
    }

    #[test]
    fn stable_rank_ignores_input_order(
        items in prop::collection::vec(item_strategy(), 0 .. 24).prop_shuffle()
    ) {
        let mut reversed = items.clone();
        reversed.reverse();
        let forward = stable_rank(&items);
        let backward = stable_rank(&reversed);
        let key = |item: &ActivationItem| {
            (item.score.to_bits(), item.metadata.ad_position, item.tie_breaker().to_string())
        };
        let forward_keys: Vec<_> = forward.iter().map(key).collect();
        let backward_keys: Vec<_> = backward.iter().map(key).collect();
        prop_assert_eq!(forward_keys, backward_keys);
    }

    #[test]
    fn category_cap_bounds_each_category(
        items in prop::collection::vec(item_strategy(), 0 .. 24),
        cap in 0_usize .. 4,
    ) {
        let capped = apply_category_cap(&items, cap);
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for item in &capped {
            if let Some(category) = &item.category {
                *counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        prop_assert!(counts.values().all(|count| *count <= cap));
        let uncategorized_in = items.iter().filter(|item| item.category.is_none()).count();
        let uncategorized_out = capped.iter().filter(|item| item.category.is_none()).count();
        prop_assert_eq!(uncategorized_in, uncategorized_out);
    }

    #[test]
    fn match_rate_is_positive_fraction(items in prop::collection::vec(item_strategy(), 1 .. 24)) {
        let positive = items.iter().filter(|item| item.score > 0.0).count();
        #[allow(clippy::cast_precision_loss, reason = "Small test vectors.")]
        let expected = positive as f64 / items.len() as f64;
        prop_assert_eq!(compute_match_rate(&items), expected);
    }

    #[test]
    fn exclusions_partition_items(
        items in prop::collection::vec(item_strategy(), 0 .. 24),
        weekly in prop::collection::btree_set("[A-E]{1,2}", 0 .. 6),
        recent in prop::collection::btree_set("[A-E]{1,2}", 0 .. 6),
    ) {
        let weekly_rule = ExclusionSet::weekly_ad_overlap(weekly.clone());
        let recent_rule = ExclusionSet::recent_purchase(recent.clone());
        let partition = apply_exclusions(&items, &[&weekly_rule, &recent_rule]);
        prop_assert_eq!(partition.eligible.len() + partition.excluded.len(), items.len());
        for excluded in &partition.excluded {
            let mut expected = Vec::new();
            if weekly.contains(&excluded.item_group_id) {
                expected.push(WEEKLY_AD_OVERLAP_EXCLUSION.to_string());
            }
            if recent.contains(&excluded.item_group_id) {
                expected.push(RECENT_PURCHASE_EXCLUSION.to_string());
            }
            prop_assert_eq!(&excluded.metadata.excluded_reasons, &expected);
        }
        for eligible in &partition.eligible {
            prop_assert!(!weekly.contains(&eligible.item_group_id));
            prop_assert!(!recent.contains(&eligible.item_group_id));
        }
    }
}
