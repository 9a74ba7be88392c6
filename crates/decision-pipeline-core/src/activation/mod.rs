// crates/decision-pipeline-core/src/activation/mod.rs
// ============================================================================
// Module: Activation Policy Engine
// Description: Pure ranking, exclusion, and selection functions.
// Purpose: Share one deterministic selection policy across pick-N primitives.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The activation policy engine is a set of pure functions with no I/O.
//! Selection primitives build [`ActivationItem`] candidates, apply exclusion
//! rules, rank, cap, and derive drivers and confidence from the result.
//! Running the same candidates through the engine twice yields the same
//! outcome.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod exclusions;
pub mod item;
pub mod ordering;
pub mod outcome;
pub mod reasons;
pub mod selection;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use exclusions::ExcludeBy;
pub use exclusions::ExclusionPartition;
pub use exclusions::ExclusionResult;
pub use exclusions::ExclusionRule;
pub use exclusions::ExclusionSet;
pub use exclusions::RECENT_PURCHASE_EXCLUSION;
pub use exclusions::WEEKLY_AD_OVERLAP_EXCLUSION;
pub use exclusions::apply_exclusions;
pub use exclusions::exclude_if_in_set;
pub use exclusions::exclude_if_recent_purchase;
pub use item::ActivationItem;
pub use item::IdentityError;
pub use item::ItemMetadata;
pub use item::resolve_item_group_id;
pub use ordering::compute_match_rate;
pub use ordering::rank_order;
pub use ordering::stable_rank;
pub use outcome::PolicyConfig;
pub use outcome::PolicyOutcome;
pub use outcome::build_policy_outcome;
pub use outcome::derive_confidence;
pub use outcome::select;
pub use reasons::ACTIVATION_POLICY_APPLIED;
pub use reasons::AFFINITY_MATCH;
pub use reasons::EXCLUSIONS_APPLIED;
pub use reasons::add_excluded_reason;
pub use reasons::add_reason;
pub use reasons::aggregate_drivers;
pub use selection::apply_category_cap;
pub use selection::apply_max_items;
