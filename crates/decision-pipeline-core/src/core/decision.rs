// crates/decision-pipeline-core/src/core/decision.rs
// ============================================================================
// Module: Decision Pipeline Decisions
// Description: Decision states, confidence levels, and decision records.
// Purpose: Define the immutable output of evaluating one primitive for one subject.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! A [`Decision`] is the outcome of a primitive's rule table for one subject.
//! Its state is drawn from the primitive's fixed state set, its drivers are an
//! ordered list of unique reason codes, and its evidence references point at
//! the [`crate::core::evidence::Evidence`] produced alongside it.
//!
//! Decisions are rebuilt on every run and never mutated afterwards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::evidence::EvidenceSet;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::EvidenceId;
use crate::core::identifiers::PrimitiveVersion;

// ============================================================================
// SECTION: Decision State
// ============================================================================

/// Enumerated decision outcome shared across primitives.
///
/// # Invariants
/// - Each primitive only emits states from its own declared subset.
/// - Wire names are stable `SCREAMING_SNAKE_CASE` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    /// Subject is at risk.
    AtRisk,
    /// Subject is not at risk.
    NotAtRisk,
    /// Signals were insufficient to decide.
    Unknown,
    /// Shopping cadence is slowing.
    Declining,
    /// Shopping cadence is steady.
    Stable,
    /// Shopping cadence is accelerating.
    Improving,
    /// Shopper requires immediate attention.
    Urgent,
    /// Shopper should be watched.
    Watchlist,
    /// Shopper is healthy.
    Healthy,
    /// Customer impact is high.
    HighImpact,
    /// Customer impact is medium.
    MediumImpact,
    /// Customer impact is low.
    LowImpact,
    /// A computed selection or score was produced.
    Computed,
}

impl DecisionState {
    /// Returns the stable wire label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AtRisk => "AT_RISK",
            Self::NotAtRisk => "NOT_AT_RISK",
            Self::Unknown => "UNKNOWN",
            Self::Declining => "DECLINING",
            Self::Stable => "STABLE",
            Self::Improving => "IMPROVING",
            Self::Urgent => "URGENT",
            Self::Watchlist => "WATCHLIST",
            Self::Healthy => "HEALTHY",
            Self::HighImpact => "HIGH_IMPACT",
            Self::MediumImpact => "MEDIUM_IMPACT",
            Self::LowImpact => "LOW_IMPACT",
            Self::Computed => "COMPUTED",
        }
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Confidence
// ============================================================================

/// Confidence attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    /// Strong supporting signals.
    High,
    /// Partial supporting signals.
    Medium,
    /// Weak or missing signals.
    Low,
}

impl Confidence {
    /// Returns the stable wire label for the confidence level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Decision Record
// ============================================================================

/// Version triple stamped on every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Version of the primitive's rule table.
    pub primitive_version: PrimitiveVersion,
    /// Version of the canonical data model the inputs were read from.
    pub canonical_version: String,
    /// Tenant configuration version.
    pub config_version: ConfigVersion,
}

/// Decision produced by a primitive for one subject.
///
/// # Invariants
/// - `drivers` is non-empty and contains no duplicates.
/// - `evidence_refs` is non-empty whenever evidence accompanies the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Decision state.
    pub state: DecisionState,
    /// Confidence level.
    pub confidence: Confidence,
    /// Ordered unique reason codes.
    pub drivers: Vec<String>,
    /// JSON-compatible metrics map.
    pub metrics: Map<String, Value>,
    /// Evidence identifiers backing the decision.
    pub evidence_refs: Vec<EvidenceId>,
    /// Version stamp.
    pub versions: VersionInfo,
    /// As-of time the decision was computed for.
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
    /// Optional expiry.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub valid_until: Option<OffsetDateTime>,
}

impl Decision {
    /// Checks the decision against its primitive's state set and record invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError`] describing the first violated invariant.
    pub fn validate(
        &self,
        allowed_states: &[DecisionState],
        evidence: &EvidenceSet,
    ) -> Result<(), DecisionError> {
        if !allowed_states.contains(&self.state) {
            return Err(DecisionError::StateNotAllowed(self.state.to_string()));
        }
        if self.drivers.is_empty() {
            return Err(DecisionError::MissingDrivers);
        }
        let mut seen = BTreeSet::new();
        for driver in &self.drivers {
            if !seen.insert(driver.as_str()) {
                return Err(DecisionError::DuplicateDriver(driver.clone()));
            }
        }
        if !evidence.evidence.is_empty() && self.evidence_refs.is_empty() {
            return Err(DecisionError::MissingEvidenceRefs);
        }
        Ok(())
    }
}

/// Decision invariant violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecisionError {
    /// State is outside the primitive's declared set.
    #[error("decision state not allowed for primitive: {0}")]
    StateNotAllowed(String),
    /// Decision has no drivers.
    #[error("decision has no drivers")]
    MissingDrivers,
    /// Decision repeats a driver code.
    #[error("decision repeats driver: {0}")]
    DuplicateDriver(String),
    /// Evidence was produced but not referenced.
    #[error("decision produced evidence without evidence references")]
    MissingEvidenceRefs,
}

/// Decision and evidence pair returned by an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Decision record.
    pub decision: Decision,
    /// Evidence backing the decision.
    pub evidence_set: EvidenceSet,
}
