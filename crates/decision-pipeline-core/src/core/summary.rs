// crates/decision-pipeline-core/src/core/summary.rs
// ============================================================================
// Module: Decision Pipeline Run Summaries
// Description: Caller-visible results of completed and cancelled runs.
// Purpose: Report counts and timing without exposing decision payloads.
// Dependencies: crate::core::{identifiers, decision}, serde
// ============================================================================

//! ## Overview
//! A [`RunSummary`] is returned for completed runs and published as the
//! `decision ready` event payload. [`CancelledRun`] is returned when the
//! caller's cancellation token stops a run before persistence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::decision::Decision;
use crate::core::decision::DecisionState;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::PrimitiveName;
use crate::core::identifiers::PrimitiveVersion;
use crate::core::identifiers::TenantId;

// ============================================================================
// SECTION: State Counts
// ============================================================================

/// Decision counts keyed by state, ordered by state.
pub type StateCounts = BTreeMap<DecisionState, u64>;

/// Tallies decisions by state.
#[must_use]
pub fn tally_states<'a>(decisions: impl IntoIterator<Item = &'a Decision>) -> StateCounts {
    let mut counts = StateCounts::new();
    for decision in decisions {
        *counts.entry(decision.state).or_insert(0) += 1;
    }
    counts
}

// ============================================================================
// SECTION: Summaries
// ============================================================================

/// Summary of a completed run.
///
/// # Invariants
/// - `emitted_count <= evaluated_count`.
/// - The values of `state_counts` sum to `emitted_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Primitive name.
    pub primitive_name: PrimitiveName,
    /// Primitive version.
    pub primitive_version: PrimitiveVersion,
    /// Configuration version.
    pub config_version: ConfigVersion,
    /// Correlation identifier.
    pub correlation_id: CorrelationId,
    /// Decisions persisted after the sparse-emission filter.
    pub emitted_count: u64,
    /// Inputs evaluated.
    pub evaluated_count: u64,
    /// Persisted decisions by state.
    pub state_counts: StateCounts,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Result of a run stopped by its cancellation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledRun {
    /// Correlation identifier.
    pub correlation_id: CorrelationId,
    /// Inputs evaluated before cancellation was observed.
    pub evaluated_before_cancel: u64,
}
