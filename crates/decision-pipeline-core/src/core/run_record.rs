// crates/decision-pipeline-core/src/core/run_record.rs
// ============================================================================
// Module: Decision Pipeline Run Records
// Description: Audit rows written to the best-effort run registry.
// Purpose: Describe run attempts and their single terminal transition.
// Dependencies: crate::core, serde, time
// ============================================================================

//! ## Overview
//! The run registry holds one [`RunRecord`] per correlation id. A record is
//! created in [`RunStatus::Started`] and transitions exactly once to
//! [`RunStatus::Success`] or [`RunStatus::Failed`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::core::context::RunContext;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::PrimitiveName;
use crate::core::identifiers::PrimitiveVersion;
use crate::core::identifiers::TenantId;
use crate::core::summary::StateCounts;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Lifecycle status of a run registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run has started.
    Started,
    /// Run completed and persisted its outputs.
    Success,
    /// Run failed or was cancelled.
    Failed,
}

impl RunStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "STARTED" => Some(Self::Started),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// Run registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Correlation identifier (record key).
    pub correlation_id: CorrelationId,
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Primitive name.
    pub primitive_name: PrimitiveName,
    /// Primitive version.
    pub primitive_version: PrimitiveVersion,
    /// Configuration version.
    pub config_version: ConfigVersion,
    /// Canonical data version reported by config.
    pub canonical_version: String,
    /// Current status.
    pub status: RunStatus,
    /// Start time.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Completion time for terminal records.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Duration in milliseconds for terminal records.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Inputs evaluated.
    #[serde(default)]
    pub input_count: Option<u64>,
    /// Decisions persisted.
    #[serde(default)]
    pub decision_count: Option<u64>,
    /// Persisted decisions by state.
    #[serde(default)]
    pub state_counts: StateCounts,
    /// Captured error message for failed runs.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RunRecord {
    /// Creates a `STARTED` record for the context.
    #[must_use]
    pub fn started(ctx: &RunContext, canonical_version: &str, started_at: OffsetDateTime) -> Self {
        Self {
            correlation_id: ctx.correlation_id().clone(),
            tenant_id: ctx.tenant_id().clone(),
            primitive_name: ctx.primitive_name().clone(),
            primitive_version: ctx.primitive_version().clone(),
            config_version: ctx.config_version().clone(),
            canonical_version: canonical_version.to_string(),
            status: RunStatus::Started,
            started_at,
            completed_at: None,
            duration_ms: None,
            input_count: None,
            decision_count: None,
            state_counts: StateCounts::new(),
            error_message: None,
        }
    }
}

/// Completion details recorded for a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    /// Start time of the run.
    pub started_at: OffsetDateTime,
    /// Completion time of the run.
    pub completed_at: OffsetDateTime,
    /// Inputs evaluated.
    pub input_count: u64,
    /// Decisions persisted.
    pub decision_count: u64,
    /// Persisted decisions by state.
    pub state_counts: StateCounts,
}

/// Failure details recorded for a failed or cancelled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    /// Start time of the run.
    pub started_at: OffsetDateTime,
    /// Failure time.
    pub completed_at: OffsetDateTime,
    /// Captured error message.
    pub error_message: String,
}
