// crates/decision-pipeline-core/src/persistence.rs
// ============================================================================
// Module: Idempotent Output Persistence
// Description: Natural keys, persisted row shapes, and batched upserts.
// Purpose: Make repeated writes of the same run leave stores unchanged.
// Dependencies: crate::core, crate::interfaces, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! Every store derives the same natural keys and row payloads from this
//! module, so the idempotence guarantee does not depend on the backend.
//! Rows are written in batches through an [`UpsertBackend`], either with a
//! native merge (update on match, insert otherwise) or by deleting exactly the
//! batch's keys and inserting the rows again.
//!
//! JSON columns are RFC 8785 canonical JSON, so re-running an invocation with
//! identical inputs produces byte-identical rows.
//!
//! # Invariants
//! - `decisions[i]` and `inputs[i]` describe the same subject.
//! - A delete never touches keys outside the batch being written.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::core::context::RunContext;
use crate::core::decision::Decision;
use crate::core::evidence::Evidence;
use crate::core::evidence::EvidenceSet;
use crate::core::hashing::HashError;
use crate::core::hashing::canonical_json_string;
use crate::core::input::InputRecord;
use crate::core::time::TimeError;
use crate::core::time::format_rfc3339;
use crate::interfaces::RepositoryError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Rows written per backend call.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Row construction errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Decisions (or evidence sets) and inputs are not paired one to one.
    #[error("length mismatch: {left_name}={left} vs inputs={inputs}")]
    LengthMismatch {
        /// Name of the left-hand collection.
        left_name: &'static str,
        /// Length of the left-hand collection.
        left: usize,
        /// Number of inputs.
        inputs: usize,
    },
    /// A JSON column could not be encoded.
    #[error("row encoding failed: {0}")]
    Encoding(String),
    /// A timestamp column could not be rendered.
    #[error("row timestamp failed: {0}")]
    Time(String),
}

impl From<HashError> for PersistenceError {
    fn from(error: HashError) -> Self {
        Self::Encoding(error.to_string())
    }
}

impl From<TimeError> for PersistenceError {
    fn from(error: TimeError) -> Self {
        Self::Time(error.to_string())
    }
}

impl From<PersistenceError> for RepositoryError {
    fn from(error: PersistenceError) -> Self {
        Self::Invalid(error.to_string())
    }
}

// ============================================================================
// SECTION: Natural Keys
// ============================================================================

/// Natural key of a decision row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Subject type.
    pub subject_type: String,
    /// Subject identifier.
    pub subject_id: String,
    /// Primitive name.
    pub primitive_name: String,
    /// Primitive version.
    pub primitive_version: String,
    /// RFC 3339 as-of timestamp of the input.
    pub as_of_ts: String,
}

/// Natural key of an evidence row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidenceKey {
    /// Key of the decision the evidence backs.
    pub decision: NaturalKey,
    /// Evidence identifier.
    pub evidence_id: String,
}

/// Derives the decision key for an input evaluated under `ctx`.
///
/// # Errors
///
/// Returns [`PersistenceError::Time`] when the as-of time cannot be rendered.
pub fn decision_key(ctx: &RunContext, input: &InputRecord) -> Result<NaturalKey, PersistenceError> {
    Ok(NaturalKey {
        tenant_id: ctx.tenant_id().to_string(),
        subject_type: input.subject_type.clone(),
        subject_id: input.subject_id.to_string(),
        primitive_name: ctx.primitive_name().to_string(),
        primitive_version: ctx.primitive_version().to_string(),
        as_of_ts: format_rfc3339(input.as_of_ts)?,
    })
}

/// Derives the evidence key for one evidence record of an input.
///
/// # Errors
///
/// Returns [`PersistenceError::Time`] when the as-of time cannot be rendered.
pub fn evidence_key(
    ctx: &RunContext,
    input: &InputRecord,
    evidence: &Evidence,
) -> Result<EvidenceKey, PersistenceError> {
    Ok(EvidenceKey {
        decision: decision_key(ctx, input)?,
        evidence_id: evidence.evidence_id.to_string(),
    })
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Persisted decision row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRow {
    /// Natural key.
    pub key: NaturalKey,
    /// Canonical data version.
    pub canonical_version: String,
    /// Tenant configuration version.
    pub config_version: String,
    /// Decision state label.
    pub decision_state: String,
    /// Confidence label.
    pub confidence: String,
    /// Canonical JSON array of drivers.
    pub drivers_json: String,
    /// Canonical JSON object of metrics.
    pub metrics_json: String,
    /// Canonical JSON array of evidence ids.
    pub evidence_refs_json: String,
    /// RFC 3339 computation time.
    pub computed_at: String,
    /// RFC 3339 expiry, if any.
    pub valid_until: Option<String>,
    /// Correlation identifier of the writing run.
    pub correlation_id: String,
}

/// Persisted evidence row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRow {
    /// Natural key.
    pub key: EvidenceKey,
    /// Canonical data version.
    pub canonical_version: String,
    /// Tenant configuration version.
    pub config_version: String,
    /// Canonical JSON of the evidence record.
    pub evidence_json: String,
    /// RFC 3339 observation time.
    pub computed_at: String,
    /// Correlation identifier of the writing run.
    pub correlation_id: String,
}

/// Builds decision rows, pairing `decisions[i]` with `inputs[i]`.
///
/// # Errors
///
/// Returns [`PersistenceError::LengthMismatch`] when the counts differ, or an
/// encoding error when a column cannot be rendered.
pub fn build_decision_rows(
    ctx: &RunContext,
    decisions: &[Decision],
    inputs: &[InputRecord],
) -> Result<Vec<DecisionRow>, PersistenceError> {
    if decisions.len() != inputs.len() {
        return Err(PersistenceError::LengthMismatch {
            left_name: "decisions",
            left: decisions.len(),
            inputs: inputs.len(),
        });
    }
    decisions
        .iter()
        .zip(inputs)
        .map(|(decision, input)| {
            Ok(DecisionRow {
                key: decision_key(ctx, input)?,
                canonical_version: decision.versions.canonical_version.clone(),
                config_version: decision.versions.config_version.to_string(),
                decision_state: decision.state.as_str().to_string(),
                confidence: decision.confidence.as_str().to_string(),
                drivers_json: canonical_json_string(&decision.drivers)?,
                metrics_json: canonical_json_string(&decision.metrics)?,
                evidence_refs_json: canonical_json_string(&decision.evidence_refs)?,
                computed_at: format_rfc3339(decision.computed_at)?,
                valid_until: decision.valid_until.map(format_rfc3339).transpose()?,
                correlation_id: ctx.correlation_id().to_string(),
            })
        })
        .collect()
}

/// Builds evidence rows, flattening each set while keeping its input pairing.
///
/// # Errors
///
/// Returns [`PersistenceError::LengthMismatch`] when evidence sets, decisions,
/// and inputs are not the same length, or an encoding error when a column
/// cannot be rendered.
pub fn build_evidence_rows(
    ctx: &RunContext,
    evidence_sets: &[EvidenceSet],
    inputs: &[InputRecord],
    decisions: &[Decision],
) -> Result<Vec<EvidenceRow>, PersistenceError> {
    if evidence_sets.len() != inputs.len() {
        return Err(PersistenceError::LengthMismatch {
            left_name: "evidence_sets",
            left: evidence_sets.len(),
            inputs: inputs.len(),
        });
    }
    if decisions.len() != inputs.len() {
        return Err(PersistenceError::LengthMismatch {
            left_name: "decisions",
            left: decisions.len(),
            inputs: inputs.len(),
        });
    }
    let mut rows = Vec::new();
    for ((set, input), decision) in evidence_sets.iter().zip(inputs).zip(decisions) {
        for evidence in &set.evidence {
            rows.push(EvidenceRow {
                key: evidence_key(ctx, input, evidence)?,
                canonical_version: decision.versions.canonical_version.clone(),
                config_version: decision.versions.config_version.to_string(),
                evidence_json: canonical_json_string(evidence)?,
                computed_at: format_rfc3339(evidence.observed_at)?,
                correlation_id: ctx.correlation_id().to_string(),
            });
        }
    }
    Ok(rows)
}

// ============================================================================
// SECTION: Upsert Backend
// ============================================================================

/// Storage operations needed to upsert rows.
pub trait UpsertBackend {
    /// Returns true when the backend has a native merge.
    fn supports_merge(&self) -> bool;

    /// Updates matching decision rows and inserts the rest.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the write fails.
    fn merge_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError>;

    /// Updates matching evidence rows and inserts the rest.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the write fails.
    fn merge_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError>;

    /// Deletes decision rows with exactly these keys.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the delete fails.
    fn delete_decisions(&self, keys: &[NaturalKey]) -> Result<(), RepositoryError>;

    /// Deletes evidence rows with exactly these keys.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the delete fails.
    fn delete_evidence(&self, keys: &[EvidenceKey]) -> Result<(), RepositoryError>;

    /// Deletes the batch's keys and inserts the batch.
    ///
    /// Backends with transactions override this so both halves commit
    /// together.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when either half fails.
    fn replace_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError> {
        let keys: Vec<NaturalKey> = rows.iter().map(|row| row.key.clone()).collect();
        self.delete_decisions(&keys)?;
        self.merge_decisions(rows)
    }

    /// Deletes the batch's evidence keys and inserts the batch.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when either half fails.
    fn replace_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError> {
        let keys: Vec<EvidenceKey> = rows.iter().map(|row| row.key.clone()).collect();
        self.delete_evidence(&keys)?;
        self.merge_evidence(rows)
    }
}

// ============================================================================
// SECTION: Write Modes
// ============================================================================

/// Upsert strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Merge when the backend supports it, otherwise delete and insert.
    #[default]
    Auto,
    /// Native merge.
    Merge,
    /// Delete the batch's keys, then insert.
    DeleteInsert,
}

impl WriteMode {
    /// Resolves `Auto` against the backend's capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when `Merge` is requested from a
    /// backend without merge support.
    pub fn resolve(self, backend: &dyn UpsertBackend) -> Result<Self, RepositoryError> {
        match self {
            Self::Auto if backend.supports_merge() => Ok(Self::Merge),
            Self::Auto | Self::DeleteInsert => Ok(Self::DeleteInsert),
            Self::Merge if backend.supports_merge() => Ok(Self::Merge),
            Self::Merge => {
                Err(RepositoryError::Store("backend does not support merge writes".to_string()))
            }
        }
    }
}

/// Upsert settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsertOptions {
    /// Strategy.
    pub mode: WriteMode,
    /// Rows per backend call.
    pub batch_size: usize,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Auto,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// ============================================================================
// SECTION: Upserts
// ============================================================================

/// Upserts decision rows in batches.
///
/// # Errors
///
/// Returns [`RepositoryError`] from the backend; earlier batches stay written.
pub fn upsert_decisions(
    backend: &dyn UpsertBackend,
    rows: &[DecisionRow],
    options: UpsertOptions,
) -> Result<(), RepositoryError> {
    let mode = options.mode.resolve(backend)?;
    for batch in rows.chunks(options.batch_size.max(1)) {
        if mode == WriteMode::DeleteInsert {
            backend.replace_decisions(batch)?;
        } else {
            backend.merge_decisions(batch)?;
        }
        debug!(rows = batch.len(), ?mode, "decision batch written");
    }
    Ok(())
}

/// Upserts evidence rows in batches.
///
/// # Errors
///
/// Returns [`RepositoryError`] from the backend; earlier batches stay written.
pub fn upsert_evidence(
    backend: &dyn UpsertBackend,
    rows: &[EvidenceRow],
    options: UpsertOptions,
) -> Result<(), RepositoryError> {
    let mode = options.mode.resolve(backend)?;
    for batch in rows.chunks(options.batch_size.max(1)) {
        if mode == WriteMode::DeleteInsert {
            backend.replace_evidence(batch)?;
        } else {
            backend.merge_evidence(batch)?;
        }
        debug!(rows = batch.len(), ?mode, "evidence batch written");
    }
    Ok(())
}

/// Builds and upserts decision rows for a run.
///
/// # Errors
///
/// Returns [`RepositoryError::Invalid`] when rows cannot be built, or the
/// backend's error when the write fails.
pub fn write_decisions_with(
    backend: &dyn UpsertBackend,
    options: UpsertOptions,
    ctx: &RunContext,
    decisions: &[Decision],
    inputs: &[InputRecord],
) -> Result<(), RepositoryError> {
    let rows = build_decision_rows(ctx, decisions, inputs)?;
    upsert_decisions(backend, &rows, options)
}

/// Builds and upserts evidence rows for a run.
///
/// # Errors
///
/// Returns [`RepositoryError::Invalid`] when rows cannot be built, or the
/// backend's error when the write fails.
pub fn write_evidence_with(
    backend: &dyn UpsertBackend,
    options: UpsertOptions,
    ctx: &RunContext,
    evidence_sets: &[EvidenceSet],
    inputs: &[InputRecord],
    decisions: &[Decision],
) -> Result<(), RepositoryError> {
    let rows = build_evidence_rows(ctx, evidence_sets, inputs, decisions)?;
    upsert_evidence(backend, &rows, options)
}
