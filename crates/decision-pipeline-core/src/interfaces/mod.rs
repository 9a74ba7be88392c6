// crates/decision-pipeline-core/src/interfaces/mod.rs
// ============================================================================
// Module: Decision Pipeline Interfaces
// Description: Ports for config, inputs, outputs, audit, events, locks, and time.
// Purpose: Define the contract surfaces the runner depends on.
// Dependencies: crate::core, serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Interfaces define how the decision pipeline integrates with warehouses,
//! stores, and schedulers without embedding backend-specific details.
//!
//! Output writes must be idempotent on the natural key. Run registry writes,
//! event publishing, and lock release are side channels: the runner logs
//! their failures and never lets them mask the run outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::context::LockKey;
use crate::core::context::RunContext;
use crate::core::decision::Decision;
use crate::core::evidence::EvidenceSet;
use crate::core::hashing::HashError;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::PrimitiveName;
use crate::core::identifiers::TenantId;
use crate::core::input::InputRecord;
use crate::core::run_record::RunCompletion;
use crate::core::run_record::RunFailure;
use crate::core::summary::RunSummary;
use crate::primitives::FetchCapability;

// ============================================================================
// SECTION: Config Provider
// ============================================================================

/// Canonical data version assumed when config does not name one.
pub const DEFAULT_CANONICAL_VERSION: &str = "v1";

/// Tenant configuration resolved for one primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Configuration version that was resolved.
    pub config_version: ConfigVersion,
    /// Canonical data version the inputs are read from.
    pub canonical_version: String,
    /// Primitive settings, parsed by the primitive when bound.
    pub settings: Map<String, Value>,
}

impl ResolvedConfig {
    /// Creates a resolved config with the default canonical version.
    #[must_use]
    pub fn new(config_version: ConfigVersion, settings: Map<String, Value>) -> Self {
        Self {
            config_version,
            canonical_version: DEFAULT_CANONICAL_VERSION.to_string(),
            settings,
        }
    }
}

/// Config provider errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigProviderError {
    /// No config exists for the tenant, version, and primitive.
    #[error("config not found: {0}")]
    NotFound(String),
    /// Config exists but is malformed.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Config backend is unavailable.
    #[error("config provider unavailable: {0}")]
    Unavailable(String),
}

/// Source of tenant configuration.
pub trait ConfigProvider {
    /// Resolves config for a tenant, config version, and primitive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigProviderError`] when config cannot be resolved.
    fn get_config(
        &self,
        tenant_id: &TenantId,
        config_version: &ConfigVersion,
        primitive_name: &PrimitiveName,
    ) -> Result<ResolvedConfig, ConfigProviderError>;
}

// ============================================================================
// SECTION: Repository Errors
// ============================================================================

/// Details of a store whose schema is not provisioned.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ProvisioningError {
    /// Human-readable description.
    pub message: String,
    /// Tables that are missing or incomplete.
    pub table_names: Vec<String>,
    /// DDL file that provisions the tables, when known.
    pub ddl_file_path: Option<String>,
    /// Command an operator can run to provision the tables.
    pub suggested_command: Option<String>,
}

/// Inputs and outputs repository errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Temporary infrastructure failure; safe to retry.
    #[error("transient repository error: {0}")]
    Transient(String),
    /// Backing tables are missing or incomplete.
    #[error("repository not provisioned: {0}")]
    Provisioning(ProvisioningError),
    /// Data read from or written to the repository is invalid.
    #[error("invalid repository data: {0}")]
    Invalid(String),
    /// Input or output persistence failed.
    #[error("repository io error: {0}")]
    Io(String),
    /// Backend-specific failure.
    #[error("repository store error: {0}")]
    Store(String),
}

impl RepositoryError {
    /// Returns true when the error is safe to retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ProvisioningError> for RepositoryError {
    fn from(error: ProvisioningError) -> Self {
        Self::Provisioning(error)
    }
}

impl From<HashError> for RepositoryError {
    fn from(error: HashError) -> Self {
        Self::Invalid(error.to_string())
    }
}

// ============================================================================
// SECTION: Inputs Repository
// ============================================================================

/// Stream of input records produced by an inputs repository.
pub type InputStream<'a> = Box<dyn Iterator<Item = Result<InputRecord, RepositoryError>> + 'a>;

/// Source of canonical inputs.
pub trait InputsRepository {
    /// Opens a stream of inputs for the run and fetch capability.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the stream cannot be opened.
    fn fetch_inputs<'a>(
        &'a self,
        ctx: &RunContext,
        capability: &FetchCapability,
    ) -> Result<InputStream<'a>, RepositoryError>;
}

// ============================================================================
// SECTION: Outputs Repository
// ============================================================================

/// Idempotent sink for decisions and evidence.
///
/// # Invariants
/// - `decisions[i]` and `evidence_sets[i]` were produced from `inputs[i]`.
/// - Writing the same rows twice leaves the store unchanged.
pub trait OutputsRepository {
    /// Upserts decisions keyed by their natural key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the write fails.
    fn write_decisions(
        &self,
        ctx: &RunContext,
        decisions: &[Decision],
        inputs: &[InputRecord],
    ) -> Result<(), RepositoryError>;

    /// Upserts evidence keyed by natural key plus evidence id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the write fails.
    fn write_evidence(
        &self,
        ctx: &RunContext,
        evidence_sets: &[EvidenceSet],
        inputs: &[InputRecord],
        decisions: &[Decision],
    ) -> Result<(), RepositoryError>;
}

// ============================================================================
// SECTION: Run Registry
// ============================================================================

/// Run registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunRegistryError {
    /// Registry backend failed.
    #[error("run registry error: {0}")]
    Store(String),
}

/// Best-effort audit log of run attempts.
pub trait RunRegistry {
    /// Records a `STARTED` row.
    ///
    /// # Errors
    ///
    /// Returns [`RunRegistryError`] when the row cannot be written.
    fn register_run_started(
        &self,
        ctx: &RunContext,
        canonical_version: &str,
        started_at: OffsetDateTime,
    ) -> Result<(), RunRegistryError>;

    /// Transitions the run to `SUCCESS`.
    ///
    /// # Errors
    ///
    /// Returns [`RunRegistryError`] when the row cannot be written.
    fn register_run_completed(
        &self,
        ctx: &RunContext,
        completion: &RunCompletion,
    ) -> Result<(), RunRegistryError>;

    /// Transitions the run to `FAILED`.
    ///
    /// # Errors
    ///
    /// Returns [`RunRegistryError`] when the row cannot be written.
    fn register_run_failed(
        &self,
        ctx: &RunContext,
        failure: &RunFailure,
    ) -> Result<(), RunRegistryError>;
}

// ============================================================================
// SECTION: Event Publisher
// ============================================================================

/// Event publisher errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Publishing failed.
    #[error("event publish error: {0}")]
    Publish(String),
}

/// Fire-and-forget notifier for downstream consumers.
pub trait EventPublisher {
    /// Announces that decisions for the run are ready.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] when the event cannot be published.
    fn publish_decision_ready(&self, ctx: &RunContext, summary: &RunSummary)
    -> Result<(), EventError>;
}

// ============================================================================
// SECTION: Lock Manager
// ============================================================================

/// Lock manager errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Another run holds the lock.
    #[error("lock held: {0}")]
    Held(String),
    /// Lock backend failed.
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Advisory lock per (tenant, primitive).
pub trait LockManager {
    /// Acquires the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] when the lock is taken.
    fn acquire(&self, key: &LockKey) -> Result<(), LockError>;

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] when the backend fails.
    fn release(&self, key: &LockKey) -> Result<(), LockError>;
}

// ============================================================================
// SECTION: Readiness Gate
// ============================================================================

/// Readiness verdict for the run's source data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessVerdict {
    /// Data is ready.
    Pass,
    /// Data is usable with caveats.
    Warn(String),
    /// Data is not ready; the run must not proceed.
    Fail(String),
}

/// Readiness evaluation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    /// Readiness could not be evaluated.
    #[error("readiness check error: {0}")]
    Check(String),
}

/// Pre-run readiness check.
pub trait ReadinessGate {
    /// Evaluates readiness for the run.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] when readiness cannot be evaluated.
    fn check(&self, ctx: &RunContext) -> Result<ReadinessVerdict, ReadinessError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock source.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> OffsetDateTime;
}
