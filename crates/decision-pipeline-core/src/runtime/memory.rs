// crates/decision-pipeline-core/src/runtime/memory.rs
// ============================================================================
// Module: Decision Pipeline In-Memory Adapters
// Description: In-process implementations of every runner port.
// Purpose: Run the pipeline in tests and local demos without external stores.
// Dependencies: crate::core, crate::interfaces, crate::persistence, time
// ============================================================================

//! ## Overview
//! These adapters keep their state behind `Arc<Mutex<..>>` so clones share
//! one store, which lets a test hand a clone to the runner and inspect the
//! original afterwards. Several adapters accept queued failures so retry and
//! failure paths can be exercised deterministically. They are not intended
//! for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;

use crate::core::context::LockKey;
use crate::core::context::RunContext;
use crate::core::decision::Decision;
use crate::core::evidence::EvidenceSet;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::PrimitiveName;
use crate::core::identifiers::TenantId;
use crate::core::input::InputRecord;
use crate::core::run_record::RunCompletion;
use crate::core::run_record::RunFailure;
use crate::core::run_record::RunRecord;
use crate::core::run_record::RunStatus;
use crate::core::summary::RunSummary;
use crate::core::time::elapsed_millis;
use crate::interfaces::Clock;
use crate::interfaces::ConfigProvider;
use crate::interfaces::ConfigProviderError;
use crate::interfaces::EventError;
use crate::interfaces::EventPublisher;
use crate::interfaces::InputStream;
use crate::interfaces::InputsRepository;
use crate::interfaces::LockError;
use crate::interfaces::LockManager;
use crate::interfaces::OutputsRepository;
use crate::interfaces::ReadinessError;
use crate::interfaces::ReadinessGate;
use crate::interfaces::ReadinessVerdict;
use crate::interfaces::RepositoryError;
use crate::interfaces::ResolvedConfig;
use crate::interfaces::RunRegistry;
use crate::interfaces::RunRegistryError;
use crate::persistence::DecisionRow;
use crate::persistence::EvidenceKey;
use crate::persistence::EvidenceRow;
use crate::persistence::NaturalKey;
use crate::persistence::UpsertBackend;
use crate::persistence::UpsertOptions;
use crate::persistence::write_decisions_with;
use crate::persistence::write_evidence_with;
use crate::primitives::FetchCapability;

// ============================================================================
// SECTION: Config Provider
// ============================================================================

/// Config lookup key: tenant, config version, primitive.
type ConfigKey = (String, String, String);

/// Config provider holding a fixed set of resolved configs.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    /// Configs keyed by tenant, config version, and primitive.
    configs: BTreeMap<ConfigKey, ResolvedConfig>,
    /// Serve empty settings for unknown keys instead of failing.
    permissive: bool,
}

impl StaticConfigProvider {
    /// Creates a provider that fails for every lookup until configs are added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider that serves empty settings for any lookup.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            configs: BTreeMap::new(),
            permissive: true,
        }
    }

    /// Adds settings for a tenant, config version, and primitive.
    #[must_use]
    pub fn with_settings(
        mut self,
        tenant_id: &str,
        config_version: &str,
        primitive_name: &str,
        settings: Map<String, Value>,
    ) -> Self {
        self.configs.insert(
            (tenant_id.to_string(), config_version.to_string(), primitive_name.to_string()),
            ResolvedConfig::new(ConfigVersion::new(config_version), settings),
        );
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn get_config(
        &self,
        tenant_id: &TenantId,
        config_version: &ConfigVersion,
        primitive_name: &PrimitiveName,
    ) -> Result<ResolvedConfig, ConfigProviderError> {
        let key = (
            tenant_id.to_string(),
            config_version.to_string(),
            primitive_name.to_string(),
        );
        if let Some(config) = self.configs.get(&key) {
            return Ok(config.clone());
        }
        if self.permissive {
            return Ok(ResolvedConfig::new(config_version.clone(), Map::new()));
        }
        Err(ConfigProviderError::NotFound(format!(
            "tenant={tenant_id} config_version={config_version} primitive={primitive_name}"
        )))
    }
}

// ============================================================================
// SECTION: Inputs Repository
// ============================================================================

/// Inputs repository serving records per fetch capability.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInputsRepository {
    /// Records keyed by capability name.
    records: Arc<Mutex<BTreeMap<String, Vec<InputRecord>>>>,
    /// Errors returned by the next fetches, in order.
    failures: Arc<Mutex<VecDeque<RepositoryError>>>,
    /// Number of fetch calls made.
    fetches: Arc<Mutex<u64>>,
}

impl InMemoryInputsRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the records served for a capability.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn set_inputs(
        &self,
        capability_name: &str,
        records: Vec<InputRecord>,
    ) -> Result<(), RepositoryError> {
        self.records
            .lock()
            .map_err(|_| RepositoryError::Store("inputs mutex poisoned".to_string()))?
            .insert(capability_name.to_string(), records);
        Ok(())
    }

    /// Queues an error for the next fetch call.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn push_failure(&self, error: RepositoryError) -> Result<(), RepositoryError> {
        self.failures
            .lock()
            .map_err(|_| RepositoryError::Store("inputs mutex poisoned".to_string()))?
            .push_back(error);
        Ok(())
    }

    /// Returns how many times inputs were fetched.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn fetch_count(&self) -> Result<u64, RepositoryError> {
        Ok(*self
            .fetches
            .lock()
            .map_err(|_| RepositoryError::Store("inputs mutex poisoned".to_string()))?)
    }
}

impl InputsRepository for InMemoryInputsRepository {
    fn fetch_inputs<'a>(
        &'a self,
        _ctx: &RunContext,
        capability: &FetchCapability,
    ) -> Result<InputStream<'a>, RepositoryError> {
        *self
            .fetches
            .lock()
            .map_err(|_| RepositoryError::Store("inputs mutex poisoned".to_string()))? += 1;
        if let Some(error) = self
            .failures
            .lock()
            .map_err(|_| RepositoryError::Store("inputs mutex poisoned".to_string()))?
            .pop_front()
        {
            return Err(error);
        }
        let records = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Store("inputs mutex poisoned".to_string()))?
            .get(capability.name)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

// ============================================================================
// SECTION: Outputs Repository
// ============================================================================

/// Rows held by [`InMemoryOutputsRepository`].
#[derive(Debug, Default)]
struct OutputTables {
    /// Decision rows keyed by natural key.
    decisions: BTreeMap<NaturalKey, DecisionRow>,
    /// Evidence rows keyed by natural key plus evidence id.
    evidence: BTreeMap<EvidenceKey, EvidenceRow>,
    /// Backend calls in order, for write-protocol assertions.
    operations: Vec<String>,
    /// Errors returned by the next write calls, in order.
    failures: VecDeque<RepositoryError>,
}

/// Idempotent outputs repository backed by ordered maps.
#[derive(Debug, Clone)]
pub struct InMemoryOutputsRepository {
    /// Shared tables.
    tables: Arc<Mutex<OutputTables>>,
    /// Whether the backend reports native merge support.
    merge_supported: bool,
    /// Upsert settings.
    options: UpsertOptions,
}

impl Default for InMemoryOutputsRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutputsRepository {
    /// Creates a repository with merge support and default upsert settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(true, UpsertOptions::default())
    }

    /// Creates a repository with explicit capabilities and settings.
    #[must_use]
    pub fn with_options(merge_supported: bool, options: UpsertOptions) -> Self {
        Self {
            tables: Arc::new(Mutex::new(OutputTables::default())),
            merge_supported,
            options,
        }
    }

    /// Runs `f` against the locked tables.
    fn with_tables<T>(
        &self,
        f: impl FnOnce(&mut OutputTables) -> T,
    ) -> Result<T, RepositoryError> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| RepositoryError::Store("outputs mutex poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    /// Records an operation, returning a queued failure if one is pending.
    fn begin(&self, operation: &str) -> Result<(), RepositoryError> {
        self.with_tables(|tables| {
            tables.operations.push(operation.to_string());
            tables.failures.pop_front()
        })?
        .map_or(Ok(()), Err)
    }

    /// Queues an error for the next write call.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn push_failure(&self, error: RepositoryError) -> Result<(), RepositoryError> {
        self.with_tables(|tables| tables.failures.push_back(error))
    }

    /// Returns decision rows ordered by natural key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn decision_rows(&self) -> Result<Vec<DecisionRow>, RepositoryError> {
        self.with_tables(|tables| tables.decisions.values().cloned().collect())
    }

    /// Returns evidence rows ordered by natural key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn evidence_rows(&self) -> Result<Vec<EvidenceRow>, RepositoryError> {
        self.with_tables(|tables| tables.evidence.values().cloned().collect())
    }

    /// Returns the backend operations performed so far.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the mutex is poisoned.
    pub fn operations(&self) -> Result<Vec<String>, RepositoryError> {
        self.with_tables(|tables| tables.operations.clone())
    }
}

impl UpsertBackend for InMemoryOutputsRepository {
    fn supports_merge(&self) -> bool {
        self.merge_supported
    }

    fn merge_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError> {
        self.begin("merge_decisions")?;
        self.with_tables(|tables| {
            for row in rows {
                tables.decisions.insert(row.key.clone(), row.clone());
            }
        })
    }

    fn merge_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError> {
        self.begin("merge_evidence")?;
        self.with_tables(|tables| {
            for row in rows {
                tables.evidence.insert(row.key.clone(), row.clone());
            }
        })
    }

    fn delete_decisions(&self, keys: &[NaturalKey]) -> Result<(), RepositoryError> {
        self.begin("delete_decisions")?;
        self.with_tables(|tables| {
            for key in keys {
                tables.decisions.remove(key);
            }
        })
    }

    fn delete_evidence(&self, keys: &[EvidenceKey]) -> Result<(), RepositoryError> {
        self.begin("delete_evidence")?;
        self.with_tables(|tables| {
            for key in keys {
                tables.evidence.remove(key);
            }
        })
    }
}

impl OutputsRepository for InMemoryOutputsRepository {
    fn write_decisions(
        &self,
        ctx: &RunContext,
        decisions: &[Decision],
        inputs: &[InputRecord],
    ) -> Result<(), RepositoryError> {
        write_decisions_with(self, self.options, ctx, decisions, inputs)
    }

    fn write_evidence(
        &self,
        ctx: &RunContext,
        evidence_sets: &[EvidenceSet],
        inputs: &[InputRecord],
        decisions: &[Decision],
    ) -> Result<(), RepositoryError> {
        write_evidence_with(self, self.options, ctx, evidence_sets, inputs, decisions)
    }
}

// ============================================================================
// SECTION: Run Registry
// ============================================================================

/// Run registry that discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunRegistry;

impl RunRegistry for NoopRunRegistry {
    fn register_run_started(
        &self,
        _ctx: &RunContext,
        _canonical_version: &str,
        _started_at: OffsetDateTime,
    ) -> Result<(), RunRegistryError> {
        Ok(())
    }

    fn register_run_completed(
        &self,
        _ctx: &RunContext,
        _completion: &RunCompletion,
    ) -> Result<(), RunRegistryError> {
        Ok(())
    }

    fn register_run_failed(
        &self,
        _ctx: &RunContext,
        _failure: &RunFailure,
    ) -> Result<(), RunRegistryError> {
        Ok(())
    }
}

/// Run registry keeping records in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunRegistry {
    /// Records keyed by correlation id.
    records: Arc<Mutex<BTreeMap<String, RunRecord>>>,
    /// Fail every write when set.
    failing: bool,
}

impl InMemoryRunRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose writes always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            records: Arc::default(),
            failing: true,
        }
    }

    /// Returns the record for a correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`RunRegistryError::Store`] when the mutex is poisoned.
    pub fn record(&self, correlation_id: &str) -> Result<Option<RunRecord>, RunRegistryError> {
        Ok(self.lock()?.get(correlation_id).cloned())
    }

    /// Returns every record ordered by correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`RunRegistryError::Store`] when the mutex is poisoned.
    pub fn records(&self) -> Result<Vec<RunRecord>, RunRegistryError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    /// Locks the record map, failing when configured to.
    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, RunRecord>>, RunRegistryError> {
        self.records
            .lock()
            .map_err(|_| RunRegistryError::Store("run registry mutex poisoned".to_string()))
    }

    /// Applies a terminal transition to a started record.
    fn finish(
        &self,
        ctx: &RunContext,
        apply: impl FnOnce(&mut RunRecord),
    ) -> Result<(), RunRegistryError> {
        if self.failing {
            return Err(RunRegistryError::Store("run registry unavailable".to_string()));
        }
        let mut guard = self.lock()?;
        let record = guard.get_mut(ctx.correlation_id().as_str()).ok_or_else(|| {
            RunRegistryError::Store(format!("run not registered: {}", ctx.correlation_id()))
        })?;
        if record.status.is_terminal() {
            return Err(RunRegistryError::Store(format!(
                "run already terminal: {}",
                ctx.correlation_id()
            )));
        }
        apply(record);
        drop(guard);
        Ok(())
    }
}

impl RunRegistry for InMemoryRunRegistry {
    fn register_run_started(
        &self,
        ctx: &RunContext,
        canonical_version: &str,
        started_at: OffsetDateTime,
    ) -> Result<(), RunRegistryError> {
        if self.failing {
            return Err(RunRegistryError::Store("run registry unavailable".to_string()));
        }
        self.lock()?.insert(
            ctx.correlation_id().to_string(),
            RunRecord::started(ctx, canonical_version, started_at),
        );
        Ok(())
    }

    fn register_run_completed(
        &self,
        ctx: &RunContext,
        completion: &RunCompletion,
    ) -> Result<(), RunRegistryError> {
        self.finish(ctx, |record| {
            record.status = RunStatus::Success;
            record.completed_at = Some(completion.completed_at);
            record.duration_ms = Some(elapsed_millis(
                completion.started_at,
                completion.completed_at,
            ));
            record.input_count = Some(completion.input_count);
            record.decision_count = Some(completion.decision_count);
            record.state_counts.clone_from(&completion.state_counts);
        })
    }

    fn register_run_failed(
        &self,
        ctx: &RunContext,
        failure: &RunFailure,
    ) -> Result<(), RunRegistryError> {
        self.finish(ctx, |record| {
            record.status = RunStatus::Failed;
            record.completed_at = Some(failure.completed_at);
            record.duration_ms =
                Some(elapsed_millis(failure.started_at, failure.completed_at));
            record.error_message = Some(failure.error_message.clone());
        })
    }
}

// ============================================================================
// SECTION: Event Publishers
// ============================================================================

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish_decision_ready(
        &self,
        _ctx: &RunContext,
        _summary: &RunSummary,
    ) -> Result<(), EventError> {
        Ok(())
    }
}

/// Publisher that records every summary it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    /// Published summaries in order.
    events: Arc<Mutex<Vec<RunSummary>>>,
    /// Fail every publish when set.
    failing: bool,
}

impl RecordingEventPublisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a publisher whose publishes always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            events: Arc::default(),
            failing: true,
        }
    }

    /// Returns the published summaries.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Publish`] when the mutex is poisoned.
    pub fn events(&self) -> Result<Vec<RunSummary>, EventError> {
        Ok(self
            .events
            .lock()
            .map_err(|_| EventError::Publish("event mutex poisoned".to_string()))?
            .clone())
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish_decision_ready(
        &self,
        _ctx: &RunContext,
        summary: &RunSummary,
    ) -> Result<(), EventError> {
        if self.failing {
            return Err(EventError::Publish("event sink unavailable".to_string()));
        }
        self.events
            .lock()
            .map_err(|_| EventError::Publish("event mutex poisoned".to_string()))?
            .push(summary.clone());
        Ok(())
    }
}

// ============================================================================
// SECTION: Lock Managers
// ============================================================================

/// Lock manager that always grants.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLockManager;

impl LockManager for NoopLockManager {
    fn acquire(&self, _key: &LockKey) -> Result<(), LockError> {
        Ok(())
    }

    fn release(&self, _key: &LockKey) -> Result<(), LockError> {
        Ok(())
    }
}

/// In-process exclusive lock per (tenant, primitive).
#[derive(Debug, Clone, Default)]
pub struct LocalLockManager {
    /// Held lock keys.
    held: Arc<Mutex<BTreeSet<LockKey>>>,
}

impl LocalLockManager {
    /// Creates a lock manager with no held locks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while the key is held.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] when the mutex is poisoned.
    pub fn is_held(&self, key: &LockKey) -> Result<bool, LockError> {
        Ok(self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock mutex poisoned".to_string()))?
            .contains(key))
    }
}

impl LockManager for LocalLockManager {
    fn acquire(&self, key: &LockKey) -> Result<(), LockError> {
        let inserted = self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock mutex poisoned".to_string()))?
            .insert(key.clone());
        if inserted {
            Ok(())
        } else {
            Err(LockError::Held(format!("{}/{}", key.tenant_id, key.primitive_name)))
        }
    }

    fn release(&self, key: &LockKey) -> Result<(), LockError> {
        self.held
            .lock()
            .map_err(|_| LockError::Backend("lock mutex poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

// ============================================================================
// SECTION: Readiness
// ============================================================================

/// Readiness gate returning a fixed verdict or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticReadinessGate {
    /// Result returned by every check.
    result: Result<ReadinessVerdict, ReadinessError>,
}

impl StaticReadinessGate {
    /// Creates a gate returning `verdict`.
    #[must_use]
    pub const fn verdict(verdict: ReadinessVerdict) -> Self {
        Self {
            result: Ok(verdict),
        }
    }

    /// Creates a gate whose check fails with `message`.
    #[must_use]
    pub fn erroring(message: impl Into<String>) -> Self {
        Self {
            result: Err(ReadinessError::Check(message.into())),
        }
    }
}

impl ReadinessGate for StaticReadinessGate {
    fn check(&self, _ctx: &RunContext) -> Result<ReadinessVerdict, ReadinessError> {
        self.result.clone()
    }
}

// ============================================================================
// SECTION: Clocks
// ============================================================================

/// Clock reading the system time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock returning a fixed instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    /// Instant returned by every call.
    now: OffsetDateTime,
}

impl FixedClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: OffsetDateTime) -> Self {
        Self {
            now,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.now
    }
}
