// crates/decision-pipeline-core/src/runtime/runner.rs
// ============================================================================
// Module: Decision Pipeline Runner
// Description: Evaluate-and-persist orchestration for one primitive run.
// Purpose: Drive lock, readiness, config, evaluation, persistence, and audit.
// Dependencies: crate::{core, interfaces, persistence, primitives, registry}, tracing
// ============================================================================

//! ## Overview
//! A [`Runner`] evaluates one primitive for one tenant. Its lifecycle is
//! `INIT -> LOCKED -> READINESS_CHECKED -> CONFIGURED -> EVALUATING ->
//! PERSISTING -> {COMPLETED | FAILED | CANCELLED}`, and every transition is
//! logged inside a span carrying the correlation id.
//!
//! Caller and config errors surface before any input is fetched. Inputs are
//! evaluated sequentially; the cancellation token is checked once per input,
//! and a cancelled run persists nothing. Decisions are written before
//! evidence, each through one idempotent call retried on transient errors.
//!
//! The run registry, event publisher, and lock release are side channels.
//! Their failures are logged and never replace the run's own outcome.
//!
//! # Invariants
//! - The lock is released on every exit path after it was acquired.
//! - A run registered as `STARTED` receives exactly one terminal transition.
//! - `decisions[i]` and `inputs[i]` are passed to outputs as pairs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use crate::core::context::LockKey;
use crate::core::context::RunContext;
use crate::core::decision::Decision;
use crate::core::evidence::EvidenceSet;
use crate::core::input::InputRecord;
use crate::core::run_record::RunCompletion;
use crate::core::run_record::RunFailure;
use crate::core::summary::CancelledRun;
use crate::core::summary::RunSummary;
use crate::core::summary::StateCounts;
use crate::core::summary::tally_states;
use crate::core::time::elapsed_millis;
use crate::interfaces::Clock;
use crate::interfaces::ConfigProvider;
use crate::interfaces::ConfigProviderError;
use crate::interfaces::EventPublisher;
use crate::interfaces::InputsRepository;
use crate::interfaces::LockError;
use crate::interfaces::LockManager;
use crate::interfaces::OutputsRepository;
use crate::interfaces::ReadinessGate;
use crate::interfaces::ReadinessVerdict;
use crate::interfaces::RepositoryError;
use crate::interfaces::ResolvedConfig;
use crate::interfaces::RunRegistry;
use crate::primitives::BindError;
use crate::primitives::EvaluationError;
use crate::registry::Registry;
use crate::registry::RegistryError;
use crate::runtime::cancellation::CancellationToken;
use crate::runtime::memory::LocalLockManager;
use crate::runtime::memory::NoopEventPublisher;
use crate::runtime::memory::NoopRunRegistry;
use crate::runtime::memory::SystemClock;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::retry::Sleeper;
use crate::runtime::retry::ThreadSleeper;
use crate::runtime::retry::retry_transient;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Error message recorded for cancelled runs.
pub const CANCELLED_MESSAGE: &str = "run cancelled";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors that fail a run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The run lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// The readiness gate returned a failing verdict.
    #[error("source data not ready: {0}")]
    NotReady(String),
    /// Tenant config could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigProviderError),
    /// Primitive or version is not registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Config failed to bind to the primitive.
    #[error(transparent)]
    Bind(#[from] BindError),
    /// Inputs or outputs repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// An input could not be evaluated.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Non-error result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Outputs were persisted.
    Completed(RunSummary),
    /// The token was cancelled before persistence.
    Cancelled(CancelledRun),
}

impl RunOutcome {
    /// Returns the summary of a completed run.
    #[must_use]
    pub const fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::Cancelled(_) => None,
        }
    }

    /// Returns true when the run was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result of the evaluation and persistence phases.
enum Execution {
    /// Outputs were persisted.
    Completed {
        /// Inputs evaluated.
        evaluated: u64,
        /// Decisions persisted.
        emitted: u64,
        /// Persisted decisions by state.
        state_counts: StateCounts,
    },
    /// Cancellation was observed.
    Cancelled {
        /// Inputs evaluated before cancellation.
        evaluated: u64,
    },
}

// ============================================================================
// SECTION: Run Lock
// ============================================================================

/// Held run lock, released when dropped.
///
/// Release also happens while unwinding from a panicking evaluator.
struct RunLock<'a> {
    /// Manager that granted the lock.
    locks: &'a (dyn LockManager + Send + Sync),
    /// Scope of the held lock.
    key: LockKey,
}

impl<'a> RunLock<'a> {
    /// Acquires the lock for `key`.
    fn acquire(locks: &'a (dyn LockManager + Send + Sync), key: LockKey) -> Result<Self, LockError> {
        locks.acquire(&key)?;
        Ok(Self {
            locks,
            key,
        })
    }
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.locks.release(&self.key) {
            warn!(error = %err, "run lock release failed");
        }
    }
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Orchestrates one primitive run against injected ports.
pub struct Runner<C, I, O> {
    /// Tenant config source.
    config_provider: C,
    /// Canonical inputs source.
    inputs: I,
    /// Idempotent outputs sink.
    outputs: O,
    /// Primitive registry.
    registry: Arc<Registry>,
    /// Best-effort audit log.
    run_registry: Arc<dyn RunRegistry + Send + Sync>,
    /// Fire-and-forget notifier.
    events: Arc<dyn EventPublisher + Send + Sync>,
    /// Advisory lock per (tenant, primitive).
    locks: Arc<dyn LockManager + Send + Sync>,
    /// Optional readiness gate.
    readiness: Option<Arc<dyn ReadinessGate + Send + Sync>>,
    /// Wall-clock source for audit timestamps.
    clock: Arc<dyn Clock + Send + Sync>,
    /// Delay source for retries.
    sleeper: Arc<dyn Sleeper + Send + Sync>,
    /// Retry policy for repository calls.
    retry: RetryPolicy,
}

impl<C, I, O> Runner<C, I, O>
where
    C: ConfigProvider,
    I: InputsRepository,
    O: OutputsRepository,
{
    /// Creates a runner with a local lock manager, no-op side channels, and
    /// the default retry policy.
    #[must_use]
    pub fn new(config_provider: C, inputs: I, outputs: O, registry: Arc<Registry>) -> Self {
        Self {
            config_provider,
            inputs,
            outputs,
            registry,
            run_registry: Arc::new(NoopRunRegistry),
            events: Arc::new(NoopEventPublisher),
            locks: Arc::new(LocalLockManager::new()),
            readiness: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(ThreadSleeper),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the run registry.
    #[must_use]
    pub fn with_run_registry(mut self, run_registry: Arc<dyn RunRegistry + Send + Sync>) -> Self {
        self.run_registry = run_registry;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher + Send + Sync>) -> Self {
        self.events = events;
        self
    }

    /// Sets the lock manager.
    #[must_use]
    pub fn with_lock_manager(mut self, locks: Arc<dyn LockManager + Send + Sync>) -> Self {
        self.locks = locks;
        self
    }

    /// Sets the readiness gate.
    #[must_use]
    pub fn with_readiness_gate(mut self, gate: Arc<dyn ReadinessGate + Send + Sync>) -> Self {
        self.readiness = Some(gate);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the retry sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper + Send + Sync>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs the primitive named by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the lock, readiness, config, registry,
    /// binding, a repository, or an evaluation fails. Cancellation is
    /// reported as [`RunOutcome::Cancelled`], not as an error.
    pub fn run(&self, ctx: &RunContext, cancel: &CancellationToken) -> Result<RunOutcome, RunError> {
        let _span = info_span!(
            "decision_run",
            correlation_id = %ctx.correlation_id(),
            tenant_id = %ctx.tenant_id(),
            primitive = %ctx.primitive_name(),
        )
        .entered();
        let started_at = self.clock.now();
        info!(state = "INIT", primitive_version = %ctx.primitive_version(), "run initialized");

        let _lock = RunLock::acquire(self.locks.as_ref(), ctx.lock_key()).inspect_err(|err| {
            error!(state = "FAILED", error = %err, "run lock not acquired");
        })?;
        info!(state = "LOCKED", "run lock acquired");

        self.run_locked(ctx, cancel, started_at)
    }

    /// Runs every phase after the lock is held.
    fn run_locked(
        &self,
        ctx: &RunContext,
        cancel: &CancellationToken,
        started_at: OffsetDateTime,
    ) -> Result<RunOutcome, RunError> {
        self.check_readiness(ctx).inspect_err(|err| {
            error!(state = "FAILED", error = %err, "run not ready");
        })?;

        let config = self
            .config_provider
            .get_config(ctx.tenant_id(), ctx.config_version(), ctx.primitive_name())
            .inspect_err(|err| {
                error!(state = "FAILED", error = %err, "config resolution failed");
            })?;
        info!(
            state = "CONFIGURED",
            canonical_version = %config.canonical_version,
            "config resolved"
        );

        if let Err(err) =
            self.run_registry.register_run_started(ctx, &config.canonical_version, started_at)
        {
            warn!(error = %err, "run registry start write failed");
        }

        match self.execute(ctx, cancel, &config) {
            Ok(Execution::Completed {
                evaluated,
                emitted,
                state_counts,
            }) => {
                let completed_at = self.clock.now();
                let completion = RunCompletion {
                    started_at,
                    completed_at,
                    input_count: evaluated,
                    decision_count: emitted,
                    state_counts: state_counts.clone(),
                };
                if let Err(err) = self.run_registry.register_run_completed(ctx, &completion) {
                    warn!(error = %err, "run registry completion write failed");
                }
                let summary = RunSummary {
                    tenant_id: ctx.tenant_id().clone(),
                    primitive_name: ctx.primitive_name().clone(),
                    primitive_version: ctx.primitive_version().clone(),
                    config_version: ctx.config_version().clone(),
                    correlation_id: ctx.correlation_id().clone(),
                    emitted_count: emitted,
                    evaluated_count: evaluated,
                    state_counts,
                    duration_ms: elapsed_millis(started_at, completed_at),
                };
                if let Err(err) = self.events.publish_decision_ready(ctx, &summary) {
                    warn!(error = %err, "decision ready event not published");
                }
                info!(
                    state = "COMPLETED",
                    evaluated_count = evaluated,
                    emitted_count = emitted,
                    duration_ms = summary.duration_ms,
                    "run completed"
                );
                Ok(RunOutcome::Completed(summary))
            }
            Ok(Execution::Cancelled {
                evaluated,
            }) => {
                self.register_failed(ctx, started_at, CANCELLED_MESSAGE);
                info!(state = "CANCELLED", evaluated_count = evaluated, "run cancelled");
                Ok(RunOutcome::Cancelled(CancelledRun {
                    correlation_id: ctx.correlation_id().clone(),
                    evaluated_before_cancel: evaluated,
                }))
            }
            Err(err) => {
                self.register_failed(ctx, started_at, &err.to_string());
                error!(state = "FAILED", error = %err, "run failed");
                Err(err)
            }
        }
    }

    /// Applies the readiness gate, failing closed on `Fail` and open on errors.
    fn check_readiness(&self, ctx: &RunContext) -> Result<(), RunError> {
        let Some(gate) = &self.readiness else {
            return Ok(());
        };
        match gate.check(ctx) {
            Ok(ReadinessVerdict::Pass) => {
                info!(state = "READINESS_CHECKED", verdict = "PASS", "readiness passed");
                Ok(())
            }
            Ok(ReadinessVerdict::Warn(detail)) => {
                warn!(state = "READINESS_CHECKED", verdict = "WARN", detail = %detail, "readiness warning");
                Ok(())
            }
            Ok(ReadinessVerdict::Fail(detail)) => Err(RunError::NotReady(detail)),
            Err(err) => {
                warn!(error = %err, "readiness check errored; proceeding");
                Ok(())
            }
        }
    }

    /// Resolves the evaluator, evaluates every input, and persists outputs.
    fn execute(
        &self,
        ctx: &RunContext,
        cancel: &CancellationToken,
        config: &ResolvedConfig,
    ) -> Result<Execution, RunError> {
        let name = ctx.primitive_name().as_str();
        let version = ctx.primitive_version().as_str();
        self.registry.ensure_version(name, version, ctx.config_version().as_str())?;
        let evaluator = self.registry.get(name, version)?;
        let capability = self.registry.fetch_capability(name)?;
        let bound = evaluator.bind(config)?;

        let stream = retry_transient(&self.retry, self.sleeper.as_ref(), "fetch_inputs", || {
            self.inputs.fetch_inputs(ctx, &capability)
        })?;
        info!(state = "EVALUATING", capability = capability.name, "evaluating inputs");

        let mut evaluated: u64 = 0;
        let mut inputs: Vec<InputRecord> = Vec::new();
        let mut decisions: Vec<Decision> = Vec::new();
        let mut evidence_sets: Vec<EvidenceSet> = Vec::new();
        for item in stream {
            if cancel.is_cancelled() {
                return Ok(Execution::Cancelled {
                    evaluated,
                });
            }
            let record = item?;
            let result = bound.evaluate(&record)?;
            evaluated += 1;
            let Some(result) = result else {
                continue;
            };
            result.decision.validate(bound.states(), &result.evidence_set).map_err(|source| {
                EvaluationError::InvalidDecision {
                    subject_id: record.subject_id.to_string(),
                    source,
                }
            })?;
            inputs.push(record);
            decisions.push(result.decision);
            evidence_sets.push(result.evidence_set);
        }
        if cancel.is_cancelled() {
            return Ok(Execution::Cancelled {
                evaluated,
            });
        }

        let emitted = u64::try_from(decisions.len()).unwrap_or(u64::MAX);
        info!(state = "PERSISTING", evaluated_count = evaluated, emitted_count = emitted, "persisting outputs");
        retry_transient(&self.retry, self.sleeper.as_ref(), "write_decisions", || {
            self.outputs.write_decisions(ctx, &decisions, &inputs)
        })?;
        retry_transient(&self.retry, self.sleeper.as_ref(), "write_evidence", || {
            self.outputs.write_evidence(ctx, &evidence_sets, &inputs, &decisions)
        })?;

        Ok(Execution::Completed {
            evaluated,
            emitted,
            state_counts: tally_states(&decisions),
        })
    }

    /// Records a terminal failure, logging registry errors.
    fn register_failed(&self, ctx: &RunContext, started_at: OffsetDateTime, message: &str) {
        let failure = RunFailure {
            started_at,
            completed_at: self.clock.now(),
            error_message: message.to_string(),
        };
        if let Err(err) = self.run_registry.register_run_failed(ctx, &failure) {
            warn!(error = %err, "run registry failure write failed");
        }
    }
}
