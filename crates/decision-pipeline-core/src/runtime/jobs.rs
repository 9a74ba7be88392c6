// crates/decision-pipeline-core/src/runtime/jobs.rs
// ============================================================================
// Module: Decision Pipeline Job Manager
// Description: Shared status store and background workers for runs.
// Purpose: Let callers start runs, poll their status, and cancel them.
// Dependencies: crate::{core, interfaces, runtime}, serde, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! The [`JobManager`] tracks one [`JobStatus`] and one [`CancellationToken`]
//! per correlation id. A single mutex serializes every access. Jobs start
//! `running` and move once to `completed`, `failed`, or `cancelled`; later
//! transitions for the same job are ignored.
//!
//! [`JobManager::cancel_job`] only trips the token and flags the request.
//! The terminal state comes from what the runner actually did, so a cancel
//! that lands after the last cancellation check still ends `completed`.
//!
//! [`JobManager::spawn`] runs a [`Runner`] on a dedicated thread and records
//! its outcome, so callers only need the correlation id to follow the run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread::JoinHandle;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::Duration;
use time::OffsetDateTime;
use tracing::warn;

use crate::core::context::RunContext;
use crate::core::summary::RunSummary;
use crate::interfaces::Clock;
use crate::interfaces::ConfigProvider;
use crate::interfaces::InputsRepository;
use crate::interfaces::OutputsRepository;
use crate::runtime::cancellation::CancellationToken;
use crate::runtime::memory::SystemClock;
use crate::runtime::runner::RunError;
use crate::runtime::runner::RunOutcome;
use crate::runtime::runner::Runner;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Age after which finished jobs are removed by default.
pub const DEFAULT_JOB_MAX_AGE: Duration = Duration::hours(24);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Job manager errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// A running job already uses the correlation id.
    #[error("job already running: {0}")]
    AlreadyRunning(String),
    /// The status store mutex was poisoned.
    #[error("job manager state unavailable")]
    Poisoned,
    /// The worker thread could not be started.
    #[error("job worker spawn failed: {0}")]
    Spawn(String),
    /// The worker thread panicked.
    #[error("job worker panicked: {0}")]
    WorkerPanicked(String),
    /// The run itself failed.
    #[error(transparent)]
    Run(#[from] RunError),
}

// ============================================================================
// SECTION: Job Status
// ============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Run in progress.
    Running,
    /// Run persisted its outputs.
    Completed,
    /// Run was cancelled.
    Cancelled,
    /// Run failed.
    Failed,
}

impl JobState {
    /// Returns true for finished jobs.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Caller-visible status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Correlation identifier.
    pub correlation_id: String,
    /// Tenant identifier.
    pub tenant_id: String,
    /// Primitive name.
    pub primitive_name: String,
    /// Current state.
    pub state: JobState,
    /// Registration time.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Time the job finished.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Summary of a completed run.
    #[serde(default)]
    pub result: Option<RunSummary>,
    /// Error message of a failed run.
    #[serde(default)]
    pub error: Option<String>,
    /// Set once cancellation was requested, whether or not the run observed it.
    #[serde(default)]
    pub cancel_requested: bool,
}

/// Status plus cancellation token for one job.
#[derive(Debug)]
struct JobEntry {
    /// Caller-visible status.
    status: JobStatus,
    /// Token shared with the running job.
    token: CancellationToken,
}

// ============================================================================
// SECTION: Job Manager
// ============================================================================

/// Shared job status store keyed by correlation id.
pub struct JobManager {
    /// Jobs keyed by correlation id.
    jobs: Mutex<BTreeMap<String, JobEntry>>,
    /// Clock stamping transitions.
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager").finish_non_exhaustive()
    }
}

impl JobManager {
    /// Creates a manager stamping transitions with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a manager with an explicit clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Locks the job map.
    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, JobEntry>>, JobError> {
        self.jobs.lock().map_err(|_| JobError::Poisoned)
    }

    /// Registers a running job and returns its cancellation token.
    ///
    /// A finished job with the same id is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyRunning`] when a running job uses the id.
    pub fn register_job(
        &self,
        correlation_id: &str,
        tenant_id: &str,
        primitive_name: &str,
    ) -> Result<CancellationToken, JobError> {
        let now = self.clock.now();
        let mut jobs = self.lock()?;
        if jobs.get(correlation_id).is_some_and(|entry| !entry.status.state.is_terminal()) {
            return Err(JobError::AlreadyRunning(correlation_id.to_string()));
        }
        let token = CancellationToken::new();
        jobs.insert(
            correlation_id.to_string(),
            JobEntry {
                status: JobStatus {
                    correlation_id: correlation_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    primitive_name: primitive_name.to_string(),
                    state: JobState::Running,
                    started_at: now,
                    completed_at: None,
                    result: None,
                    error: None,
                    cancel_requested: false,
                },
                token: token.clone(),
            },
        );
        drop(jobs);
        Ok(token)
    }

    /// Returns true when the job's token was cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn is_cancelled(&self, correlation_id: &str) -> Result<bool, JobError> {
        Ok(self.lock()?.get(correlation_id).is_some_and(|entry| entry.token.is_cancelled()))
    }

    /// Requests cancellation of a running job.
    ///
    /// The job stays `running` until its worker reports an outcome. Returns
    /// false for unknown or finished jobs and for repeated requests.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn cancel_job(&self, correlation_id: &str) -> Result<bool, JobError> {
        let mut jobs = self.lock()?;
        let Some(entry) = jobs.get_mut(correlation_id) else {
            return Ok(false);
        };
        if entry.status.state != JobState::Running || entry.status.cancel_requested {
            return Ok(false);
        }
        entry.token.cancel();
        entry.status.cancel_requested = true;
        drop(jobs);
        Ok(true)
    }

    /// Marks a running job completed with its summary.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn complete_job(&self, correlation_id: &str, summary: RunSummary) -> Result<(), JobError> {
        self.finish(correlation_id, JobState::Completed, |status| status.result = Some(summary))
    }

    /// Marks a running job failed with an error message.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn fail_job(&self, correlation_id: &str, error: &str) -> Result<(), JobError> {
        self.finish(correlation_id, JobState::Failed, |status| {
            status.error = Some(error.to_string());
        })
    }

    /// Marks a running job cancelled after its runner observed the token.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn mark_cancelled(&self, correlation_id: &str) -> Result<(), JobError> {
        self.finish(correlation_id, JobState::Cancelled, |_| {})
    }

    /// Applies a terminal transition to a running job.
    fn finish(
        &self,
        correlation_id: &str,
        state: JobState,
        apply: impl FnOnce(&mut JobStatus),
    ) -> Result<(), JobError> {
        let now = self.clock.now();
        let mut jobs = self.lock()?;
        if let Some(entry) = jobs.get_mut(correlation_id)
            && entry.status.state == JobState::Running
        {
            entry.status.state = state;
            entry.status.completed_at = Some(now);
            apply(&mut entry.status);
        }
        drop(jobs);
        Ok(())
    }

    /// Returns a job's status.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn get_job_status(&self, correlation_id: &str) -> Result<Option<JobStatus>, JobError> {
        Ok(self.lock()?.get(correlation_id).map(|entry| entry.status.clone()))
    }

    /// Removes finished jobs that completed more than `max_age` before `now`.
    /// Returns the number of jobs removed.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Poisoned`] when the store is unavailable.
    pub fn cleanup_old_jobs(
        &self,
        max_age: Duration,
        now: OffsetDateTime,
    ) -> Result<usize, JobError> {
        let cutoff = now - max_age;
        let mut jobs = self.lock()?;
        let before = jobs.len();
        jobs.retain(|_, entry| {
            !(entry.status.state.is_terminal()
                && entry.status.completed_at.is_some_and(|completed| completed < cutoff))
        });
        Ok(before - jobs.len())
    }

    /// Registers a job and runs it on a worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyRunning`] when the id is in use, or
    /// [`JobError::Spawn`] when the thread cannot be started.
    pub fn spawn<C, I, O>(
        self: &Arc<Self>,
        runner: Runner<C, I, O>,
        ctx: RunContext,
    ) -> Result<JobHandle, JobError>
    where
        C: ConfigProvider + Send + 'static,
        I: InputsRepository + Send + 'static,
        O: OutputsRepository + Send + 'static,
    {
        let correlation_id = ctx.correlation_id().to_string();
        let token = self.register_job(
            &correlation_id,
            ctx.tenant_id().as_str(),
            ctx.primitive_name().as_str(),
        )?;
        let manager = Arc::clone(self);
        let worker_token = token.clone();
        let worker_id = correlation_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("decision-run-{correlation_id}"))
            .spawn(move || {
                let outcome = runner.run(&ctx, &worker_token);
                let recorded = match &outcome {
                    Ok(RunOutcome::Completed(summary)) => {
                        manager.complete_job(&worker_id, summary.clone())
                    }
                    Ok(RunOutcome::Cancelled(_)) => manager.mark_cancelled(&worker_id),
                    Err(err) => manager.fail_job(&worker_id, &err.to_string()),
                };
                if let Err(err) = recorded {
                    warn!(correlation_id = %worker_id, error = %err, "job status update failed");
                }
                outcome
            });
        match spawned {
            Ok(thread) => Ok(JobHandle {
                correlation_id,
                token,
                thread,
            }),
            Err(err) => {
                let message = err.to_string();
                if let Err(update) = self.fail_job(&correlation_id, &message) {
                    warn!(correlation_id = %correlation_id, error = %update, "job status update failed");
                }
                Err(JobError::Spawn(message))
            }
        }
    }
}

// ============================================================================
// SECTION: Job Handle
// ============================================================================

/// Handle to a spawned job.
#[derive(Debug)]
pub struct JobHandle {
    /// Correlation identifier.
    correlation_id: String,
    /// Token shared with the worker.
    token: CancellationToken,
    /// Worker thread.
    thread: JoinHandle<Result<RunOutcome, RunError>>,
}

impl JobHandle {
    /// Returns the job's correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Requests cancellation directly through the token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the worker and returns the run outcome.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Run`] when the run failed, or
    /// [`JobError::WorkerPanicked`] when the worker thread panicked.
    pub fn join(self) -> Result<RunOutcome, JobError> {
        let outcome = self
            .thread
            .join()
            .map_err(|_| JobError::WorkerPanicked(self.correlation_id.clone()))?;
        outcome.map_err(JobError::from)
    }
}
