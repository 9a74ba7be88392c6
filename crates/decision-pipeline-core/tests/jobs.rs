// crates/decision-pipeline-core/tests/jobs.rs
// ============================================================================
// Module: Job Manager Tests
// Description: Status transitions, cancellation, cleanup, and worker tests.
// Purpose: Keep job status consistent with what the runner actually did.
// ============================================================================

//! ## Overview
//! Transitions are checked against a fixed clock; worker tests block the
//! inputs fetch on a channel so cancellation is observed deterministically.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;

use decision_pipeline_core::CancellationToken;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::Decision;
use decision_pipeline_core::DecisionState;
use decision_pipeline_core::EvidenceSet;
use decision_pipeline_core::FetchCapability;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::InputStream;
use decision_pipeline_core::InputsRepository;
use decision_pipeline_core::OutputsRepository;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::Registry;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::RunError;
use decision_pipeline_core::RunOutcome;
use decision_pipeline_core::RunSummary;
use decision_pipeline_core::Runner;
use decision_pipeline_core::StateCounts;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::primitives::BUILTIN_PRIMITIVE_VERSION;
use decision_pipeline_core::runtime::DEFAULT_JOB_MAX_AGE;
use decision_pipeline_core::runtime::FixedClock;
use decision_pipeline_core::runtime::InMemoryInputsRepository;
use decision_pipeline_core::runtime::InMemoryOutputsRepository;
use decision_pipeline_core::runtime::JobError;
use decision_pipeline_core::runtime::JobManager;
use decision_pipeline_core::runtime::JobState;
use decision_pipeline_core::runtime::StaticConfigProvider;
use serde_json::Map;
use serde_json::json;
use time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

fn manager() -> Arc<JobManager> {
    Arc::new(JobManager::with_clock(Arc::new(FixedClock::new(NOW))))
}

fn context(correlation_id: &str) -> RunContext {
    RunContext::new(
        TenantId::new("acme"),
        PrimitiveName::new("operational_risk"),
        PrimitiveVersion::new(BUILTIN_PRIMITIVE_VERSION),
        NOW,
        ConfigVersion::new("v1"),
        CorrelationId::new(correlation_id),
    )
}

fn summary(correlation_id: &str) -> RunSummary {
    RunSummary {
        tenant_id: TenantId::new("acme"),
        primitive_name: PrimitiveName::new("operational_risk"),
        primitive_version: PrimitiveVersion::new(BUILTIN_PRIMITIVE_VERSION),
        config_version: ConfigVersion::new("v1"),
        correlation_id: CorrelationId::new(correlation_id),
        emitted_count: 1,
        evaluated_count: 1,
        state_counts: StateCounts::from([(DecisionState::NotAtRisk, 1)]),
        duration_ms: 5,
    }
}

fn shopper(subject_id: &str) -> InputRecord {
    let mut facts = Map::new();
    facts.insert("last_trip_ts".to_string(), json!("2024-05-20"));
    InputRecord::new("shopper", subject_id, NOW, facts)
}

/// Inputs repository that blocks each fetch until the test releases it.
struct GatedInputs {
    release: Mutex<mpsc::Receiver<()>>,
    records: Vec<InputRecord>,
}

impl InputsRepository for GatedInputs {
    fn fetch_inputs<'a>(
        &'a self,
        _ctx: &RunContext,
        _capability: &FetchCapability,
    ) -> Result<InputStream<'a>, RepositoryError> {
        self.release
            .lock()
            .map_err(|_| RepositoryError::Store("gate poisoned".to_string()))?
            .recv()
            .map_err(|_| RepositoryError::Store("gate closed".to_string()))?;
        Ok(Box::new(self.records.clone().into_iter().map(Ok)))
    }
}

fn gated_runner() -> (
    Runner<StaticConfigProvider, GatedInputs, InMemoryOutputsRepository>,
    mpsc::Sender<()>,
    InMemoryOutputsRepository,
) {
    let (sender, receiver) = mpsc::channel();
    let outputs = InMemoryOutputsRepository::new();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        GatedInputs {
            release: Mutex::new(receiver),
            records: vec![shopper("s-1"), shopper("s-2")],
        },
        outputs.clone(),
        Arc::new(Registry::builtin()),
    );
    (runner, sender, outputs)
}

/// Outputs repository that requests cancellation of its own job mid-write.
struct CancelOnWrite {
    inner: InMemoryOutputsRepository,
    jobs: Arc<JobManager>,
    correlation_id: String,
}

impl OutputsRepository for CancelOnWrite {
    fn write_decisions(
        &self,
        ctx: &RunContext,
        decisions: &[Decision],
        inputs: &[InputRecord],
    ) -> Result<(), RepositoryError> {
        let requested = self
            .jobs
            .cancel_job(&self.correlation_id)
            .map_err(|err| RepositoryError::Store(err.to_string()))?;
        assert!(requested);
        self.inner.write_decisions(ctx, decisions, inputs)
    }

    fn write_evidence(
        &self,
        ctx: &RunContext,
        evidence_sets: &[EvidenceSet],
        inputs: &[InputRecord],
        decisions: &[Decision],
    ) -> Result<(), RepositoryError> {
        self.inner.write_evidence(ctx, evidence_sets, inputs, decisions)
    }
}

// ============================================================================
// SECTION: Transitions
// ============================================================================

/// Verifies registration and the running-id guard.
#[test]
fn register_job_tracks_running_ids() {
    let jobs = manager();
    let token = jobs.register_job("job-1", "acme", "operational_risk").unwrap();
    assert!(!token.is_cancelled());

    let status = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(status.state, JobState::Running);
    assert_eq!(status.tenant_id, "acme");
    assert_eq!(status.started_at, NOW);
    assert!(status.completed_at.is_none());

    let duplicate = jobs.register_job("job-1", "acme", "operational_risk");
    assert!(matches!(duplicate, Err(JobError::AlreadyRunning(ref id)) if id == "job-1"));

    jobs.complete_job("job-1", summary("job-1")).unwrap();
    jobs.register_job("job-1", "acme", "operational_risk").unwrap();
    let replaced = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(replaced.state, JobState::Running);
    assert!(replaced.result.is_none());
    assert!(jobs.get_job_status("missing").unwrap().is_none());
}

/// Verifies that the first terminal state wins.
#[test]
fn terminal_states_are_sticky() {
    let jobs = manager();
    jobs.register_job("job-1", "acme", "operational_risk").unwrap();
    jobs.complete_job("job-1", summary("job-1")).unwrap();
    jobs.fail_job("job-1", "late failure").unwrap();
    jobs.mark_cancelled("job-1").unwrap();

    let status = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.completed_at, Some(NOW));
    assert_eq!(status.result, Some(summary("job-1")));
    assert!(status.error.is_none());
    assert!(!jobs.cancel_job("job-1").unwrap());
    assert!(!jobs.cancel_job("missing").unwrap());
}

/// Verifies that failures keep their message.
#[test]
fn failed_jobs_record_error() {
    let jobs = manager();
    jobs.register_job("job-1", "acme", "operational_risk").unwrap();
    jobs.fail_job("job-1", "inputs unavailable").unwrap();
    let status = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.error.as_deref(), Some("inputs unavailable"));
    assert!(status.state.is_terminal());
}

/// Verifies that cancelling trips the token but leaves the outcome to the worker.
#[test]
fn cancel_job_trips_token() {
    let jobs = manager();
    let token = jobs.register_job("job-1", "acme", "operational_risk").unwrap();
    assert!(!jobs.is_cancelled("job-1").unwrap());

    assert!(jobs.cancel_job("job-1").unwrap());
    assert!(token.is_cancelled());
    assert!(jobs.is_cancelled("job-1").unwrap());
    let status = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(status.state, JobState::Running);
    assert!(status.cancel_requested);
    assert!(status.completed_at.is_none());
    assert!(!jobs.cancel_job("job-1").unwrap());

    jobs.mark_cancelled("job-1").unwrap();
    let status = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(status.state, JobState::Cancelled);
    assert_eq!(status.completed_at, Some(NOW));
    assert!(!jobs.cancel_job("job-1").unwrap());
}

/// Verifies that a requested cancel the runner never saw still completes.
#[test]
fn unobserved_cancel_request_yields_to_completion() {
    let jobs = manager();
    jobs.register_job("job-1", "acme", "operational_risk").unwrap();
    assert!(jobs.cancel_job("job-1").unwrap());
    jobs.complete_job("job-1", summary("job-1")).unwrap();

    let status = jobs.get_job_status("job-1").unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert!(status.cancel_requested);
    assert_eq!(status.result, Some(summary("job-1")));
}

/// Verifies that cleanup removes only finished jobs older than the cutoff.
#[test]
fn cleanup_removes_only_old_finished_jobs() {
    let jobs = manager();
    for id in ["done", "failed", "running"] {
        jobs.register_job(id, "acme", "operational_risk").unwrap();
    }
    jobs.complete_job("done", summary("done")).unwrap();
    jobs.fail_job("failed", "boom").unwrap();

    assert_eq!(jobs.cleanup_old_jobs(Duration::hours(1), NOW + Duration::minutes(30)).unwrap(), 0);
    assert_eq!(jobs.cleanup_old_jobs(Duration::hours(1), NOW + Duration::hours(2)).unwrap(), 2);
    assert!(jobs.get_job_status("done").unwrap().is_none());
    assert!(jobs.get_job_status("running").unwrap().is_some());
    assert_eq!(
        jobs.cleanup_old_jobs(DEFAULT_JOB_MAX_AGE, NOW + Duration::days(7)).unwrap(),
        0
    );
}

// ============================================================================
// SECTION: Workers
// ============================================================================

/// Verifies that a spawned run records its summary.
#[test]
fn spawned_job_records_completion() {
    let jobs = manager();
    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs("operational_risk_inputs", vec![shopper("s-1")]).unwrap();
    let outputs = InMemoryOutputsRepository::new();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        outputs.clone(),
        Arc::new(Registry::builtin()),
    );

    let handle = jobs.spawn(runner, context("job-ok")).unwrap();
    assert_eq!(handle.correlation_id(), "job-ok");
    let outcome = handle.join().unwrap();
    let RunOutcome::Completed(run) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(run.emitted_count, 1);

    let status = jobs.get_job_status("job-ok").unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.result, Some(run));
    assert_eq!(outputs.decision_rows().unwrap().len(), 1);
}

/// Verifies that a failing run marks the job failed and surfaces the error.
#[test]
fn spawned_job_records_failure() {
    let jobs = manager();
    let runner = Runner::new(
        StaticConfigProvider::new(),
        InMemoryInputsRepository::new(),
        InMemoryOutputsRepository::new(),
        Arc::new(Registry::builtin()),
    );

    let result = jobs.spawn(runner, context("job-bad")).unwrap().join();
    assert!(matches!(result, Err(JobError::Run(RunError::Config(_)))), "{result:?}");
    let status = jobs.get_job_status("job-bad").unwrap().unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("config not found"));
}

/// Verifies cancellation of a running worker and the duplicate-id guard.
#[test]
fn spawned_job_observes_cancellation() {
    let jobs = manager();
    let (runner, release, outputs) = gated_runner();
    let handle = jobs.spawn(runner, context("job-cancel")).unwrap();

    let (second, _second_release, _) = gated_runner();
    assert!(matches!(
        jobs.spawn(second, context("job-cancel")),
        Err(JobError::AlreadyRunning(_))
    ));

    assert!(jobs.cancel_job("job-cancel").unwrap());
    release.send(()).unwrap();
    let outcome = handle.join().unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(jobs.get_job_status("job-cancel").unwrap().unwrap().state, JobState::Cancelled);
    assert!(outputs.operations().unwrap().is_empty());
}

/// Verifies that a cancel arriving during the write leaves the job completed.
#[test]
fn cancel_during_write_records_completion() {
    let jobs = manager();
    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs("operational_risk_inputs", vec![shopper("s-1")]).unwrap();
    let persisted = InMemoryOutputsRepository::new();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        CancelOnWrite {
            inner: persisted.clone(),
            jobs: Arc::clone(&jobs),
            correlation_id: "job-late".to_string(),
        },
        Arc::new(Registry::builtin()),
    );

    let outcome = jobs.spawn(runner, context("job-late")).unwrap().join().unwrap();
    let RunOutcome::Completed(run) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(persisted.decision_rows().unwrap().len(), 1);

    let status = jobs.get_job_status("job-late").unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert!(status.cancel_requested);
    assert_eq!(status.result, Some(run));
}

/// Verifies that a handle cancels through the shared token.
#[test]
fn handle_cancel_reaches_worker() {
    let jobs = manager();
    let (runner, release, _) = gated_runner();
    let handle = jobs.spawn(runner, context("job-handle")).unwrap();
    handle.cancel();
    assert!(jobs.is_cancelled("job-handle").unwrap());
    release.send(()).unwrap();

    let outcome = handle.join().unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(jobs.get_job_status("job-handle").unwrap().unwrap().state, JobState::Cancelled);
}

/// Verifies that standalone tokens are shared across clones.
#[test]
fn cancellation_token_clones_share_state() {
    let token = CancellationToken::new();
    let clone = token.clone();
    clone.cancel();
    assert!(token.is_cancelled());
}
