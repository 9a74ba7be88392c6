// crates/decision-pipeline-core/tests/runner.rs
// ============================================================================
// Module: Runner Tests
// Description: End-to-end run lifecycle tests over in-memory adapters.
// Purpose: Pin persistence, cancellation, locking, readiness, and retry behavior.
// ============================================================================

//! ## Overview
//! Drives [`Runner`] with in-memory repositories, a fixed clock, and a
//! recording sleeper so every lifecycle branch is observable without I/O.

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

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use decision_pipeline_core::CancellationToken;
use decision_pipeline_core::ConfigProviderError;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::DecisionState;
use decision_pipeline_core::EvaluationError;
use decision_pipeline_core::EvaluationResult;
use decision_pipeline_core::FetchCapability;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::InputStream;
use decision_pipeline_core::InputsRepository;
use decision_pipeline_core::LockError;
use decision_pipeline_core::LockManager;
use decision_pipeline_core::Primitive;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::ReadinessVerdict;
use decision_pipeline_core::Registry;
use decision_pipeline_core::RegistryBuilder;
use decision_pipeline_core::RegistryError;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::RetryPolicy;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::RunError;
use decision_pipeline_core::RunOutcome;
use decision_pipeline_core::RunStatus;
use decision_pipeline_core::RunSummary;
use decision_pipeline_core::Runner;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::VersionInfo;
use decision_pipeline_core::primitives::BUILTIN_PRIMITIVE_VERSION;
use decision_pipeline_core::primitives::PrimitiveInput;
use decision_pipeline_core::runtime::CANCELLED_MESSAGE;
use decision_pipeline_core::runtime::FixedClock;
use decision_pipeline_core::runtime::InMemoryInputsRepository;
use decision_pipeline_core::runtime::InMemoryOutputsRepository;
use decision_pipeline_core::runtime::InMemoryRunRegistry;
use decision_pipeline_core::runtime::LocalLockManager;
use decision_pipeline_core::runtime::RecordingEventPublisher;
use decision_pipeline_core::runtime::Sleeper;
use decision_pipeline_core::runtime::StaticConfigProvider;
use decision_pipeline_core::runtime::StaticReadinessGate;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const AS_OF: OffsetDateTime = datetime!(2024-06-01 00:00 UTC);

type TestRunner<I> = Runner<StaticConfigProvider, I, InMemoryOutputsRepository>;

/// Sleeper that records requested delays instead of blocking.
#[derive(Debug, Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Inputs repository that cancels a token as it hands out a given row.
struct CancellingInputs {
    records: Vec<InputRecord>,
    cancel_at: usize,
    token: CancellationToken,
}

impl InputsRepository for CancellingInputs {
    fn fetch_inputs<'a>(
        &'a self,
        _ctx: &RunContext,
        _capability: &FetchCapability,
    ) -> Result<InputStream<'a>, RepositoryError> {
        Ok(Box::new(self.records.iter().enumerate().map(move |(index, record)| {
            if index == self.cancel_at {
                self.token.cancel();
            }
            Ok(record.clone())
        })))
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn context_for(primitive: &str, version: &str, correlation_id: &str) -> RunContext {
    RunContext::new(
        TenantId::new("acme"),
        PrimitiveName::new(primitive),
        PrimitiveVersion::new(version),
        AS_OF,
        ConfigVersion::new("v1"),
        CorrelationId::new(correlation_id),
    )
}

fn context(correlation_id: &str) -> RunContext {
    context_for("operational_risk", BUILTIN_PRIMITIVE_VERSION, correlation_id)
}

fn trip_records(count: usize) -> Vec<InputRecord> {
    (0..count)
        .map(|index| {
            InputRecord::new(
                "shopper",
                format!("s-{index}"),
                AS_OF,
                object(json!({ "last_trip_ts": format!("2024-05-{:02}", 10 + index) })),
            )
        })
        .collect()
}

fn seeded_inputs(records: Vec<InputRecord>) -> InMemoryInputsRepository {
    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs("operational_risk_inputs", records).unwrap();
    inputs
}

fn runner<I: InputsRepository>(
    inputs: I,
    outputs: &InMemoryOutputsRepository,
    sleeper: &Arc<RecordingSleeper>,
) -> TestRunner<I> {
    Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        outputs.clone(),
        Arc::new(Registry::builtin()),
    )
    .with_clock(Arc::new(FixedClock::new(AS_OF)))
    .with_sleeper(Arc::clone(sleeper) as Arc<dyn Sleeper + Send + Sync>)
}

fn completed(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Completed(summary) => summary,
        RunOutcome::Cancelled(cancelled) => panic!("unexpected cancellation: {cancelled:?}"),
    }
}

// ============================================================================
// SECTION: Completion
// ============================================================================

/// Verifies that a completed run persists rows, audits success, and publishes.
#[test]
fn completed_run_persists_and_reports() {
    let outputs = InMemoryOutputsRepository::new();
    let registry = InMemoryRunRegistry::new();
    let events = RecordingEventPublisher::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(seeded_inputs(trip_records(3)), &outputs, &sleeper)
        .with_run_registry(Arc::new(registry.clone()))
        .with_event_publisher(Arc::new(events.clone()));

    let ctx = context("corr-ok");
    let summary = completed(runner.run(&ctx, &CancellationToken::new()).unwrap());
    assert_eq!(summary.evaluated_count, 3);
    assert_eq!(summary.emitted_count, 3);
    assert_eq!(summary.duration_ms, 0);
    assert_eq!(summary.state_counts.values().sum::<u64>(), 3);

    let decisions = outputs.decision_rows().unwrap();
    assert_eq!(decisions.len(), 3);
    assert!(decisions.iter().all(|row| row.correlation_id == "corr-ok"));
    assert!(decisions.iter().all(|row| row.config_version == "v1"));
    assert_eq!(outputs.evidence_rows().unwrap().len(), 3);

    let record = registry.record("corr-ok").unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.input_count, Some(3));
    assert_eq!(record.decision_count, Some(3));
    assert_eq!(record.state_counts, summary.state_counts);
    assert_eq!(events.events().unwrap(), vec![summary]);
    assert!(sleeper.delays().is_empty());
}

/// Verifies that rerunning the same context leaves identical rows.
#[test]
fn rerun_is_idempotent() {
    let outputs = InMemoryOutputsRepository::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(seeded_inputs(trip_records(4)), &outputs, &sleeper);
    let ctx = context("corr-idem");

    runner.run(&ctx, &CancellationToken::new()).unwrap();
    let first_decisions = outputs.decision_rows().unwrap();
    let first_evidence = outputs.evidence_rows().unwrap();

    runner.run(&ctx, &CancellationToken::new()).unwrap();
    assert_eq!(outputs.decision_rows().unwrap(), first_decisions);
    assert_eq!(outputs.evidence_rows().unwrap(), first_evidence);
}

/// Verifies that sparse primitives count evaluated inputs but emit nothing.
#[test]
fn sparse_emission_counts_without_rows() {
    let capability = Registry::builtin().fetch_capability("shopper_weekly_ad_slate").unwrap();
    let inputs = InMemoryInputsRepository::new();
    let records = (0..2)
        .map(|index| {
            InputRecord::new(
                capability.subject_type,
                format!("s-{index}"),
                AS_OF,
                object(json!({ "candidates": [] })),
            )
        })
        .collect();
    inputs.set_inputs(capability.name, records).unwrap();
    let outputs = InMemoryOutputsRepository::new();
    let sleeper = Arc::new(RecordingSleeper::default());

    let ctx = context_for("shopper_weekly_ad_slate", BUILTIN_PRIMITIVE_VERSION, "corr-sparse");
    let summary =
        completed(runner(inputs, &outputs, &sleeper).run(&ctx, &CancellationToken::new()).unwrap());
    assert_eq!(summary.evaluated_count, 2);
    assert_eq!(summary.emitted_count, 0);
    assert!(summary.state_counts.is_empty());
    assert!(outputs.decision_rows().unwrap().is_empty());
}

/// Verifies that tenant settings from the provider reach the primitive.
#[test]
fn provider_settings_are_bound() {
    let outputs = InMemoryOutputsRepository::new();
    let provider = StaticConfigProvider::new().with_settings(
        "acme",
        "v1",
        "operational_risk",
        object(json!({ "at_risk_days": 1 })),
    );
    let runner = Runner::new(
        provider,
        seeded_inputs(trip_records(2)),
        outputs.clone(),
        Arc::new(Registry::builtin()),
    )
    .with_clock(Arc::new(FixedClock::new(AS_OF)));

    runner.run(&context("corr-settings"), &CancellationToken::new()).unwrap();
    let states: Vec<String> =
        outputs.decision_rows().unwrap().into_iter().map(|row| row.decision_state).collect();
    assert_eq!(states, vec!["AT_RISK", "AT_RISK"]);
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Verifies that cancellation mid-stream persists nothing and audits a failure.
#[test]
fn cancellation_mid_stream_persists_nothing() {
    let token = CancellationToken::new();
    let inputs = CancellingInputs {
        records: trip_records(5),
        cancel_at: 2,
        token: token.clone(),
    };
    let outputs = InMemoryOutputsRepository::new();
    let registry = InMemoryRunRegistry::new();
    let events = RecordingEventPublisher::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(inputs, &outputs, &sleeper)
        .with_run_registry(Arc::new(registry.clone()))
        .with_event_publisher(Arc::new(events.clone()));

    let outcome = runner.run(&context("corr-cancel"), &token).unwrap();
    assert!(outcome.is_cancelled());
    let RunOutcome::Cancelled(cancelled) = outcome else {
        panic!("expected cancellation");
    };
    assert_eq!(cancelled.evaluated_before_cancel, 2);
    assert_eq!(cancelled.correlation_id.as_str(), "corr-cancel");
    assert!(outputs.operations().unwrap().is_empty());
    assert!(events.events().unwrap().is_empty());

    let record = registry.record("corr-cancel").unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(CANCELLED_MESSAGE));
}

/// Verifies that a token cancelled before the run is observed after fetching.
#[test]
fn pre_cancelled_token_skips_persistence() {
    let outputs = InMemoryOutputsRepository::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let token = CancellationToken::new();
    token.cancel();

    let outcome = runner(seeded_inputs(Vec::new()), &outputs, &sleeper)
        .run(&context("corr-pre"), &token)
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Cancelled(ref run) if run.evaluated_before_cancel == 0));
    assert!(outcome.summary().is_none());
    assert!(outputs.operations().unwrap().is_empty());
}

// ============================================================================
// SECTION: Failures
// ============================================================================

/// Verifies that one bad input aborts the run before any write.
#[test]
fn evaluation_failure_aborts_run() {
    let mut records = trip_records(3);
    records[1].facts.insert("last_trip_ts".to_string(), json!("not-a-date"));
    let outputs = InMemoryOutputsRepository::new();
    let registry = InMemoryRunRegistry::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(seeded_inputs(records), &outputs, &sleeper)
        .with_run_registry(Arc::new(registry.clone()));

    let result = runner.run(&context("corr-bad"), &CancellationToken::new());
    let Err(RunError::Evaluation(EvaluationError::InvalidInput {
        subject_id,
        ..
    })) = result
    else {
        panic!("expected invalid input, got {result:?}");
    };
    assert_eq!(subject_id, "s-1");
    assert!(outputs.operations().unwrap().is_empty());

    let record = registry.record("corr-bad").unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error_message.unwrap().contains("s-1"));
}

/// Verifies that unknown primitives and versions fail before inputs are fetched.
#[test]
fn registry_errors_fail_before_fetch() {
    let inputs = seeded_inputs(trip_records(1));
    let outputs = InMemoryOutputsRepository::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(inputs.clone(), &outputs, &sleeper);

    let mismatch =
        runner.run(&context_for("operational_risk", "9.9.9", "corr-ver"), &CancellationToken::new());
    assert!(
        matches!(mismatch, Err(RunError::Registry(RegistryError::VersionMismatch { ref requested, .. })) if requested == "9.9.9"),
        "{mismatch:?}"
    );

    let unknown = runner.run(
        &context_for("no_such_primitive", BUILTIN_PRIMITIVE_VERSION, "corr-unknown"),
        &CancellationToken::new(),
    );
    assert!(matches!(unknown, Err(RunError::Registry(RegistryError::UnknownPrimitive(_)))));
    assert_eq!(inputs.fetch_count().unwrap(), 0);
}

/// Verifies that missing config fails the run without a registry record.
#[test]
fn missing_config_is_not_registered() {
    let registry = InMemoryRunRegistry::new();
    let runner = Runner::new(
        StaticConfigProvider::new(),
        seeded_inputs(trip_records(1)),
        InMemoryOutputsRepository::new(),
        Arc::new(Registry::builtin()),
    )
    .with_run_registry(Arc::new(registry.clone()));

    let result = runner.run(&context("corr-config"), &CancellationToken::new());
    assert!(matches!(result, Err(RunError::Config(ConfigProviderError::NotFound(_)))));
    assert!(registry.records().unwrap().is_empty());
}

/// Verifies that failing audit and event sinks do not change the outcome.
#[test]
fn side_channel_failures_do_not_mask_outcome() {
    let outputs = InMemoryOutputsRepository::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(seeded_inputs(trip_records(2)), &outputs, &sleeper)
        .with_run_registry(Arc::new(InMemoryRunRegistry::failing()))
        .with_event_publisher(Arc::new(RecordingEventPublisher::failing()));

    let summary = completed(runner.run(&context("corr-side"), &CancellationToken::new()).unwrap());
    assert_eq!(summary.emitted_count, 2);
    assert_eq!(outputs.decision_rows().unwrap().len(), 2);
}

// ============================================================================
// SECTION: Locking
// ============================================================================

/// Verifies that the lock is released after both success and failure.
#[test]
fn lock_is_released_after_every_run() {
    let locks = LocalLockManager::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let outputs = InMemoryOutputsRepository::new();
    let ok_runner = runner(seeded_inputs(trip_records(1)), &outputs, &sleeper)
        .with_lock_manager(Arc::new(locks.clone()));
    let ctx = context("corr-lock");

    ok_runner.run(&ctx, &CancellationToken::new()).unwrap();
    assert!(!locks.is_held(&ctx.lock_key()).unwrap());

    let mut bad = trip_records(1);
    bad[0].facts.insert("last_trip_ts".to_string(), json!("garbage"));
    let failing_runner = runner(seeded_inputs(bad), &outputs, &sleeper)
        .with_lock_manager(Arc::new(locks.clone()));
    assert!(failing_runner.run(&ctx, &CancellationToken::new()).is_err());
    assert!(!locks.is_held(&ctx.lock_key()).unwrap());

    locks.acquire(&ctx.lock_key()).unwrap();
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NoSettings {}

/// Registered primitive whose evaluator panics.
struct Exploding;

impl Primitive for Exploding {
    const NAME: &'static str = "exploding";
    const VERSION: &'static str = "1.0.0";
    const FETCH_CAPABILITY: FetchCapability = FetchCapability {
        name: "exploding_inputs",
        subject_type: "shopper",
    };
    const STATES: &'static [DecisionState] = &[DecisionState::Computed];

    type Config = NoSettings;
    type Facts = Map<String, Value>;

    fn evaluate(
        _input: &PrimitiveInput<Self::Facts>,
        _config: &Self::Config,
        _versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError> {
        panic!("evaluator exploded");
    }
}

/// Verifies that a panicking evaluator does not leave the lock held.
#[test]
fn lock_is_released_when_evaluator_panics() {
    let locks = LocalLockManager::new();
    let mut builder = RegistryBuilder::new();
    builder.register::<Exploding>().unwrap();
    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs("exploding_inputs", trip_records(1)).unwrap();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        InMemoryOutputsRepository::new(),
        Arc::new(builder.build()),
    )
    .with_clock(Arc::new(FixedClock::new(AS_OF)))
    .with_lock_manager(Arc::new(locks.clone()));
    let ctx = context_for("exploding", "1.0.0", "corr-panic");

    let result = catch_unwind(AssertUnwindSafe(|| runner.run(&ctx, &CancellationToken::new())));
    assert!(result.is_err());
    assert!(!locks.is_held(&ctx.lock_key()).unwrap());
    locks.acquire(&ctx.lock_key()).unwrap();
}

/// Verifies that a held lock rejects the run before anything is registered.
#[test]
fn held_lock_rejects_run() {
    let locks = LocalLockManager::new();
    let registry = InMemoryRunRegistry::new();
    let inputs = seeded_inputs(trip_records(1));
    let sleeper = Arc::new(RecordingSleeper::default());
    let runner = runner(inputs.clone(), &InMemoryOutputsRepository::new(), &sleeper)
        .with_lock_manager(Arc::new(locks.clone()))
        .with_run_registry(Arc::new(registry.clone()));
    let ctx = context("corr-held");
    locks.acquire(&ctx.lock_key()).unwrap();

    let result = runner.run(&ctx, &CancellationToken::new());
    assert!(matches!(result, Err(RunError::Lock(LockError::Held(_)))));
    assert!(registry.records().unwrap().is_empty());
    assert_eq!(inputs.fetch_count().unwrap(), 0);
    assert!(locks.is_held(&ctx.lock_key()).unwrap());
}

// ============================================================================
// SECTION: Readiness
// ============================================================================

/// Verifies that a failing verdict stops the run and other verdicts proceed.
#[test]
fn readiness_fails_closed_on_fail_only() {
    let sleeper = Arc::new(RecordingSleeper::default());

    let inputs = seeded_inputs(trip_records(1));
    let registry = InMemoryRunRegistry::new();
    let blocked = runner(inputs.clone(), &InMemoryOutputsRepository::new(), &sleeper)
        .with_run_registry(Arc::new(registry.clone()))
        .with_readiness_gate(Arc::new(StaticReadinessGate::verdict(ReadinessVerdict::Fail(
            "partition missing".to_string(),
        ))));
    let result = blocked.run(&context("corr-fail"), &CancellationToken::new());
    assert!(matches!(result, Err(RunError::NotReady(ref detail)) if detail == "partition missing"));
    assert_eq!(inputs.fetch_count().unwrap(), 0);
    assert!(registry.records().unwrap().is_empty());

    let gates = [
        StaticReadinessGate::verdict(ReadinessVerdict::Pass),
        StaticReadinessGate::verdict(ReadinessVerdict::Warn("late partition".to_string())),
        StaticReadinessGate::erroring("metadata store down"),
    ];
    for (index, gate) in gates.into_iter().enumerate() {
        let outputs = InMemoryOutputsRepository::new();
        let runner = runner(seeded_inputs(trip_records(1)), &outputs, &sleeper)
            .with_readiness_gate(Arc::new(gate));
        let outcome = runner.run(&context(&format!("corr-ready-{index}")), &CancellationToken::new());
        assert!(matches!(outcome, Ok(RunOutcome::Completed(_))), "{outcome:?}");
        assert_eq!(outputs.decision_rows().unwrap().len(), 1);
    }
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Verifies that transient fetch errors are retried with growing delays.
#[test]
fn transient_fetch_errors_are_retried() {
    let inputs = seeded_inputs(trip_records(2));
    inputs.push_failure(RepositoryError::Transient("connection reset".to_string())).unwrap();
    inputs.push_failure(RepositoryError::Transient("connection reset".to_string())).unwrap();
    let outputs = InMemoryOutputsRepository::new();
    let sleeper = Arc::new(RecordingSleeper::default());

    let summary = completed(
        runner(inputs.clone(), &outputs, &sleeper)
            .run(&context("corr-retry"), &CancellationToken::new())
            .unwrap(),
    );
    assert_eq!(summary.emitted_count, 2);
    assert_eq!(inputs.fetch_count().unwrap(), 3);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(1000), Duration::from_millis(2000)]);
}

/// Verifies that a transient write error is retried and the write completes.
#[test]
fn transient_write_errors_are_retried() {
    let outputs = InMemoryOutputsRepository::new();
    outputs.push_failure(RepositoryError::Transient("deadlock".to_string())).unwrap();
    let sleeper = Arc::new(RecordingSleeper::default());

    runner(seeded_inputs(trip_records(1)), &outputs, &sleeper)
        .run(&context("corr-write"), &CancellationToken::new())
        .unwrap();
    assert_eq!(
        outputs.operations().unwrap(),
        vec!["merge_decisions", "merge_decisions", "merge_evidence"]
    );
    assert_eq!(outputs.decision_rows().unwrap().len(), 1);
    assert_eq!(sleeper.delays().len(), 1);
}

/// Verifies that permanent errors and exhausted retries surface immediately.
#[test]
fn permanent_and_exhausted_errors_fail_the_run() {
    let sleeper = Arc::new(RecordingSleeper::default());

    let inputs = seeded_inputs(trip_records(1));
    inputs.push_failure(RepositoryError::Store("table missing".to_string())).unwrap();
    let result = runner(inputs.clone(), &InMemoryOutputsRepository::new(), &sleeper)
        .run(&context("corr-perm"), &CancellationToken::new());
    assert!(matches!(result, Err(RunError::Repository(RepositoryError::Store(_)))));
    assert_eq!(inputs.fetch_count().unwrap(), 1);

    let inputs = seeded_inputs(trip_records(1));
    for _ in 0..2 {
        inputs.push_failure(RepositoryError::Transient("timeout".to_string())).unwrap();
    }
    let result = runner(inputs.clone(), &InMemoryOutputsRepository::new(), &sleeper)
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        })
        .run(&context("corr-exhausted"), &CancellationToken::new());
    assert!(matches!(result, Err(RunError::Repository(RepositoryError::Transient(_)))));
    assert_eq!(inputs.fetch_count().unwrap(), 2);
}

/// Verifies the backoff schedule and its cap.
#[test]
fn retry_delays_grow_and_cap() {
    let policy = RetryPolicy {
        max_attempts: 5,
        initial_delay_ms: 100,
        multiplier: 3.0,
        max_delay_ms: 500,
    };
    assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    assert_eq!(policy.delay_after(2), Duration::from_millis(300));
    assert_eq!(policy.delay_after(3), Duration::from_millis(500));
    assert_eq!(RetryPolicy::none().max_attempts, 1);
}
