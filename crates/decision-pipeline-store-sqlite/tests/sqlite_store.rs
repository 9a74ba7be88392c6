// crates/decision-pipeline-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Output Store Tests
// Description: Integration tests for the SQLite outputs repository.
// Purpose: Validate schema provisioning, idempotent upserts, and run registry
//          transitions.
// ============================================================================

//! ## Overview
//! Exercises [`SqliteOutputStore`] end to end:
//! - Path and batch limits
//! - Schema creation, versioning, and provisioning verification
//! - Idempotent reruns in merge and delete-insert modes
//! - Run registry lifecycle through the runner

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

use std::path::Path;
use std::sync::Arc;

use decision_pipeline_core::CancellationToken;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::Registry;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::RunCompletion;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::RunFailure;
use decision_pipeline_core::RunRegistry;
use decision_pipeline_core::RunStatus;
use decision_pipeline_core::Runner;
use decision_pipeline_core::StateCounts;
use decision_pipeline_core::SubjectId;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::UpsertBackend;
use decision_pipeline_core::WriteMode;
use decision_pipeline_core::runtime::FixedClock;
use decision_pipeline_core::runtime::InMemoryInputsRepository;
use decision_pipeline_core::runtime::StaticConfigProvider;
use decision_pipeline_store_sqlite::SCHEMA_VERSION;
use decision_pipeline_store_sqlite::SqliteOutputStore;
use decision_pipeline_store_sqlite::SqliteStoreConfig;
use decision_pipeline_store_sqlite::SqliteStoreError;
use decision_pipeline_store_sqlite::parse_sqlite_version;
use decision_pipeline_store_sqlite::supports_upsert_syntax;
use proptest::prelude::*;
use rusqlite::Connection;
use rusqlite::params;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use time::Duration;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const PRIMITIVE: &str = "operational_risk";
const CAPABILITY: &str = "operational_risk_inputs";

fn as_of() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_717_200_000).unwrap()
}

fn context(correlation_id: &str) -> RunContext {
    RunContext::new(
        TenantId::new("acme"),
        PrimitiveName::new(PRIMITIVE),
        PrimitiveVersion::new("1.0.0"),
        as_of(),
        ConfigVersion::new("v1"),
        CorrelationId::new(correlation_id),
    )
}

fn facts(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("facts must be an object"),
    }
}

fn shopper_inputs() -> Vec<InputRecord> {
    vec![
        InputRecord::new(
            "shopper",
            SubjectId::new("s-1"),
            as_of(),
            facts(json!({ "last_trip_ts": "2024-03-01T00:00:00Z" })),
        ),
        InputRecord::new(
            "shopper",
            SubjectId::new("s-2"),
            as_of(),
            facts(json!({ "last_trip_ts": "2024-05-30T00:00:00Z" })),
        ),
        InputRecord::new("shopper", SubjectId::new("s-3"), as_of(), Map::new()),
    ]
}

fn store_config(dir: &TempDir) -> SqliteStoreConfig {
    SqliteStoreConfig::new(dir.path().join("outputs.sqlite"))
}

fn open_store(config: SqliteStoreConfig) -> SqliteOutputStore {
    SqliteOutputStore::open(config).expect("open store")
}

fn run_once(store: &SqliteOutputStore, correlation_id: &str) {
    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs(CAPABILITY, shopper_inputs()).unwrap();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        store.clone(),
        Arc::new(Registry::builtin()),
    )
    .with_run_registry(Arc::new(store.clone()))
    .with_clock(Arc::new(FixedClock::new(as_of())));
    let outcome = runner.run(&context(correlation_id), &CancellationToken::new()).unwrap();
    assert_eq!(outcome.summary().unwrap().emitted_count, 3);
}

fn rewrite_meta_version(path: &Path, version: i64) {
    let connection = Connection::open(path).unwrap();
    connection.execute("UPDATE store_meta SET version = ?1", params![version]).unwrap();
}

// ============================================================================
// SECTION: Config Validation
// ============================================================================

/// Verifies that directories, overlong components, and bad batch sizes are rejected.
#[test]
fn open_rejects_invalid_paths_and_batch_sizes() {
    let dir = TempDir::new().unwrap();

    let directory = SqliteStoreConfig::new(dir.path());
    assert!(matches!(SqliteOutputStore::open(directory), Err(SqliteStoreError::Invalid(_))));

    let overlong = SqliteStoreConfig::new(dir.path().join("a".repeat(300)));
    assert!(matches!(SqliteOutputStore::open(overlong), Err(SqliteStoreError::Invalid(_))));

    let mut zero_batch = store_config(&dir);
    zero_batch.batch_size = 0;
    assert!(matches!(zero_batch.validate(), Err(SqliteStoreError::Invalid(_))));

    let mut huge_batch = store_config(&dir);
    huge_batch.batch_size = 10_001;
    assert!(matches!(huge_batch.validate(), Err(SqliteStoreError::Invalid(_))));
}

/// Verifies that version strings are parsed and compared against 3.24.0.
#[test]
fn merge_support_follows_library_version() {
    assert_eq!(parse_sqlite_version("3.45.1"), Some((3, 45, 1)));
    assert_eq!(parse_sqlite_version("3.24"), Some((3, 24, 0)));
    assert_eq!(parse_sqlite_version("garbage"), None);
    assert!(supports_upsert_syntax((3, 24, 0)));
    assert!(supports_upsert_syntax((3, 45, 1)));
    assert!(!supports_upsert_syntax((3, 23, 9)));
}

/// Verifies that busy errors surface as transient repository errors.
#[test]
fn busy_errors_are_transient() {
    let error = RepositoryError::from(SqliteStoreError::Busy("database is locked".to_string()));
    assert!(error.is_transient());
    let error = RepositoryError::from(SqliteStoreError::Db("syntax error".to_string()));
    assert!(!error.is_transient());
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Verifies that a new database is created with the current schema version.
#[test]
fn open_creates_schema_and_detects_merge() {
    let dir = TempDir::new().unwrap();
    let config = store_config(&dir);
    let path = config.path.clone();
    let store = open_store(config);
    assert!(store.supports_merge());
    assert!(store.decision_rows().unwrap().is_empty());

    let connection = Connection::open(path).unwrap();
    let version: i64 =
        connection.query_row("SELECT version FROM store_meta", params![], |row| row.get(0)).unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

/// Verifies that reopening an existing store keeps its rows.
#[test]
fn reopen_preserves_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_store(store_config(&dir));
    run_once(&store, "run-1");
    drop(store);

    let reopened = open_store(store_config(&dir));
    assert_eq!(reopened.decision_rows().unwrap().len(), 3);
}

/// Verifies that an unknown schema version is refused.
#[test]
fn open_rejects_unknown_schema_version() {
    let dir = TempDir::new().unwrap();
    let config = store_config(&dir);
    drop(open_store(config.clone()));
    rewrite_meta_version(&config.path, SCHEMA_VERSION + 1);

    let result = SqliteOutputStore::open(config);
    assert!(matches!(result, Err(SqliteStoreError::VersionMismatch(_))));
}

/// Verifies that an empty database fails provisioning when creation is disabled.
#[test]
fn unprovisioned_database_names_every_table() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir);
    config.create_schema = false;

    let Err(SqliteStoreError::Provisioning(details)) = SqliteOutputStore::open(config) else {
        panic!("expected provisioning error");
    };
    assert_eq!(details.table_names, vec!["decisions", "evidence", "run_registry"]);
    assert_eq!(details.suggested_command.as_deref(), Some("decision-pipeline store init"));
}

/// Verifies that a table missing a column is reported alone.
#[test]
fn incomplete_table_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = store_config(&dir);
    drop(open_store(config.clone()));
    {
        let connection = Connection::open(&config.path).unwrap();
        connection
            .execute_batch(
                "DROP TABLE decisions;
                 CREATE TABLE decisions (tenant_id TEXT NOT NULL, subject_id TEXT NOT NULL);",
            )
            .unwrap();
    }
    let mut verify_only = config;
    verify_only.create_schema = false;

    let Err(SqliteStoreError::Provisioning(details)) = SqliteOutputStore::open(verify_only) else {
        panic!("expected provisioning error");
    };
    assert_eq!(details.table_names, vec!["decisions"]);
    assert!(details.message.contains("decision_state"));
    let repository_error = RepositoryError::from(SqliteStoreError::Provisioning(details));
    assert!(matches!(repository_error, RepositoryError::Provisioning(_)));
}

/// Verifies that a provisioned database opens without schema creation.
#[test]
fn provisioned_database_opens_without_creation() {
    let dir = TempDir::new().unwrap();
    let config = store_config(&dir);
    drop(open_store(config.clone()));
    let mut verify_only = config;
    verify_only.create_schema = false;
    assert!(SqliteOutputStore::open(verify_only).is_ok());
}

// ============================================================================
// SECTION: Idempotent Writes
// ============================================================================

/// Verifies that rerunning the same context leaves byte-identical rows.
#[test]
fn rerun_leaves_rows_byte_identical() {
    let dir = TempDir::new().unwrap();
    let store = open_store(store_config(&dir));

    run_once(&store, "run-1");
    let decisions = store.decision_rows().unwrap();
    let evidence = store.evidence_rows().unwrap();
    run_once(&store, "run-1");

    assert_eq!(decisions.len(), 3);
    assert_eq!(evidence.len(), 3);
    assert_eq!(store.decision_rows().unwrap(), decisions);
    assert_eq!(store.evidence_rows().unwrap(), evidence);
}

/// Verifies that delete-insert mode converges on the same rows as merge mode.
#[test]
fn delete_insert_matches_merge() {
    let merge_dir = TempDir::new().unwrap();
    let mut merge_config = store_config(&merge_dir);
    merge_config.write_mode = WriteMode::Merge;
    let merge_store = open_store(merge_config);
    run_once(&merge_store, "run-1");

    let delete_dir = TempDir::new().unwrap();
    let mut delete_config = store_config(&delete_dir);
    delete_config.write_mode = WriteMode::DeleteInsert;
    delete_config.batch_size = 2;
    let delete_store = open_store(delete_config);
    run_once(&delete_store, "run-1");
    run_once(&delete_store, "run-1");

    assert_eq!(delete_store.decision_rows().unwrap(), merge_store.decision_rows().unwrap());
    assert_eq!(delete_store.evidence_rows().unwrap(), merge_store.evidence_rows().unwrap());
}

/// Verifies that a failed insert rolls back the delete of the same batch.
#[test]
fn delete_insert_batch_is_atomic() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir);
    config.write_mode = WriteMode::DeleteInsert;
    let path = config.path.clone();
    let store = open_store(config);
    run_once(&store, "run-1");
    let before = store.decision_rows().unwrap();
    let before_evidence = store.evidence_rows().unwrap();

    let connection = Connection::open(&path).unwrap();
    connection
        .execute_batch(
            "CREATE TRIGGER reject_run_2 BEFORE INSERT ON decisions \
             WHEN NEW.correlation_id = 'run-2' BEGIN SELECT RAISE(ABORT, 'rejected'); END; \
             CREATE TRIGGER reject_run_2_evidence BEFORE INSERT ON evidence \
             WHEN NEW.correlation_id = 'run-2' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
    drop(connection);

    let mut rows = before.clone();
    for row in &mut rows {
        row.correlation_id = "run-2".to_string();
    }
    assert!(store.replace_decisions(&rows).is_err());
    assert_eq!(store.decision_rows().unwrap(), before);

    let mut evidence = before_evidence.clone();
    for row in &mut evidence {
        row.correlation_id = "run-2".to_string();
    }
    assert!(store.replace_evidence(&evidence).is_err());
    assert_eq!(store.evidence_rows().unwrap(), before_evidence);
}

/// Verifies that a rerun under a new correlation id overwrites the audit column only.
#[test]
fn rerun_with_new_correlation_updates_rows_in_place() {
    let dir = TempDir::new().unwrap();
    let store = open_store(store_config(&dir));
    run_once(&store, "run-1");
    run_once(&store, "run-2");

    let rows = store.decision_rows().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.correlation_id == "run-2"));
    let states: Vec<&str> = rows.iter().map(|row| row.decision_state.as_str()).collect();
    assert_eq!(states, vec!["AT_RISK", "NOT_AT_RISK", "UNKNOWN"]);
}

// ============================================================================
// SECTION: Run Registry
// ============================================================================

/// Verifies that the runner records a successful run with counts.
#[test]
fn runner_records_success_in_registry() {
    let dir = TempDir::new().unwrap();
    let store = open_store(store_config(&dir));
    run_once(&store, "run-1");

    let record = store.run_record(&CorrelationId::new("run-1")).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.input_count, Some(3));
    assert_eq!(record.decision_count, Some(3));
    assert_eq!(record.state_counts.values().sum::<u64>(), 3);
    assert_eq!(record.duration_ms, Some(0));
    assert!(record.error_message.is_none());
}

/// Verifies that terminal transitions happen exactly once.
#[test]
fn registry_transitions_are_single_shot() {
    let dir = TempDir::new().unwrap();
    let store = open_store(store_config(&dir));
    let ctx = context("run-9");
    let started_at = as_of();
    let completed_at = as_of() + Duration::seconds(2);

    store.register_run_started(&ctx, "v1", started_at).unwrap();
    let started = store.run_record(ctx.correlation_id()).unwrap().unwrap();
    assert_eq!(started.status, RunStatus::Started);
    assert_eq!(started.canonical_version, "v1");

    store
        .register_run_failed(
            &ctx,
            &RunFailure {
                started_at,
                completed_at,
                error_message: "boom".to_string(),
            },
        )
        .unwrap();
    let failed = store.run_record(ctx.correlation_id()).unwrap().unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.duration_ms, Some(2_000));
    assert_eq!(failed.error_message.as_deref(), Some("boom"));

    let completion = RunCompletion {
        started_at,
        completed_at,
        input_count: 1,
        decision_count: 1,
        state_counts: StateCounts::new(),
    };
    assert!(store.register_run_completed(&ctx, &completion).is_err());
    assert!(store.register_run_completed(&context("never-started"), &completion).is_err());
    assert!(store.run_record(&CorrelationId::new("never-started")).unwrap().is_none());
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    /// Verifies that rendered versions parse back and gate merge at 3.24.0.
    #[test]
    fn version_detection_matches_tuple_order(major in 0u32..5, minor in 0u32..60, patch in 0u32..20) {
        let parsed = parse_sqlite_version(&format!("{major}.{minor}.{patch}"));
        prop_assert_eq!(parsed, Some((major, minor, patch)));
        prop_assert_eq!(supports_upsert_syntax((major, minor, patch)), (major, minor, patch) >= (3, 24, 0));
    }
}
