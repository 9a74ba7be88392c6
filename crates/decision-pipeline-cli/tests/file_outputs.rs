// crates/decision-pipeline-cli/tests/file_outputs.rs
// ============================================================================
// Module: File Outputs Repository Tests
// Description: Upsert and layout tests for the JSON Lines output store.
// Purpose: Ensure local runs keep their outputs and reruns replace them in place.
// ============================================================================

//! ## Overview
//! Drives full runs into [`FileOutputsRepository`] and inspects the files.

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

use std::fs;
use std::path::Path;
use std::sync::Arc;

use decision_pipeline_cli::FileOutputsRepository;
use decision_pipeline_core::CancellationToken;
use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::DecisionRow;
use decision_pipeline_core::EvidenceRow;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::Registry;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::RunOutcome;
use decision_pipeline_core::Runner;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::UpsertOptions;
use decision_pipeline_core::WriteMode;
use decision_pipeline_core::runtime::InMemoryInputsRepository;
use decision_pipeline_core::runtime::StaticConfigProvider;
use serde_json::Map;
use serde_json::json;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn as_of() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_717_200_000).unwrap()
}

fn context(tenant: &str, correlation_id: &str) -> RunContext {
    RunContext::new(
        TenantId::new(tenant),
        PrimitiveName::new("operational_risk"),
        PrimitiveVersion::new("1.0.0"),
        as_of(),
        ConfigVersion::new("v1"),
        CorrelationId::new(correlation_id),
    )
}

fn shoppers(count: usize) -> Vec<InputRecord> {
    (0..count)
        .map(|index| {
            let mut facts = Map::new();
            facts.insert("last_trip_ts".to_string(), json!(format!("2024-05-{:02}", 10 + index)));
            InputRecord::new("shopper", format!("s-{index}"), as_of(), facts)
        })
        .collect()
}

fn run_into(outputs: FileOutputsRepository, ctx: &RunContext, records: Vec<InputRecord>) {
    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs("operational_risk_inputs", records).unwrap();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        outputs,
        Arc::new(Registry::builtin()),
    );
    let outcome = runner.run(ctx, &CancellationToken::new()).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

fn open(dir: &Path) -> FileOutputsRepository {
    FileOutputsRepository::open(dir, UpsertOptions::default()).unwrap()
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Verifies that a run writes one canonical JSON line per row per file.
#[test]
fn run_writes_decision_and_evidence_files() {
    let dir = tempfile::tempdir().unwrap();
    let outputs = open(&dir.path().join("out"));
    let decisions_path = outputs.decisions_path("operational_risk");
    let evidence_path = outputs.evidence_path("operational_risk");
    run_into(outputs, &context("acme", "corr-1"), shoppers(3));

    assert!(decisions_path.ends_with("operational_risk_decisions.jsonl"));
    let decision_lines = lines(&decisions_path);
    assert_eq!(decision_lines.len(), 3);
    for line in &decision_lines {
        let row: DecisionRow = serde_json::from_str(line).unwrap();
        assert_eq!(row.key.tenant_id, "acme");
        assert_eq!(row.correlation_id, "corr-1");
        let reencoded = serde_jcs::to_string(&row).unwrap();
        assert_eq!(&reencoded, line);
    }
    let evidence_lines = lines(&evidence_path);
    assert_eq!(evidence_lines.len(), 3);
    let evidence: EvidenceRow = serde_json::from_str(&evidence_lines[0]).unwrap();
    assert_eq!(evidence.key.decision.subject_id, "s-0");
    assert!(!dir.path().join("out").join("operational_risk_decisions.jsonl.tmp").exists());
}

/// Verifies that reruns replace rows by natural key and stay byte-identical.
#[test]
fn reruns_replace_rows_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let decisions_path = open(dir.path()).decisions_path("operational_risk");

    run_into(open(dir.path()), &context("acme", "corr-1"), shoppers(2));
    let first = fs::read(&decisions_path).unwrap();
    run_into(open(dir.path()), &context("acme", "corr-1"), shoppers(2));
    assert_eq!(fs::read(&decisions_path).unwrap(), first);

    run_into(open(dir.path()), &context("acme", "corr-2"), shoppers(2));
    let rows: Vec<DecisionRow> = lines(&decisions_path)
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.correlation_id == "corr-2"));
}

/// Verifies that rows of other tenants survive a write.
#[test]
fn other_tenants_rows_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    run_into(open(dir.path()), &context("acme", "corr-a"), shoppers(2));
    run_into(open(dir.path()), &context("globex", "corr-g"), shoppers(1));

    let decisions_path = open(dir.path()).decisions_path("operational_risk");
    let tenants: Vec<String> = lines(&decisions_path)
        .iter()
        .map(|line| serde_json::from_str::<DecisionRow>(line).unwrap().key.tenant_id)
        .collect();
    assert_eq!(tenants, vec!["acme", "acme", "globex"]);
}

/// Verifies that delete-insert writes land the same rows as merge.
#[test]
fn delete_insert_mode_matches_merge() {
    let merged = tempfile::tempdir().unwrap();
    let replaced = tempfile::tempdir().unwrap();
    run_into(open(merged.path()), &context("acme", "corr-1"), shoppers(3));
    let delete_insert = FileOutputsRepository::open(
        replaced.path(),
        UpsertOptions {
            mode: WriteMode::DeleteInsert,
            batch_size: 2,
        },
    )
    .unwrap();
    run_into(delete_insert, &context("acme", "corr-1"), shoppers(3));

    let file = "operational_risk_decisions.jsonl";
    assert_eq!(
        fs::read(merged.path().join(file)).unwrap(),
        fs::read(replaced.path().join(file)).unwrap()
    );
}

/// Verifies that a corrupt output file fails the write instead of being overwritten.
#[test]
fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let outputs = open(dir.path());
    let decisions_path = outputs.decisions_path("operational_risk");
    fs::write(&decisions_path, "not json\n").unwrap();

    let inputs = InMemoryInputsRepository::new();
    inputs.set_inputs("operational_risk_inputs", shoppers(1)).unwrap();
    let runner = Runner::new(
        StaticConfigProvider::permissive(),
        inputs,
        outputs,
        Arc::new(Registry::builtin()),
    );
    let result = runner.run(&context("acme", "corr-1"), &CancellationToken::new());
    let message = result.unwrap_err().to_string();
    assert!(message.contains("line 1"), "{message}");
    assert_eq!(fs::read_to_string(&decisions_path).unwrap(), "not json\n");
}
