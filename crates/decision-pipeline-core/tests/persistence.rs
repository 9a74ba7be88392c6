// crates/decision-pipeline-core/tests/persistence.rs
// ============================================================================
// Module: Persistence Tests
// Description: Row construction and upsert protocol tests.
// Purpose: Keep writes keyed by natural key and safe to repeat.
// ============================================================================

//! Row construction and upsert protocol tests.

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

use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::Decision;
use decision_pipeline_core::EvidenceSet;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::OutputsRepository;
use decision_pipeline_core::PersistenceError;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::Registry;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::ResolvedConfig;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::UpsertOptions;
use decision_pipeline_core::WriteMode;
use decision_pipeline_core::persistence::build_decision_rows;
use decision_pipeline_core::persistence::build_evidence_rows;
use decision_pipeline_core::primitives::BUILTIN_PRIMITIVE_VERSION;
use decision_pipeline_core::runtime::InMemoryOutputsRepository;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const AS_OF: OffsetDateTime = datetime!(2024-06-01 00:00 UTC);

fn context(correlation_id: &str) -> RunContext {
    RunContext::new(
        TenantId::new("acme"),
        PrimitiveName::new("operational_risk"),
        PrimitiveVersion::new(BUILTIN_PRIMITIVE_VERSION),
        AS_OF,
        ConfigVersion::new("v1"),
        CorrelationId::new(correlation_id),
    )
}

/// Evaluates `count` shoppers and returns the paired outputs.
fn evaluated(count: usize) -> (Vec<InputRecord>, Vec<Decision>, Vec<EvidenceSet>) {
    let registry = Registry::builtin();
    let bound = registry
        .get("operational_risk", BUILTIN_PRIMITIVE_VERSION)
        .unwrap()
        .bind(&ResolvedConfig::new(ConfigVersion::new("v1"), Map::new()))
        .unwrap();
    let mut inputs = Vec::new();
    let mut decisions = Vec::new();
    let mut evidence_sets = Vec::new();
    for index in 0..count {
        let Value::Object(facts) = json!({ "days_since_last_trip": index * 10 }) else {
            unreachable!();
        };
        let input = InputRecord::new("shopper", format!("s-{index}"), AS_OF, facts);
        let result = bound.evaluate(&input).unwrap().unwrap();
        inputs.push(input);
        decisions.push(result.decision);
        evidence_sets.push(result.evidence_set);
    }
    (inputs, decisions, evidence_sets)
}

fn write_all(
    outputs: &InMemoryOutputsRepository,
    ctx: &RunContext,
    inputs: &[InputRecord],
    decisions: &[Decision],
    evidence_sets: &[EvidenceSet],
) -> Result<(), RepositoryError> {
    outputs.write_decisions(ctx, decisions, inputs)?;
    outputs.write_evidence(ctx, evidence_sets, inputs, decisions)
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Verifies that decisions and inputs must pair one to one.
#[test]
fn mismatched_lengths_are_rejected() {
    let (inputs, decisions, evidence_sets) = evaluated(2);
    let ctx = context("corr-1");
    assert_eq!(
        build_decision_rows(&ctx, &decisions[..1], &inputs),
        Err(PersistenceError::LengthMismatch {
            left_name: "decisions",
            left: 1,
            inputs: 2,
        })
    );
    assert!(matches!(
        build_evidence_rows(&ctx, &evidence_sets, &inputs[..1], &decisions[..1]),
        Err(PersistenceError::LengthMismatch { left_name: "evidence_sets", .. })
    ));

    let outputs = InMemoryOutputsRepository::new();
    let result = outputs.write_decisions(&ctx, &decisions, &inputs[..1]);
    assert!(matches!(result, Err(RepositoryError::Invalid(ref message)) if message.contains("length mismatch")));
    assert!(outputs.operations().unwrap().is_empty());
}

/// Verifies the natural key and canonical JSON columns of built rows.
#[test]
fn rows_carry_natural_keys_and_canonical_json() {
    let (inputs, decisions, evidence_sets) = evaluated(1);
    let ctx = context("corr-1");
    let rows = build_decision_rows(&ctx, &decisions, &inputs).unwrap();
    let row = &rows[0];
    assert_eq!(row.key.tenant_id, "acme");
    assert_eq!(row.key.subject_type, "shopper");
    assert_eq!(row.key.subject_id, "s-0");
    assert_eq!(row.key.primitive_name, "operational_risk");
    assert_eq!(row.key.primitive_version, BUILTIN_PRIMITIVE_VERSION);
    assert_eq!(row.key.as_of_ts, "2024-06-01T00:00:00Z");
    assert_eq!(row.canonical_version, "v1");
    assert_eq!(row.evidence_refs_json, r#"["evidence-s-0"]"#);
    assert_eq!(row.correlation_id, "corr-1");
    let metrics: Value = serde_json::from_str(&row.metrics_json).unwrap();
    assert_eq!(metrics["days_since_last_trip"], json!(0));

    let evidence = build_evidence_rows(&ctx, &evidence_sets, &inputs, &decisions).unwrap();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].key.decision, row.key);
    assert_eq!(evidence[0].key.evidence_id, "evidence-s-0");
    assert_eq!(evidence[0].config_version, "v1");
}

// ============================================================================
// SECTION: Upserts
// ============================================================================

/// Verifies that a rewrite under a new correlation id replaces rows in place.
#[test]
fn rewrites_replace_rows_by_natural_key() {
    let (inputs, decisions, evidence_sets) = evaluated(3);
    let outputs = InMemoryOutputsRepository::new();
    write_all(&outputs, &context("corr-1"), &inputs, &decisions, &evidence_sets).unwrap();
    write_all(&outputs, &context("corr-2"), &inputs, &decisions, &evidence_sets).unwrap();

    let rows = outputs.decision_rows().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.correlation_id == "corr-2"));
    assert_eq!(outputs.evidence_rows().unwrap().len(), 3);
}

/// Verifies that backends without merge delete each batch's keys first.
#[test]
fn delete_insert_runs_per_batch() {
    let (inputs, decisions, _) = evaluated(5);
    let outputs = InMemoryOutputsRepository::with_options(
        false,
        UpsertOptions {
            mode: WriteMode::Auto,
            batch_size: 2,
        },
    );
    outputs.write_decisions(&context("corr-1"), &decisions, &inputs).unwrap();
    assert_eq!(
        outputs.operations().unwrap(),
        vec![
            "delete_decisions",
            "merge_decisions",
            "delete_decisions",
            "merge_decisions",
            "delete_decisions",
            "merge_decisions",
        ]
    );
    assert_eq!(outputs.decision_rows().unwrap().len(), 5);
}

/// Verifies that merge-capable backends write each batch with one merge.
#[test]
fn merge_writes_in_batches() {
    let (inputs, decisions, _) = evaluated(3);
    let outputs = InMemoryOutputsRepository::with_options(
        true,
        UpsertOptions {
            mode: WriteMode::Auto,
            batch_size: 2,
        },
    );
    outputs.write_decisions(&context("corr-1"), &decisions, &inputs).unwrap();
    assert_eq!(outputs.operations().unwrap(), vec!["merge_decisions", "merge_decisions"]);
}

/// Verifies that an explicit merge request fails on a backend without merge.
#[test]
fn explicit_merge_requires_support() {
    let (inputs, decisions, _) = evaluated(1);
    let outputs = InMemoryOutputsRepository::with_options(
        false,
        UpsertOptions {
            mode: WriteMode::Merge,
            batch_size: 10,
        },
    );
    let result = outputs.write_decisions(&context("corr-1"), &decisions, &inputs);
    assert!(matches!(result, Err(RepositoryError::Store(_))));
    assert!(outputs.decision_rows().unwrap().is_empty());
}

/// Verifies that a zero batch size still writes one row per call.
#[test]
fn zero_batch_size_is_clamped() {
    let (inputs, decisions, _) = evaluated(2);
    let outputs = InMemoryOutputsRepository::with_options(
        true,
        UpsertOptions {
            mode: WriteMode::Merge,
            batch_size: 0,
        },
    );
    outputs.write_decisions(&context("corr-1"), &decisions, &inputs).unwrap();
    assert_eq!(outputs.operations().unwrap().len(), 2);
}

/// Verifies that empty writes touch nothing.
#[test]
fn empty_writes_are_noops() {
    let outputs = InMemoryOutputsRepository::new();
    write_all(&outputs, &context("corr-1"), &[], &[], &[]).unwrap();
    assert!(outputs.operations().unwrap().is_empty());
}
