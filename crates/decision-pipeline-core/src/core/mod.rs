// crates/decision-pipeline-core/src/core/mod.rs
// ============================================================================
// Module: Decision Pipeline Core Types
// Description: Canonical decision, evidence, context, and run-record types.
// Purpose: Provide stable, serializable types shared by primitives and stores.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Core types define what a primitive emits (decisions and evidence), what a
//! run is evaluated against (run context and input records), and what the
//! audit trail records (run records and summaries). These types are the
//! canonical source of truth for every store and binary in the workspace.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod context;
pub mod decision;
pub mod evidence;
pub mod hashing;
pub mod identifiers;
pub mod input;
pub mod run_record;
pub mod summary;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use context::LockKey;
pub use context::RunContext;
pub use decision::Confidence;
pub use decision::Decision;
pub use decision::DecisionError;
pub use decision::DecisionState;
pub use decision::EvaluationResult;
pub use decision::VersionInfo;
pub use evidence::Evidence;
pub use evidence::EvidenceSet;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::canonical_json_string;
pub use identifiers::ConfigVersion;
pub use identifiers::CorrelationId;
pub use identifiers::EvidenceId;
pub use identifiers::PrimitiveName;
pub use identifiers::PrimitiveVersion;
pub use identifiers::SubjectId;
pub use identifiers::TenantId;
pub use input::InputError;
pub use input::InputRecord;
pub use run_record::RunCompletion;
pub use run_record::RunFailure;
pub use run_record::RunRecord;
pub use run_record::RunStatus;
pub use summary::CancelledRun;
pub use summary::RunSummary;
pub use summary::StateCounts;
pub use summary::tally_states;
pub use time::TimeError;
