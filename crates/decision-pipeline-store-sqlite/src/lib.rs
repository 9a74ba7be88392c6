// crates/decision-pipeline-store-sqlite/src/lib.rs
// ============================================================================
// Module: Decision Pipeline SQLite Store
// Description: SQLite-backed outputs repository and run registry.
// Purpose: Persist decisions, evidence, and run audit rows idempotently.
// Dependencies: decision-pipeline-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteOutputStore`], a durable sink for decision and
//! evidence rows keyed by their natural keys, plus the run registry table the
//! runner reports lifecycle transitions to. Writes go through the shared
//! upsert protocol in `decision_pipeline_core::persistence`, using native
//! `ON CONFLICT` merges when the linked `SQLite` supports them.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_BATCH_SIZE;
pub use store::SCHEMA_VERSION;
pub use store::SqliteOutputStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use store::parse_sqlite_version;
pub use store::supports_upsert_syntax;
