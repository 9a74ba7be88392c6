// crates/decision-pipeline-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Output Store
// Description: Decision, evidence, and run registry tables backed by SQLite.
// Purpose: Persist run outputs idempotently keyed by natural keys.
// Dependencies: decision-pipeline-core, rusqlite, serde, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`SqliteOutputStore`] implements the core [`UpsertBackend`] protocol over
//! three tables: `decisions`, `evidence`, and `run_registry`. Merge support is
//! detected from the linked library version (`ON CONFLICT ... DO UPDATE`
//! needs 3.24.0); without it the upsert protocol falls back to delete and
//! insert per batch.
//!
//! Schema creation is optional. When disabled the store verifies that every
//! expected column exists and fails with a [`ProvisioningError`] naming the
//! incomplete tables.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::CorrelationId;
use decision_pipeline_core::Decision;
use decision_pipeline_core::DecisionRow;
use decision_pipeline_core::EvidenceKey;
use decision_pipeline_core::EvidenceRow;
use decision_pipeline_core::EvidenceSet;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::NaturalKey;
use decision_pipeline_core::OutputsRepository;
use decision_pipeline_core::PrimitiveName;
use decision_pipeline_core::PrimitiveVersion;
use decision_pipeline_core::ProvisioningError;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::RunCompletion;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::RunFailure;
use decision_pipeline_core::RunRecord;
use decision_pipeline_core::RunRegistry;
use decision_pipeline_core::RunRegistryError;
use decision_pipeline_core::RunStatus;
use decision_pipeline_core::StateCounts;
use decision_pipeline_core::TenantId;
use decision_pipeline_core::UpsertBackend;
use decision_pipeline_core::UpsertOptions;
use decision_pipeline_core::WriteMode;
use decision_pipeline_core::core::time::elapsed_millis;
use decision_pipeline_core::core::time::format_rfc3339;
use decision_pipeline_core::core::time::parse_timestamp;
use decision_pipeline_core::persistence::DEFAULT_BATCH_SIZE;
use decision_pipeline_core::persistence::write_decisions_with;
use decision_pipeline_core::persistence::write_evidence_with;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use tracing::info;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
pub const SCHEMA_VERSION: i64 = 1;
/// Largest accepted upsert batch size.
pub const MAX_BATCH_SIZE: usize = 10_000;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// First library version that accepts `ON CONFLICT ... DO UPDATE`.
const MIN_UPSERT_VERSION: (u32, u32, u32) = (3, 24, 0);
/// Command operators run to provision the tables.
const PROVISION_COMMAND: &str = "decision-pipeline store init";

/// Decision table name.
const DECISIONS_TABLE: &str = "decisions";
/// Evidence table name.
const EVIDENCE_TABLE: &str = "evidence";
/// Run registry table name.
const RUN_REGISTRY_TABLE: &str = "run_registry";

/// Columns the decision table must carry.
const DECISION_COLUMNS: [&str; 16] = [
    "tenant_id",
    "subject_type",
    "subject_id",
    "primitive_name",
    "primitive_version",
    "as_of_ts",
    "canonical_version",
    "config_version",
    "decision_state",
    "confidence",
    "drivers_json",
    "metrics_json",
    "evidence_refs_json",
    "computed_at",
    "valid_until",
    "correlation_id",
];

/// Columns the evidence table must carry.
const EVIDENCE_COLUMNS: [&str; 12] = [
    "tenant_id",
    "subject_type",
    "subject_id",
    "primitive_name",
    "primitive_version",
    "as_of_ts",
    "evidence_id",
    "canonical_version",
    "config_version",
    "evidence_json",
    "computed_at",
    "correlation_id",
];

/// Columns the run registry table must carry.
const RUN_REGISTRY_COLUMNS: [&str; 14] = [
    "correlation_id",
    "tenant_id",
    "primitive_name",
    "primitive_version",
    "config_version",
    "canonical_version",
    "status",
    "started_at",
    "completed_at",
    "duration_ms",
    "input_count",
    "decision_count",
    "state_counts_json",
    "error_message",
];

/// Table DDL applied when schema creation is enabled.
const SCHEMA_DDL: &str = "CREATE TABLE IF NOT EXISTS decisions (
        tenant_id TEXT NOT NULL,
        subject_type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        primitive_name TEXT NOT NULL,
        primitive_version TEXT NOT NULL,
        as_of_ts TEXT NOT NULL,
        canonical_version TEXT NOT NULL,
        config_version TEXT NOT NULL,
        decision_state TEXT NOT NULL,
        confidence TEXT NOT NULL,
        drivers_json TEXT NOT NULL,
        metrics_json TEXT NOT NULL,
        evidence_refs_json TEXT NOT NULL,
        computed_at TEXT NOT NULL,
        valid_until TEXT,
        correlation_id TEXT NOT NULL,
        PRIMARY KEY (tenant_id, subject_type, subject_id, primitive_name, primitive_version, \
                          as_of_ts)
    );
    CREATE TABLE IF NOT EXISTS evidence (
        tenant_id TEXT NOT NULL,
        subject_type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        primitive_name TEXT NOT NULL,
        primitive_version TEXT NOT NULL,
        as_of_ts TEXT NOT NULL,
        evidence_id TEXT NOT NULL,
        canonical_version TEXT NOT NULL,
        config_version TEXT NOT NULL,
        evidence_json TEXT NOT NULL,
        computed_at TEXT NOT NULL,
        correlation_id TEXT NOT NULL,
        PRIMARY KEY (tenant_id, subject_type, subject_id, primitive_name, primitive_version, \
                          as_of_ts, evidence_id)
    );
    CREATE TABLE IF NOT EXISTS run_registry (
        correlation_id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        primitive_name TEXT NOT NULL,
        primitive_version TEXT NOT NULL,
        config_version TEXT NOT NULL,
        canonical_version TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        duration_ms INTEGER,
        input_count INTEGER,
        decision_count INTEGER,
        state_counts_json TEXT NOT NULL,
        error_message TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_run_registry_tenant
        ON run_registry (tenant_id, primitive_name, started_at);";

/// Expands to the plain decision insert statement.
macro_rules! insert_decision_sql {
    () => {
        "INSERT INTO decisions (tenant_id, subject_type, subject_id, primitive_name, \
         primitive_version, as_of_ts, canonical_version, config_version, decision_state, \
         confidence, drivers_json, metrics_json, evidence_refs_json, computed_at, valid_until, \
         correlation_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
         ?15, ?16)"
    };
}

/// Expands to the plain evidence insert statement.
macro_rules! insert_evidence_sql {
    () => {
        "INSERT INTO evidence (tenant_id, subject_type, subject_id, primitive_name, \
         primitive_version, as_of_ts, evidence_id, canonical_version, config_version, \
         evidence_json, computed_at, correlation_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
         ?10, ?11, ?12)"
    };
}

/// Decision insert used after a delete.
const INSERT_DECISION_SQL: &str = insert_decision_sql!();
/// Decision merge keyed by the natural key.
const MERGE_DECISION_SQL: &str = concat!(
    insert_decision_sql!(),
    " ON CONFLICT (tenant_id, subject_type, subject_id, primitive_name, primitive_version, \
     as_of_ts) DO UPDATE SET canonical_version = excluded.canonical_version, config_version = \
     excluded.config_version, decision_state = excluded.decision_state, confidence = \
     excluded.confidence, drivers_json = excluded.drivers_json, metrics_json = \
     excluded.metrics_json, evidence_refs_json = excluded.evidence_refs_json, computed_at = \
     excluded.computed_at, valid_until = excluded.valid_until, correlation_id = \
     excluded.correlation_id"
);
/// Evidence insert used after a delete.
const INSERT_EVIDENCE_SQL: &str = insert_evidence_sql!();
/// Evidence merge keyed by natural key plus evidence id.
const MERGE_EVIDENCE_SQL: &str = concat!(
    insert_evidence_sql!(),
    " ON CONFLICT (tenant_id, subject_type, subject_id, primitive_name, primitive_version, \
     as_of_ts, evidence_id) DO UPDATE SET canonical_version = excluded.canonical_version, \
     config_version = excluded.config_version, evidence_json = excluded.evidence_json, \
     computed_at = excluded.computed_at, correlation_id = excluded.correlation_id"
);
/// Decision delete by natural key.
const DELETE_DECISION_SQL: &str = "DELETE FROM decisions WHERE tenant_id = ?1 AND subject_type \
                                   = ?2 AND subject_id = ?3 AND primitive_name = ?4 AND \
                                   primitive_version = ?5 AND as_of_ts = ?6";
/// Evidence delete by natural key plus evidence id.
const DELETE_EVIDENCE_SQL: &str = "DELETE FROM evidence WHERE tenant_id = ?1 AND subject_type = \
                                   ?2 AND subject_id = ?3 AND primitive_name = ?4 AND \
                                   primitive_version = ?5 AND as_of_ts = ?6 AND evidence_id = ?7";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` output store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `batch_size` is in `1..=MAX_BATCH_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Upsert strategy.
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Rows per upsert batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Creates missing tables on open when set; otherwise verifies them.
    #[serde(default = "default_create_schema")]
    pub create_schema: bool,
}

impl SqliteStoreConfig {
    /// Returns a configuration with defaults for the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            write_mode: WriteMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            create_schema: true,
        }
    }

    /// Returns the upsert options derived from this configuration.
    #[must_use]
    pub const fn upsert_options(&self) -> UpsertOptions {
        UpsertOptions {
            mode: self.write_mode,
            batch_size: self.batch_size,
        }
    }

    /// Validates the path and batch limits.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when a limit is violated.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        validate_store_path(&self.path)?;
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(SqliteStoreError::Invalid(format!(
                "batch_size out of range: {} (expected 1..={MAX_BATCH_SIZE})",
                self.batch_size
            )));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default upsert batch size.
const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Returns the default schema creation flag.
const fn default_create_schema() -> bool {
    true
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding row payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Database was busy or locked; the caller may retry.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration or data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Tables are missing or incomplete.
    #[error(transparent)]
    Provisioning(ProvisioningError),
}

impl From<SqliteStoreError> for RepositoryError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Store(message)
            }
            SqliteStoreError::Busy(message) => Self::Transient(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Provisioning(details) => Self::Provisioning(details),
        }
    }
}

impl From<SqliteStoreError> for RunRegistryError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

/// Maps engine errors, separating contention from hard failures.
fn db_error(error: rusqlite::Error) -> SqliteStoreError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SqliteStoreError::Busy(error.to_string())
        }
        _ => SqliteStoreError::Db(error.to_string()),
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed outputs repository and run registry.
///
/// # Invariants
/// - Connection access is serialized through a mutex.
/// - Every merge or delete call runs in its own transaction.
/// - A delete-insert batch deletes and inserts in one transaction.
#[derive(Clone)]
pub struct SqliteOutputStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
    /// Linked library version string.
    sqlite_version: String,
    /// True when `ON CONFLICT ... DO UPDATE` is available.
    merge_supported: bool,
}

impl SqliteOutputStore {
    /// Opens the store, creating or verifying its tables.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the configuration is invalid, the
    /// database cannot be opened, or the tables are not provisioned.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        if config.create_schema {
            initialize_schema(&mut connection)?;
        }
        verify_schema(&connection)?;
        let sqlite_version: String = connection
            .query_row("SELECT sqlite_version()", params![], |row| row.get(0))
            .map_err(db_error)?;
        let merge_supported =
            parse_sqlite_version(&sqlite_version).is_some_and(supports_upsert_syntax);
        info!(
            path = %config.path.display(),
            sqlite_version = %sqlite_version,
            merge_supported,
            "sqlite output store opened"
        );
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
            sqlite_version,
            merge_supported,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Returns the linked `SQLite` library version.
    #[must_use]
    pub fn sqlite_version(&self) -> &str {
        &self.sqlite_version
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Returns every decision row ordered by natural key.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn decision_rows(&self) -> Result<Vec<DecisionRow>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT tenant_id, subject_type, subject_id, primitive_name, primitive_version, \
                 as_of_ts, canonical_version, config_version, decision_state, confidence, \
                 drivers_json, metrics_json, evidence_refs_json, computed_at, valid_until, \
                 correlation_id FROM decisions ORDER BY tenant_id, subject_type, subject_id, \
                 primitive_name, primitive_version, as_of_ts",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![], |row| {
                Ok(DecisionRow {
                    key: NaturalKey {
                        tenant_id: row.get(0)?,
                        subject_type: row.get(1)?,
                        subject_id: row.get(2)?,
                        primitive_name: row.get(3)?,
                        primitive_version: row.get(4)?,
                        as_of_ts: row.get(5)?,
                    },
                    canonical_version: row.get(6)?,
                    config_version: row.get(7)?,
                    decision_state: row.get(8)?,
                    confidence: row.get(9)?,
                    drivers_json: row.get(10)?,
                    metrics_json: row.get(11)?,
                    evidence_refs_json: row.get(12)?,
                    computed_at: row.get(13)?,
                    valid_until: row.get(14)?,
                    correlation_id: row.get(15)?,
                })
            })
            .map_err(db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
    }

    /// Returns every evidence row ordered by natural key and evidence id.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn evidence_rows(&self) -> Result<Vec<EvidenceRow>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT tenant_id, subject_type, subject_id, primitive_name, primitive_version, \
                 as_of_ts, evidence_id, canonical_version, config_version, evidence_json, \
                 computed_at, correlation_id FROM evidence ORDER BY tenant_id, subject_type, \
                 subject_id, primitive_name, primitive_version, as_of_ts, evidence_id",
            )
            .map_err(db_error)?;
        let rows = statement
            .query_map(params![], |row| {
                Ok(EvidenceRow {
                    key: EvidenceKey {
                        decision: NaturalKey {
                            tenant_id: row.get(0)?,
                            subject_type: row.get(1)?,
                            subject_id: row.get(2)?,
                            primitive_name: row.get(3)?,
                            primitive_version: row.get(4)?,
                            as_of_ts: row.get(5)?,
                        },
                        evidence_id: row.get(6)?,
                    },
                    canonical_version: row.get(7)?,
                    config_version: row.get(8)?,
                    evidence_json: row.get(9)?,
                    computed_at: row.get(10)?,
                    correlation_id: row.get(11)?,
                })
            })
            .map_err(db_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
    }

    /// Loads the run registry record for a correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails or the stored row is
    /// malformed.
    pub fn run_record(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<RunRecord>, SqliteStoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT correlation_id, tenant_id, primitive_name, primitive_version, \
                 config_version, canonical_version, status, started_at, completed_at, \
                 duration_ms, input_count, decision_count, state_counts_json, error_message FROM \
                 run_registry WHERE correlation_id = ?1",
                params![correlation_id.as_str()],
                |row| {
                    Ok(RunRegistryRow {
                        correlation_id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        primitive_name: row.get(2)?,
                        primitive_version: row.get(3)?,
                        config_version: row.get(4)?,
                        canonical_version: row.get(5)?,
                        status: row.get(6)?,
                        started_at: row.get(7)?,
                        completed_at: row.get(8)?,
                        duration_ms: row.get(9)?,
                        input_count: row.get(10)?,
                        decision_count: row.get(11)?,
                        state_counts_json: row.get(12)?,
                        error_message: row.get(13)?,
                    })
                },
            )
            .optional()
            .map_err(db_error)?;
        drop(guard);
        row.map(RunRegistryRow::into_record).transpose()
    }

    /// Applies a terminal transition to a `STARTED` registry row.
    fn finish_run(
        &self,
        ctx: &RunContext,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        let changed = guard.execute(sql, params).map_err(db_error)?;
        if changed == 1 {
            return Ok(());
        }
        let status: Option<String> = guard
            .query_row(
                "SELECT status FROM run_registry WHERE correlation_id = ?1",
                params![ctx.correlation_id().as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        drop(guard);
        match status {
            None => Err(SqliteStoreError::Invalid(format!(
                "run not registered: {}",
                ctx.correlation_id()
            ))),
            Some(_) => Err(SqliteStoreError::Invalid(format!(
                "run already terminal: {}",
                ctx.correlation_id()
            ))),
        }
    }
}

// ============================================================================
// SECTION: Upsert Backend
// ============================================================================

impl UpsertBackend for SqliteOutputStore {
    fn supports_merge(&self) -> bool {
        self.merge_supported
    }

    fn merge_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError> {
        let sql = if self.merge_supported { MERGE_DECISION_SQL } else { INSERT_DECISION_SQL };
        self.in_transaction(|tx| insert_decision_rows(tx, sql, rows))
    }

    fn merge_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError> {
        let sql = if self.merge_supported { MERGE_EVIDENCE_SQL } else { INSERT_EVIDENCE_SQL };
        self.in_transaction(|tx| insert_evidence_rows(tx, sql, rows))
    }

    fn delete_decisions(&self, keys: &[NaturalKey]) -> Result<(), RepositoryError> {
        self.in_transaction(|tx| delete_decision_keys(tx, keys.iter()))
    }

    fn delete_evidence(&self, keys: &[EvidenceKey]) -> Result<(), RepositoryError> {
        self.in_transaction(|tx| delete_evidence_keys(tx, keys.iter()))
    }

    fn replace_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError> {
        let sql = if self.merge_supported { MERGE_DECISION_SQL } else { INSERT_DECISION_SQL };
        self.in_transaction(|tx| {
            delete_decision_keys(tx, rows.iter().map(|row| &row.key))?;
            insert_decision_rows(tx, sql, rows)
        })
    }

    fn replace_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError> {
        let sql = if self.merge_supported { MERGE_EVIDENCE_SQL } else { INSERT_EVIDENCE_SQL };
        self.in_transaction(|tx| {
            delete_evidence_keys(tx, rows.iter().map(|row| &row.key))?;
            insert_evidence_rows(tx, sql, rows)
        })
    }
}

impl SqliteOutputStore {
    /// Runs `write` in one transaction, committing only when it succeeds.
    fn in_transaction(
        &self,
        write: impl FnOnce(&Connection) -> Result<(), rusqlite::Error>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_error)?;
        write(&tx).map_err(db_error)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(())
    }
}

/// Executes `sql` once per decision row.
fn insert_decision_rows(
    connection: &Connection,
    sql: &str,
    rows: &[DecisionRow],
) -> Result<(), rusqlite::Error> {
    let mut statement = connection.prepare_cached(sql)?;
    for row in rows {
        statement.execute(params![
            row.key.tenant_id,
            row.key.subject_type,
            row.key.subject_id,
            row.key.primitive_name,
            row.key.primitive_version,
            row.key.as_of_ts,
            row.canonical_version,
            row.config_version,
            row.decision_state,
            row.confidence,
            row.drivers_json,
            row.metrics_json,
            row.evidence_refs_json,
            row.computed_at,
            row.valid_until,
            row.correlation_id,
        ])?;
    }
    Ok(())
}

/// Executes `sql` once per evidence row.
fn insert_evidence_rows(
    connection: &Connection,
    sql: &str,
    rows: &[EvidenceRow],
) -> Result<(), rusqlite::Error> {
    let mut statement = connection.prepare_cached(sql)?;
    for row in rows {
        let key = &row.key.decision;
        statement.execute(params![
            key.tenant_id,
            key.subject_type,
            key.subject_id,
            key.primitive_name,
            key.primitive_version,
            key.as_of_ts,
            row.key.evidence_id,
            row.canonical_version,
            row.config_version,
            row.evidence_json,
            row.computed_at,
            row.correlation_id,
        ])?;
    }
    Ok(())
}

/// Deletes decision rows by natural key.
fn delete_decision_keys<'a>(
    connection: &Connection,
    keys: impl Iterator<Item = &'a NaturalKey>,
) -> Result<(), rusqlite::Error> {
    let mut statement = connection.prepare_cached(DELETE_DECISION_SQL)?;
    for key in keys {
        statement.execute(params![
            key.tenant_id,
            key.subject_type,
            key.subject_id,
            key.primitive_name,
            key.primitive_version,
            key.as_of_ts,
        ])?;
    }
    Ok(())
}

/// Deletes evidence rows by natural key plus evidence id.
fn delete_evidence_keys<'a>(
    connection: &Connection,
    keys: impl Iterator<Item = &'a EvidenceKey>,
) -> Result<(), rusqlite::Error> {
    let mut statement = connection.prepare_cached(DELETE_EVIDENCE_SQL)?;
    for key in keys {
        let decision = &key.decision;
        statement.execute(params![
            decision.tenant_id,
            decision.subject_type,
            decision.subject_id,
            decision.primitive_name,
            decision.primitive_version,
            decision.as_of_ts,
            key.evidence_id,
        ])?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Outputs Repository
// ============================================================================

impl OutputsRepository for SqliteOutputStore {
    fn write_decisions(
        &self,
        ctx: &RunContext,
        decisions: &[Decision],
        inputs: &[InputRecord],
    ) -> Result<(), RepositoryError> {
        write_decisions_with(self, self.config.upsert_options(), ctx, decisions, inputs)
    }

    fn write_evidence(
        &self,
        ctx: &RunContext,
        evidence_sets: &[EvidenceSet],
        inputs: &[InputRecord],
        decisions: &[Decision],
    ) -> Result<(), RepositoryError> {
        write_evidence_with(
            self,
            self.config.upsert_options(),
            ctx,
            evidence_sets,
            inputs,
            decisions,
        )
    }
}

// ============================================================================
// SECTION: Run Registry
// ============================================================================

impl RunRegistry for SqliteOutputStore {
    fn register_run_started(
        &self,
        ctx: &RunContext,
        canonical_version: &str,
        started_at: OffsetDateTime,
    ) -> Result<(), RunRegistryError> {
        let started_at = format_timestamp(started_at)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT OR REPLACE INTO run_registry (correlation_id, tenant_id, primitive_name, \
                 primitive_version, config_version, canonical_version, status, started_at, \
                 completed_at, duration_ms, input_count, decision_count, state_counts_json, \
                 error_message) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, NULL, NULL, \
                 '{}', NULL)",
                params![
                    ctx.correlation_id().as_str(),
                    ctx.tenant_id().as_str(),
                    ctx.primitive_name().as_str(),
                    ctx.primitive_version().as_str(),
                    ctx.config_version().as_str(),
                    canonical_version,
                    RunStatus::Started.as_str(),
                    started_at,
                ],
            )
            .map_err(db_error)?;
        drop(guard);
        debug!(correlation_id = %ctx.correlation_id(), "run registered as started");
        Ok(())
    }

    fn register_run_completed(
        &self,
        ctx: &RunContext,
        completion: &RunCompletion,
    ) -> Result<(), RunRegistryError> {
        let completed_at = format_timestamp(completion.completed_at)?;
        let duration_ms =
            to_sql_int(elapsed_millis(completion.started_at, completion.completed_at))?;
        let input_count = to_sql_int(completion.input_count)?;
        let decision_count = to_sql_int(completion.decision_count)?;
        let state_counts_json = serde_json::to_string(&completion.state_counts)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        self.finish_run(
            ctx,
            "UPDATE run_registry SET status = ?2, completed_at = ?3, duration_ms = ?4, \
             input_count = ?5, decision_count = ?6, state_counts_json = ?7 WHERE correlation_id \
             = ?1 AND status = ?8",
            params![
                ctx.correlation_id().as_str(),
                RunStatus::Success.as_str(),
                completed_at,
                duration_ms,
                input_count,
                decision_count,
                state_counts_json,
                RunStatus::Started.as_str(),
            ],
        )?;
        debug!(correlation_id = %ctx.correlation_id(), "run registered as completed");
        Ok(())
    }

    fn register_run_failed(
        &self,
        ctx: &RunContext,
        failure: &RunFailure,
    ) -> Result<(), RunRegistryError> {
        let completed_at = format_timestamp(failure.completed_at)?;
        let duration_ms = to_sql_int(elapsed_millis(failure.started_at, failure.completed_at))?;
        self.finish_run(
            ctx,
            "UPDATE run_registry SET status = ?2, completed_at = ?3, duration_ms = ?4, \
             error_message = ?5 WHERE correlation_id = ?1 AND status = ?6",
            params![
                ctx.correlation_id().as_str(),
                RunStatus::Failed.as_str(),
                completed_at,
                duration_ms,
                failure.error_message,
                RunStatus::Started.as_str(),
            ],
        )?;
        debug!(correlation_id = %ctx.correlation_id(), "run registered as failed");
        Ok(())
    }
}

/// Raw run registry row prior to validation.
struct RunRegistryRow {
    /// Correlation identifier.
    correlation_id: String,
    /// Tenant identifier.
    tenant_id: String,
    /// Primitive name.
    primitive_name: String,
    /// Primitive version.
    primitive_version: String,
    /// Configuration version.
    config_version: String,
    /// Canonical data version.
    canonical_version: String,
    /// Status label.
    status: String,
    /// RFC 3339 start time.
    started_at: String,
    /// RFC 3339 completion time.
    completed_at: Option<String>,
    /// Duration in milliseconds.
    duration_ms: Option<i64>,
    /// Inputs evaluated.
    input_count: Option<i64>,
    /// Decisions persisted.
    decision_count: Option<i64>,
    /// JSON object of state counts.
    state_counts_json: String,
    /// Failure message.
    error_message: Option<String>,
}

impl RunRegistryRow {
    /// Validates the stored columns into a [`RunRecord`].
    fn into_record(self) -> Result<RunRecord, SqliteStoreError> {
        let status = RunStatus::parse(&self.status).ok_or_else(|| {
            SqliteStoreError::Invalid(format!("unknown run status: {}", self.status))
        })?;
        let state_counts: StateCounts = serde_json::from_str(&self.state_counts_json)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        Ok(RunRecord {
            correlation_id: CorrelationId::new(self.correlation_id),
            tenant_id: TenantId::new(self.tenant_id),
            primitive_name: PrimitiveName::new(self.primitive_name),
            primitive_version: PrimitiveVersion::new(self.primitive_version),
            config_version: ConfigVersion::new(self.config_version),
            canonical_version: self.canonical_version,
            status,
            started_at: read_timestamp(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(read_timestamp).transpose()?,
            duration_ms: self.duration_ms.map(from_sql_int).transpose()?,
            input_count: self.input_count.map(from_sql_int).transpose()?,
            decision_count: self.decision_count.map(from_sql_int).transpose()?,
            state_counts,
            error_message: self.error_message,
        })
    }
}

// ============================================================================
// SECTION: Version Detection
// ============================================================================

/// Parses an `SQLite` version string such as `3.45.1`.
#[must_use]
pub fn parse_sqlite_version(text: &str) -> Option<(u32, u32, u32)> {
    let mut parts = text.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = match parts.next() {
        Some(part) => part.parse().ok()?,
        None => 0,
    };
    Some((major, minor, patch))
}

/// Returns true when the version accepts `ON CONFLICT ... DO UPDATE`.
#[must_use]
pub fn supports_upsert_syntax(version: (u32, u32, u32)) -> bool {
    version >= MIN_UPSERT_VERSION
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the configured pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(())
}

/// Creates the tables or validates the recorded schema version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(SCHEMA_DDL).map_err(db_error)?;
            info!(version = SCHEMA_VERSION, "sqlite output schema created");
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}

/// Verifies the schema version and that every expected column exists.
fn verify_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    let has_meta: bool = connection
        .query_row(
            "SELECT COUNT(1) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
            params![],
            |row| row.get(0),
        )
        .map_err(db_error)?;
    if has_meta {
        let version: Option<i64> = connection
            .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .optional()
            .map_err(db_error)?;
        if let Some(value) = version
            && value != SCHEMA_VERSION
        {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    let expected: [(&str, &[&str]); 3] = [
        (DECISIONS_TABLE, &DECISION_COLUMNS[..]),
        (EVIDENCE_TABLE, &EVIDENCE_COLUMNS[..]),
        (RUN_REGISTRY_TABLE, &RUN_REGISTRY_COLUMNS[..]),
    ];
    let mut table_names = Vec::new();
    let mut problems = Vec::new();
    for (table, columns) in expected {
        let present = table_columns(connection, table)?;
        if present.is_empty() {
            table_names.push(table.to_string());
            problems.push(format!("{table} (missing)"));
            continue;
        }
        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|column| !present.iter().any(|name| name == column))
            .collect();
        if !missing.is_empty() {
            table_names.push(table.to_string());
            problems.push(format!("{table} (missing columns: {})", missing.join(", ")));
        }
    }
    if table_names.is_empty() {
        return Ok(());
    }
    Err(SqliteStoreError::Provisioning(ProvisioningError {
        message: format!("output tables not provisioned: {}", problems.join("; ")),
        table_names,
        ddl_file_path: None,
        suggested_command: Some(PROVISION_COMMAND.to_string()),
    }))
}

/// Lists the column names of a table; empty when the table does not exist.
fn table_columns(connection: &Connection, table: &str) -> Result<Vec<String>, SqliteStoreError> {
    let mut statement =
        connection.prepare("SELECT name FROM pragma_table_info(?1)").map_err(db_error)?;
    let names = statement.query_map(params![table], |row| row.get(0)).map_err(db_error)?;
    names.collect::<Result<Vec<String>, _>>().map_err(db_error)
}

/// Renders a timestamp column.
fn format_timestamp(value: OffsetDateTime) -> Result<String, SqliteStoreError> {
    format_rfc3339(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Parses a timestamp column.
fn read_timestamp(value: &str) -> Result<OffsetDateTime, SqliteStoreError> {
    parse_timestamp(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Converts a counter into an `SQLite` integer.
fn to_sql_int(value: u64) -> Result<i64, SqliteStoreError> {
    i64::try_from(value)
        .map_err(|_| SqliteStoreError::Invalid(format!("integer out of range: {value}")))
}

/// Converts a stored integer back into a counter.
fn from_sql_int(value: i64) -> Result<u64, SqliteStoreError> {
    u64::try_from(value)
        .map_err(|_| SqliteStoreError::Invalid(format!("negative counter in store: {value}")))
}
