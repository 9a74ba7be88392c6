// crates/decision-pipeline-config/src/config.rs
// ============================================================================
// Module: Decision Pipeline Configuration
// Description: Configuration loading and validation for the decision pipeline.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: decision-pipeline-core, decision-pipeline-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section is optional and defaults to a local, in-memory setup.
//! Tenant tables are nested as
//! `[tenants.<tenant>.<config_version>.<primitive>]`; each table holds the
//! primitive's settings plus an optional `canonical_version`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use decision_pipeline_core::ConfigVersion;
use decision_pipeline_core::DEFAULT_CANONICAL_VERSION;
use decision_pipeline_core::Registry;
use decision_pipeline_core::ResolvedConfig;
use decision_pipeline_core::RetryPolicy;
use decision_pipeline_core::WriteMode;
use decision_pipeline_core::persistence::DEFAULT_BATCH_SIZE;
use decision_pipeline_store_sqlite::MAX_BATCH_SIZE;
use decision_pipeline_store_sqlite::SqliteStoreConfig;
use decision_pipeline_store_sqlite::SqliteStoreMode;
use decision_pipeline_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::provider::InlineConfigProvider;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "decision-pipeline.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "DECISION_PIPELINE_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum retry attempts accepted from config.
const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Default busy timeout for the `SQLite` store (ms).
const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Output directory of the file store when `store.path` is unset.
pub const DEFAULT_OUTPUT_DIR: &str = "decision-pipeline-output";
/// Settings key naming the canonical data version.
pub const CANONICAL_VERSION_KEY: &str = "canonical_version";
/// Accepted log level names.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Primitive settings keyed by primitive name.
pub type PrimitiveTables = BTreeMap<String, Map<String, Value>>;
/// Primitive tables keyed by config version.
pub type VersionTables = BTreeMap<String, PrimitiveTables>;
/// Version tables keyed by tenant.
pub type TenantTables = BTreeMap<String, VersionTables>;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Decision pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Output store configuration.
    #[serde(default)]
    pub store: OutputStoreConfig,
    /// Retry policy for transient repository errors.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Runner side-channel configuration.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Tenant primitive settings.
    #[serde(default)]
    pub tenants: TenantTables,
}

impl PipelineConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is taken from `path`, then `DECISION_PIPELINE_CONFIG`, then
    /// `decision-pipeline.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;
        self.store.validate()?;
        validate_retry(&self.retry)?;
        validate_tenants(&self.tenants)
    }

    /// Binds every tenant table against the registry's primitives.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a table names an unknown
    /// primitive or its settings are rejected by the primitive.
    pub fn validate_primitives(&self, registry: &Registry) -> Result<(), ConfigError> {
        let descriptors = registry.list();
        for (tenant, versions) in &self.tenants {
            for (config_version, primitives) in versions {
                for (primitive, settings) in primitives {
                    let location = format!("tenants.{tenant}.{config_version}.{primitive}");
                    let descriptor = descriptors
                        .iter()
                        .find(|descriptor| descriptor.name == primitive.as_str())
                        .ok_or_else(|| {
                            ConfigError::Invalid(format!("{location}: unknown primitive"))
                        })?;
                    let evaluator = registry
                        .get(descriptor.name, descriptor.version)
                        .map_err(|err| ConfigError::Invalid(format!("{location}: {err}")))?;
                    let resolved = resolve_settings(ConfigVersion::new(config_version), settings)
                        .map_err(|message| {
                            ConfigError::Invalid(format!("{location}: {message}"))
                        })?;
                    evaluator
                        .bind(&resolved)
                        .map_err(|err| ConfigError::Invalid(format!("{location}: {err}")))?;
                }
            }
        }
        Ok(())
    }

    /// Returns a config provider serving the tenant tables.
    #[must_use]
    pub fn config_provider(&self) -> InlineConfigProvider {
        InlineConfigProvider::new(self.tenants.clone())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Validates the level name.
    fn validate(&self) -> Result<(), ConfigError> {
        let level = self.level.trim().to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            return Ok(());
        }
        Err(ConfigError::Invalid(format!(
            "logging.level must be one of {}: {}",
            LOG_LEVELS.join(", "),
            self.level
        )))
    }
}

/// Returns the default log level.
fn default_log_level() -> String {
    "info".to_string()
}

/// Output store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStoreType {
    /// JSON Lines files under an output directory.
    #[default]
    File,
    /// In-memory store; outputs are discarded when the process exits.
    Memory,
    /// `SQLite` store.
    Sqlite,
}

/// Output store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputStoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: OutputStoreType,
    /// Output directory for the file backend, or database path for sqlite.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Upsert strategy.
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Rows per upsert batch.
    #[serde(default = "default_store_batch_size")]
    pub batch_size: usize,
    /// Creates missing tables on open.
    #[serde(default = "default_create_schema")]
    pub create_schema: bool,
}

impl Default for OutputStoreConfig {
    fn default() -> Self {
        Self {
            store_type: OutputStoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            write_mode: WriteMode::default(),
            batch_size: default_store_batch_size(),
            create_schema: default_create_schema(),
        }
    }
}

impl OutputStoreConfig {
    /// Validates output store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "store.batch_size must be within 1..={MAX_BATCH_SIZE}"
            )));
        }
        match self.store_type {
            OutputStoreType::File => self.path.as_deref().map_or(Ok(()), validate_store_path),
            OutputStoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            OutputStoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_store_path(path)
            }
        }
    }

    /// Returns the output directory, if the file backend is selected.
    #[must_use]
    pub fn output_dir(&self) -> Option<PathBuf> {
        if self.store_type != OutputStoreType::File {
            return None;
        }
        Some(self.path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)))
    }

    /// Returns the `SQLite` store configuration, if the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        if self.store_type != OutputStoreType::Sqlite {
            return None;
        }
        let path = self.path.clone()?;
        Some(SqliteStoreConfig {
            path,
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            write_mode: self.write_mode,
            batch_size: self.batch_size,
            create_schema: self.create_schema,
        })
    }
}

/// Returns the default store busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Returns the default store batch size.
const fn default_store_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Returns the default schema creation flag.
const fn default_create_schema() -> bool {
    true
}

/// Lock manager selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// In-process lock per tenant and primitive.
    #[default]
    Local,
    /// No locking.
    Noop,
}

/// Runner side-channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Lock manager used around each run.
    #[serde(default)]
    pub lock: LockMode,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Settings Resolution
// ============================================================================

/// Splits a primitive table into its canonical version and settings.
///
/// # Errors
///
/// Returns a message when `canonical_version` is present but not a non-empty
/// string.
pub fn resolve_settings(
    config_version: ConfigVersion,
    table: &Map<String, Value>,
) -> Result<ResolvedConfig, String> {
    let mut settings = table.clone();
    let canonical_version = match settings.remove(CANONICAL_VERSION_KEY) {
        None => DEFAULT_CANONICAL_VERSION.to_string(),
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(_) => return Err(format!("{CANONICAL_VERSION_KEY} must be a non-empty string")),
    };
    let mut resolved = ResolvedConfig::new(config_version, settings);
    resolved.canonical_version = canonical_version;
    Ok(resolved)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates the store path against length limits.
fn validate_store_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid("store.path must be non-empty".to_string()));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("store.path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("store.path path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates retry bounds.
fn validate_retry(retry: &RetryPolicy) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 || retry.max_attempts > MAX_RETRY_ATTEMPTS {
        return Err(ConfigError::Invalid(format!(
            "retry.max_attempts must be within 1..={MAX_RETRY_ATTEMPTS}"
        )));
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ConfigError::Invalid(
            "retry.multiplier must be a finite number >= 1.0".to_string(),
        ));
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::Invalid(
            "retry.max_delay_ms must be >= retry.initial_delay_ms".to_string(),
        ));
    }
    Ok(())
}

/// Validates tenant table shape.
fn validate_tenants(tenants: &TenantTables) -> Result<(), ConfigError> {
    for (tenant, versions) in tenants {
        if tenant.trim().is_empty() {
            return Err(ConfigError::Invalid("tenant id must be non-empty".to_string()));
        }
        for (config_version, primitives) in versions {
            if config_version.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tenants.{tenant}: config version must be non-empty"
                )));
            }
            for (primitive, settings) in primitives {
                resolve_settings(ConfigVersion::new(config_version), settings).map_err(
                    |message| {
                        ConfigError::Invalid(format!(
                            "tenants.{tenant}.{config_version}.{primitive}: {message}"
                        ))
                    },
                )?;
            }
        }
    }
    Ok(())
}
