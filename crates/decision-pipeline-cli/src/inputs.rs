// crates/decision-pipeline-cli/src/inputs.rs
// ============================================================================
// Module: File Inputs Repository
// Description: InputsRepository backed by a JSON document on disk.
// Purpose: Feed local runs from a file keyed by primitive name.
// Dependencies: decision-pipeline-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The inputs file is a JSON object mapping a primitive name (or fetch
//! capability name) to an array of flat input objects:
//!
//! ```json
//! { "operational_risk": [ { "subject_id": "s-1", "last_trip_date": "2024-04-01" } ] }
//! ```
//!
//! Each object becomes an [`InputRecord`] lazily as the runner pulls from the
//! stream, so a malformed row fails the run at its position. Reads are
//! bounded by [`MAX_INPUTS_FILE_BYTES`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use decision_pipeline_core::FetchCapability;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::InputStream;
use decision_pipeline_core::InputsRepository;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::RunContext;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum inputs file size in bytes.
pub const MAX_INPUTS_FILE_BYTES: usize = 64 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading an inputs file.
#[derive(Debug, Error)]
pub enum InputsFileError {
    /// File I/O failure.
    #[error("inputs file io error: {0}")]
    Io(#[from] std::io::Error),
    /// File size exceeds the limit.
    #[error("inputs file exceeds size limit ({size} > {limit} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
    /// File contents are not the expected JSON shape.
    #[error("inputs file parse error: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Repository
// ============================================================================

/// Inputs repository serving rows parsed from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct FileInputsRepository {
    /// Raw input objects keyed by primitive or capability name.
    records: BTreeMap<String, Vec<Map<String, Value>>>,
}

impl FileInputsRepository {
    /// Loads an inputs file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`InputsFileError`] when the file is unreadable, too large, or
    /// malformed.
    pub fn load(path: &Path) -> Result<Self, InputsFileError> {
        let bytes = read_bytes_with_limit(path, MAX_INPUTS_FILE_BYTES)?;
        Self::from_slice(&bytes)
    }

    /// Parses an inputs document from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`InputsFileError::Parse`] when the document is not an object
    /// of arrays of objects.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InputsFileError> {
        let document: Map<String, Value> =
            serde_json::from_slice(bytes).map_err(|err| InputsFileError::Parse(err.to_string()))?;
        let mut records = BTreeMap::new();
        for (key, value) in document {
            let Value::Array(rows) = value else {
                return Err(InputsFileError::Parse(format!("{key} must be an array")));
            };
            let mut objects = Vec::with_capacity(rows.len());
            for (index, row) in rows.into_iter().enumerate() {
                let Value::Object(object) = row else {
                    return Err(InputsFileError::Parse(format!("{key}[{index}] must be an object")));
                };
                objects.push(object);
            }
            records.insert(key, objects);
        }
        Ok(Self {
            records,
        })
    }

    /// Returns the number of rows stored under a key.
    #[must_use]
    pub fn len_for(&self, key: &str) -> usize {
        self.records.get(key).map_or(0, Vec::len)
    }
}

impl InputsRepository for FileInputsRepository {
    fn fetch_inputs<'a>(
        &'a self,
        ctx: &RunContext,
        capability: &FetchCapability,
    ) -> Result<InputStream<'a>, RepositoryError> {
        let key = ctx.primitive_name().as_str();
        let Some((label, rows)) = self
            .records
            .get_key_value(key)
            .or_else(|| self.records.get_key_value(capability.name))
        else {
            return Ok(Box::new(std::iter::empty()));
        };
        let subject_type = capability.subject_type;
        let as_of = ctx.as_of_ts();
        Ok(Box::new(rows.iter().enumerate().map(move |(index, object)| {
            InputRecord::from_json_object(object.clone(), subject_type, as_of)
                .map_err(|err| RepositoryError::Invalid(format!("{label}[{index}]: {err}")))
        })))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, InputsFileError> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let limit = u64::try_from(max_bytes).map_err(|_| InputsFileError::TooLarge {
        size,
        limit: max_bytes,
    })?;
    if size > limit {
        return Err(InputsFileError::TooLarge {
            size,
            limit: max_bytes,
        });
    }

    let mut limited = file.take(limit.saturating_add(1));
    let mut bytes = Vec::new();
    limited.read_to_end(&mut bytes)?;
    if bytes.len() > max_bytes {
        return Err(InputsFileError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}
