// crates/decision-pipeline-core/src/core/input.rs
// ============================================================================
// Module: Decision Pipeline Input Records
// Description: Untyped input rows streamed from inputs repositories.
// Purpose: Carry subject identity plus primitive-specific facts to evaluators.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Repositories stream [`InputRecord`] values: a subject identity, an as-of
//! time, and a JSON object of facts. Each primitive deserializes the facts
//! into its own typed input when the record is evaluated. The subject
//! identity is what the persistence layer uses to derive natural keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::identifiers::SubjectId;
use crate::core::time::parse_timestamp;

// ============================================================================
// SECTION: Input Record
// ============================================================================

/// Input row for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Subject type (shopper, order, order line, customer).
    pub subject_type: String,
    /// Subject identifier.
    pub subject_id: SubjectId,
    /// As-of timestamp of the canonical facts.
    #[serde(with = "time::serde::rfc3339")]
    pub as_of_ts: OffsetDateTime,
    /// Primitive-specific facts.
    pub facts: Map<String, Value>,
}

impl InputRecord {
    /// Creates a new input record.
    #[must_use]
    pub fn new(
        subject_type: impl Into<String>,
        subject_id: impl Into<SubjectId>,
        as_of_ts: OffsetDateTime,
        facts: Map<String, Value>,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            as_of_ts,
            facts,
        }
    }

    /// Builds a record from a flat JSON object.
    ///
    /// `subject_id` is required. `subject_type` and `as_of_ts` fall back to the
    /// supplied defaults; every other key becomes a fact.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] when identity fields are missing or malformed.
    pub fn from_json_object(
        mut object: Map<String, Value>,
        default_subject_type: &str,
        default_as_of: OffsetDateTime,
    ) -> Result<Self, InputError> {
        let subject_id = match object.remove("subject_id") {
            Some(Value::String(id)) if !id.trim().is_empty() => SubjectId::new(id),
            Some(Value::Number(number)) => SubjectId::new(number.to_string()),
            Some(_) => return Err(InputError::Invalid("subject_id must be a string".to_string())),
            None => return Err(InputError::Missing("subject_id".to_string())),
        };
        let subject_type = match object.remove("subject_type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
            Some(Value::Null) | None => default_subject_type.to_string(),
            Some(_) => {
                return Err(InputError::Invalid("subject_type must be a string".to_string()));
            }
        };
        let as_of_ts = match object.remove("as_of_ts") {
            Some(Value::String(text)) => {
                parse_timestamp(&text).map_err(|err| InputError::Invalid(err.to_string()))?
            }
            Some(Value::Null) | None => default_as_of,
            Some(_) => return Err(InputError::Invalid("as_of_ts must be a string".to_string())),
        };
        object.remove("tenant_id");
        Ok(Self {
            subject_type,
            subject_id,
            as_of_ts,
            facts: object,
        })
    }
}

/// Input record construction errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Required field missing.
    #[error("input record missing field: {0}")]
    Missing(String),
    /// Field present but malformed.
    #[error("input record invalid: {0}")]
    Invalid(String),
}
