// crates/decision-pipeline-core/src/core/hashing.rs
// ============================================================================
// Module: Decision Pipeline Canonical JSON
// Description: RFC 8785 canonical JSON encoding for persisted columns.
// Purpose: Make persisted JSON columns byte-identical across reruns.
// Dependencies: serde, serde_jcs, thiserror
// ============================================================================

//! ## Overview
//! Persisted rows store drivers, metrics, and evidence as JSON text. Encoding
//! goes through RFC 8785 (JCS) so the same value always produces the same
//! bytes, which is what makes repeated upserts drift-free.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when canonicalizing JSON.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Canonical Encoding
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Returns canonical JSON text for a serializable value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    serde_jcs::to_string(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}
