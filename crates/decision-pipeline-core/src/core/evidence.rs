// crates/decision-pipeline-core/src/core/evidence.rs
// ============================================================================
// Module: Decision Pipeline Evidence
// Description: Structured justification records backing decisions.
// Purpose: Capture applied rule ids, thresholds, and source references.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Evidence records the rule ids that fired, the thresholds they compared
//! against, and references to the source facts. Evidence ids are derived from
//! the subject and primitive so reruns upsert the same row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;

use crate::core::identifiers::EvidenceId;

// ============================================================================
// SECTION: Evidence
// ============================================================================

/// Single evidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Deterministic evidence identifier.
    pub evidence_id: EvidenceId,
    /// Rule ids that produced the decision.
    pub rule_ids: Vec<String>,
    /// Threshold values the rules compared against.
    pub thresholds: Map<String, Value>,
    /// References to source facts.
    pub references: Map<String, Value>,
    /// As-of time of the observed facts.
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

/// Evidence records produced for one decision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidenceSet {
    /// Evidence records in emission order.
    pub evidence: Vec<Evidence>,
}

impl EvidenceSet {
    /// Creates an evidence set holding a single record.
    #[must_use]
    pub fn single(evidence: Evidence) -> Self {
        Self {
            evidence: vec![evidence],
        }
    }
}
