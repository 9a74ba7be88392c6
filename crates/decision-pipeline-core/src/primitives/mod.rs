// crates/decision-pipeline-core/src/primitives/mod.rs
// ============================================================================
// Module: Decision Primitives
// Description: Typed primitive trait, type-erased evaluators, and rule tables.
// Purpose: Turn one subject's facts plus tenant config into a decision.
// Dependencies: crate::core, crate::interfaces, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A primitive is a pure, priority-ordered decision table. Each one declares
//! its name, version, fixed state set, typed config, and typed facts through
//! the [`Primitive`] trait. [`PrimitiveEvaluator`] erases those types so the
//! registry can hold every primitive behind one [`Evaluator`] trait object.
//!
//! Binding parses and validates tenant config once per run, before any input
//! is fetched. The bound evaluator then deserializes each record's facts and
//! runs the rule table.
//!
//! Decisions and evidence are stamped with the input's as-of time so reruns
//! produce identical rows.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod coupon_offer_set;
pub mod customer_impact;
pub mod frequency_trend;
pub mod item_affinity;
pub mod operational_risk;
pub mod order_fulfillment;
pub mod order_line_fulfillment;
pub mod shopper_health;
pub mod weekly_ad_slate;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::marker::PhantomData;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::decision::Confidence;
use crate::core::decision::Decision;
use crate::core::decision::DecisionError;
use crate::core::decision::DecisionState;
use crate::core::decision::EvaluationResult;
use crate::core::decision::VersionInfo;
use crate::core::evidence::Evidence;
use crate::core::evidence::EvidenceSet;
use crate::core::identifiers::EvidenceId;
use crate::core::identifiers::PrimitiveVersion;
use crate::core::identifiers::SubjectId;
use crate::core::input::InputRecord;
use crate::core::time::TimeError;
use crate::core::time::format_rfc3339;
use crate::interfaces::ResolvedConfig;

pub use coupon_offer_set::ShopperCouponOfferSet;
pub use customer_impact::CustomerOrderImpactRisk;
pub use frequency_trend::ShopperFrequencyTrend;
pub use item_affinity::ShopperItemAffinityScore;
pub use operational_risk::OperationalRisk;
pub use order_fulfillment::OrderFulfillmentRisk;
pub use order_line_fulfillment::OrderLineFulfillmentRisk;
pub use shopper_health::ShopperHealthClassification;
pub use weekly_ad_slate::ShopperWeeklyAdSlate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Version of every built-in primitive.
pub const BUILTIN_PRIMITIVE_VERSION: &str = "1.0.0";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Config binding errors raised before any input is fetched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Settings could not be parsed into the primitive's config.
    #[error("invalid primitive config for {primitive}: {message}")]
    InvalidConfig {
        /// Primitive name.
        primitive: String,
        /// Failure description.
        message: String,
    },
}

impl BindError {
    /// Creates an invalid-config error.
    #[must_use]
    pub fn invalid(primitive: &str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            primitive: primitive.to_string(),
            message: message.into(),
        }
    }
}

/// Per-input evaluation errors. A single error aborts the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Input facts could not be parsed.
    #[error("invalid input for subject {subject_id}: {message}")]
    InvalidInput {
        /// Subject identifier.
        subject_id: String,
        /// Failure description.
        message: String,
    },
    /// Produced decision violated a record invariant.
    #[error("invalid decision for subject {subject_id}: {source}")]
    InvalidDecision {
        /// Subject identifier.
        subject_id: String,
        /// Violated invariant.
        source: DecisionError,
    },
    /// Timestamp could not be rendered.
    #[error("evaluation time error: {0}")]
    Time(String),
}

impl From<TimeError> for EvaluationError {
    fn from(error: TimeError) -> Self {
        Self::Time(error.to_string())
    }
}

// ============================================================================
// SECTION: Fetch Capability
// ============================================================================

/// Input shape a primitive needs from the inputs repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FetchCapability {
    /// Capability name understood by inputs repositories.
    pub name: &'static str,
    /// Subject type of the fetched rows.
    pub subject_type: &'static str,
}

// ============================================================================
// SECTION: Primitive Trait
// ============================================================================

/// Typed input handed to a primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveInput<F> {
    /// Subject type.
    pub subject_type: String,
    /// Subject identifier.
    pub subject_id: SubjectId,
    /// As-of timestamp of the facts.
    pub as_of_ts: OffsetDateTime,
    /// Primitive-specific facts.
    pub facts: F,
}

/// Typed decision primitive.
pub trait Primitive: Send + Sync + 'static {
    /// Registered primitive name.
    const NAME: &'static str;
    /// Rule table version.
    const VERSION: &'static str;
    /// Inputs the primitive consumes.
    const FETCH_CAPABILITY: FetchCapability;
    /// States the primitive may emit.
    const STATES: &'static [DecisionState];

    /// Tenant-configurable settings.
    type Config: DeserializeOwned + Serialize + Default + Send + Sync + 'static;
    /// Per-subject facts.
    type Facts: DeserializeOwned;

    /// Validates config after parsing.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] when a setting is out of range.
    fn validate_config(_config: &Self::Config) -> Result<(), BindError> {
        Ok(())
    }

    /// Evaluates one subject. `None` requests sparse emission.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] when the result cannot be built.
    fn evaluate(
        input: &PrimitiveInput<Self::Facts>,
        config: &Self::Config,
        versions: &VersionInfo,
    ) -> Result<Option<EvaluationResult>, EvaluationError>;
}

// ============================================================================
// SECTION: Type-Erased Evaluators
// ============================================================================

/// Registry-facing evaluator.
pub trait Evaluator: Send + Sync {
    /// Primitive name.
    fn name(&self) -> &'static str;

    /// Primitive version.
    fn version(&self) -> &'static str;

    /// States the primitive may emit.
    fn states(&self) -> &'static [DecisionState];

    /// Inputs the primitive consumes.
    fn fetch_capability(&self) -> FetchCapability;

    /// Returns the default settings as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] when the defaults cannot be serialized.
    fn default_settings(&self) -> Result<Map<String, Value>, BindError>;

    /// Parses and validates config, returning an evaluator ready for inputs.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] when the settings are invalid.
    fn bind(&self, config: &ResolvedConfig) -> Result<Box<dyn BoundEvaluator>, BindError>;
}

/// Evaluator bound to parsed config for one run.
pub trait BoundEvaluator: Send {
    /// States the primitive may emit.
    fn states(&self) -> &'static [DecisionState];

    /// Evaluates one input record.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationError`] when the facts or result are invalid.
    fn evaluate(&self, record: &InputRecord) -> Result<Option<EvaluationResult>, EvaluationError>;
}

/// Adapter from a typed [`Primitive`] to [`Evaluator`].
pub struct PrimitiveEvaluator<P> {
    /// Primitive marker.
    marker: PhantomData<fn() -> P>,
}

impl<P: Primitive> PrimitiveEvaluator<P> {
    /// Creates the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<P: Primitive> Default for PrimitiveEvaluator<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Primitive> Evaluator for PrimitiveEvaluator<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn version(&self) -> &'static str {
        P::VERSION
    }

    fn states(&self) -> &'static [DecisionState] {
        P::STATES
    }

    fn fetch_capability(&self) -> FetchCapability {
        P::FETCH_CAPABILITY
    }

    fn default_settings(&self) -> Result<Map<String, Value>, BindError> {
        match serde_json::to_value(P::Config::default()) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(err) => Err(BindError::invalid(P::NAME, err.to_string())),
        }
    }

    fn bind(&self, config: &ResolvedConfig) -> Result<Box<dyn BoundEvaluator>, BindError> {
        let parsed: P::Config = serde_json::from_value(Value::Object(config.settings.clone()))
            .map_err(|err| BindError::invalid(P::NAME, err.to_string()))?;
        P::validate_config(&parsed)?;
        Ok(Box::new(BoundPrimitive::<P> {
            config: parsed,
            versions: VersionInfo {
                primitive_version: PrimitiveVersion::new(P::VERSION),
                canonical_version: config.canonical_version.clone(),
                config_version: config.config_version.clone(),
            },
        }))
    }
}

/// Primitive bound to parsed config.
struct BoundPrimitive<P: Primitive> {
    /// Parsed config.
    config: P::Config,
    /// Version stamp applied to every decision.
    versions: VersionInfo,
}

impl<P: Primitive> BoundEvaluator for BoundPrimitive<P> {
    fn states(&self) -> &'static [DecisionState] {
        P::STATES
    }

    fn evaluate(&self, record: &InputRecord) -> Result<Option<EvaluationResult>, EvaluationError> {
        let facts: P::Facts = serde_json::from_value(Value::Object(record.facts.clone()))
            .map_err(|err| EvaluationError::InvalidInput {
                subject_id: record.subject_id.to_string(),
                message: err.to_string(),
            })?;
        let input = PrimitiveInput {
            subject_type: record.subject_type.clone(),
            subject_id: record.subject_id.clone(),
            as_of_ts: record.as_of_ts,
            facts,
        };
        P::evaluate(&input, &self.config, &self.versions)
    }
}

// ============================================================================
// SECTION: Rule Tables
// ============================================================================

/// One row of a priority-ordered decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Rule identifier cross-referenced by evidence.
    pub rule_id: &'static str,
    /// State emitted when the rule fires.
    pub state: DecisionState,
    /// Confidence emitted when the rule fires.
    pub confidence: Confidence,
    /// Drivers emitted when the rule fires.
    pub drivers: &'static [&'static str],
}

impl Rule {
    /// Returns the rule's drivers as owned strings.
    #[must_use]
    pub fn driver_codes(&self) -> Vec<String> {
        self.drivers.iter().map(|driver| (*driver).to_string()).collect()
    }
}

// ============================================================================
// SECTION: Result Assembly
// ============================================================================

/// Returns `evidence-{subject}{suffix}`.
#[must_use]
pub fn evidence_id_for(subject_id: &SubjectId, suffix: &str) -> EvidenceId {
    EvidenceId::new(format!("evidence-{subject_id}{suffix}"))
}

/// Parts of a single-evidence result.
#[derive(Debug, Clone)]
pub struct ResultParts {
    /// Decision state.
    pub state: DecisionState,
    /// Decision confidence.
    pub confidence: Confidence,
    /// Ordered drivers.
    pub drivers: Vec<String>,
    /// Decision metrics.
    pub metrics: Map<String, Value>,
    /// Evidence identifier.
    pub evidence_id: EvidenceId,
    /// Rule ids recorded in evidence.
    pub rule_ids: Vec<String>,
    /// Thresholds recorded in evidence.
    pub thresholds: Map<String, Value>,
    /// Source references recorded in evidence.
    pub references: Map<String, Value>,
}

impl ResultParts {
    /// Starts parts from a fired rule.
    #[must_use]
    pub fn from_rule(rule: &Rule, evidence_id: EvidenceId) -> Self {
        Self {
            state: rule.state,
            confidence: rule.confidence,
            drivers: rule.driver_codes(),
            metrics: Map::new(),
            evidence_id,
            rule_ids: vec![rule.rule_id.to_string()],
            thresholds: Map::new(),
            references: Map::new(),
        }
    }

    /// Builds the decision and its single evidence record, stamped at `as_of`.
    #[must_use]
    pub fn into_result(self, as_of: OffsetDateTime, versions: &VersionInfo) -> EvaluationResult {
        let evidence = Evidence {
            evidence_id: self.evidence_id.clone(),
            rule_ids: self.rule_ids,
            thresholds: self.thresholds,
            references: self.references,
            observed_at: as_of,
        };
        let decision = Decision {
            state: self.state,
            confidence: self.confidence,
            drivers: self.drivers,
            metrics: self.metrics,
            evidence_refs: vec![self.evidence_id],
            versions: versions.clone(),
            computed_at: as_of,
            valid_until: None,
        };
        EvaluationResult {
            decision,
            evidence_set: EvidenceSet::single(evidence),
        }
    }
}

/// Unwraps a `json!` object literal into a map.
#[must_use]
pub fn json_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Renders a timestamp as a JSON string.
///
/// # Errors
///
/// Returns [`EvaluationError::Time`] when the timestamp cannot be formatted.
pub fn timestamp_value(value: OffsetDateTime) -> Result<Value, EvaluationError> {
    Ok(Value::String(format_rfc3339(value)?))
}

/// Renders an optional timestamp as a JSON string or null.
///
/// # Errors
///
/// Returns [`EvaluationError::Time`] when the timestamp cannot be formatted.
pub fn optional_timestamp_value(value: Option<OffsetDateTime>) -> Result<Value, EvaluationError> {
    value.map_or(Ok(Value::Null), timestamp_value)
}

// ============================================================================
// SECTION: Shared Fact Types
// ============================================================================

/// Reference to a child decision used by rollup primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildDecisionRef {
    /// Child subject identifier.
    #[serde(alias = "line_subject_id", alias = "order_subject_id")]
    pub subject_id: String,
    /// Child decision state.
    pub decision_state: String,
    /// Child evidence identifiers.
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

/// Maximum child references copied into rollup evidence.
pub const MAX_SOURCE_REFS: usize = 100;

/// Renders the first [`MAX_SOURCE_REFS`] child references, naming the id field `id_key`.
#[must_use]
pub fn capped_source_refs(refs: &[ChildDecisionRef], id_key: &str) -> Value {
    Value::Array(
        refs.iter()
            .take(MAX_SOURCE_REFS)
            .map(|child| {
                let mut entry = Map::new();
                entry.insert(id_key.to_string(), Value::String(child.subject_id.clone()));
                entry.insert(
                    "decision_state".to_string(),
                    Value::String(child.decision_state.clone()),
                );
                entry.insert(
                    "evidence_refs".to_string(),
                    Value::Array(child.evidence_refs.iter().cloned().map(Value::String).collect()),
                );
                Value::Object(entry)
            })
            .collect(),
    )
}
