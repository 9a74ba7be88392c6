// crates/decision-pipeline-core/src/registry.rs
// ============================================================================
// Module: Primitive Registry
// Description: Immutable lookup from primitive name and version to evaluator.
// Purpose: Resolve evaluators and fetch capabilities before any input is read.
// Dependencies: crate::primitives, serde, thiserror
// ============================================================================

//! ## Overview
//! The registry is built once, either from the built-in primitive set via
//! [`Registry::builtin`] or incrementally through [`RegistryBuilder`], and is
//! read-only afterwards. Lookups distinguish a primitive that does not exist
//! from a primitive that exists at a different version, so callers can report
//! the two failures separately.
//!
//! # Invariants
//! - Each `(name, version)` pair maps to exactly one evaluator.
//! - Every registered name has exactly one fetch capability.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::decision::DecisionState;
use crate::primitives::CustomerOrderImpactRisk;
use crate::primitives::Evaluator;
use crate::primitives::FetchCapability;
use crate::primitives::OperationalRisk;
use crate::primitives::OrderFulfillmentRisk;
use crate::primitives::OrderLineFulfillmentRisk;
use crate::primitives::Primitive;
use crate::primitives::PrimitiveEvaluator;
use crate::primitives::ShopperCouponOfferSet;
use crate::primitives::ShopperFrequencyTrend;
use crate::primitives::ShopperHealthClassification;
use crate::primitives::ShopperItemAffinityScore;
use crate::primitives::ShopperWeeklyAdSlate;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry lookup and registration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No primitive is registered under the name (or name and version).
    #[error("unknown primitive: {0}")]
    UnknownPrimitive(String),
    /// The primitive exists but not at the requested version.
    #[error(
        "primitive version mismatch for {name}: requested {requested}, registered {registered} \
         (config version {config_version})"
    )]
    VersionMismatch {
        /// Primitive name.
        name: String,
        /// Requested version.
        requested: String,
        /// Registered versions, comma separated.
        registered: String,
        /// Config version of the run.
        config_version: String,
    },
    /// A primitive was registered twice.
    #[error("primitive already registered: {name}@{version}")]
    Duplicate {
        /// Primitive name.
        name: String,
        /// Primitive version.
        version: String,
    },
    /// A name was registered with two different fetch capabilities.
    #[error("conflicting fetch capability for primitive: {0}")]
    CapabilityConflict(String),
}

// ============================================================================
// SECTION: Descriptors
// ============================================================================

/// Public description of a registered primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimitiveDescriptor {
    /// Primitive name.
    pub name: &'static str,
    /// Primitive version.
    pub version: &'static str,
    /// Inputs the primitive consumes.
    pub fetch_capability: FetchCapability,
    /// States the primitive may emit.
    pub states: Vec<DecisionState>,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Evaluator keyed by version.
type VersionMap = BTreeMap<&'static str, Box<dyn Evaluator>>;

/// Immutable primitive registry.
pub struct Registry {
    /// Evaluators keyed by name, then version.
    evaluators: BTreeMap<&'static str, VersionMap>,
    /// Fetch capability per primitive name.
    capabilities: BTreeMap<&'static str, FetchCapability>,
}

impl Registry {
    /// Returns a registry holding every built-in primitive.
    #[must_use]
    pub fn builtin() -> Self {
        let mut builder = RegistryBuilder::new();
        builder.insert::<OperationalRisk>();
        builder.insert::<ShopperFrequencyTrend>();
        builder.insert::<ShopperHealthClassification>();
        builder.insert::<ShopperItemAffinityScore>();
        builder.insert::<OrderLineFulfillmentRisk>();
        builder.insert::<OrderFulfillmentRisk>();
        builder.insert::<CustomerOrderImpactRisk>();
        builder.insert::<ShopperWeeklyAdSlate>();
        builder.insert::<ShopperCouponOfferSet>();
        builder.build()
    }

    /// Returns the evaluator for an exact name and version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPrimitive`] when the pair is not registered.
    pub fn get(&self, name: &str, version: &str) -> Result<&dyn Evaluator, RegistryError> {
        self.evaluators
            .get(name)
            .and_then(|versions| versions.get(version))
            .map(AsRef::as_ref)
            .ok_or_else(|| RegistryError::UnknownPrimitive(format!("{name}@{version}")))
    }

    /// Confirms the primitive is registered at the requested version.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPrimitive`] for an unknown name and
    /// [`RegistryError::VersionMismatch`] when only other versions exist.
    pub fn ensure_version(
        &self,
        name: &str,
        version: &str,
        config_version: &str,
    ) -> Result<(), RegistryError> {
        let versions = self
            .evaluators
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPrimitive(name.to_string()))?;
        if versions.contains_key(version) {
            return Ok(());
        }
        Err(RegistryError::VersionMismatch {
            name: name.to_string(),
            requested: version.to_string(),
            registered: versions.keys().copied().collect::<Vec<_>>().join(","),
            config_version: config_version.to_string(),
        })
    }

    /// Returns the fetch capability for a primitive name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownPrimitive`] when the name is not registered.
    pub fn fetch_capability(&self, name: &str) -> Result<FetchCapability, RegistryError> {
        self.capabilities
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownPrimitive(name.to_string()))
    }

    /// Lists registered primitives ordered by name and version.
    #[must_use]
    pub fn list(&self) -> Vec<PrimitiveDescriptor> {
        self.evaluators
            .values()
            .flat_map(BTreeMap::values)
            .map(|evaluator| PrimitiveDescriptor {
                name: evaluator.name(),
                version: evaluator.version(),
                fetch_capability: evaluator.fetch_capability(),
                states: evaluator.states().to_vec(),
            })
            .collect()
    }

    /// Returns true when no primitives are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("primitives", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Incremental registry builder.
#[derive(Default)]
pub struct RegistryBuilder {
    /// Evaluators keyed by name, then version.
    evaluators: BTreeMap<&'static str, VersionMap>,
    /// Fetch capability per primitive name.
    capabilities: BTreeMap<&'static str, FetchCapability>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed primitive.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the name and version are taken.
    pub fn register<P: Primitive>(&mut self) -> Result<&mut Self, RegistryError> {
        self.register_evaluator(Box::new(PrimitiveEvaluator::<P>::new()))
    }

    /// Registers a type-erased evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the name and version are taken,
    /// or [`RegistryError::CapabilityConflict`] when another version of the
    /// name declared a different fetch capability.
    pub fn register_evaluator(
        &mut self,
        evaluator: Box<dyn Evaluator>,
    ) -> Result<&mut Self, RegistryError> {
        let name = evaluator.name();
        let version = evaluator.version();
        if self.evaluators.get(name).is_some_and(|versions| versions.contains_key(version)) {
            return Err(RegistryError::Duplicate {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        let capability = evaluator.fetch_capability();
        if self.capabilities.get(name).is_some_and(|existing| *existing != capability) {
            return Err(RegistryError::CapabilityConflict(name.to_string()));
        }
        self.capabilities.insert(name, capability);
        self.evaluators.entry(name).or_default().insert(version, evaluator);
        Ok(self)
    }

    /// Inserts a built-in primitive whose name is known to be unique.
    fn insert<P: Primitive>(&mut self) {
        self.capabilities.insert(P::NAME, P::FETCH_CAPABILITY);
        self.evaluators
            .entry(P::NAME)
            .or_default()
            .insert(P::VERSION, Box::new(PrimitiveEvaluator::<P>::new()));
    }

    /// Freezes the builder into a registry.
    #[must_use]
    pub fn build(self) -> Registry {
        Registry {
            evaluators: self.evaluators,
            capabilities: self.capabilities,
        }
    }
}
