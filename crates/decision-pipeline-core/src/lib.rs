// crates/decision-pipeline-core/src/lib.rs
// ============================================================================
// Module: Decision Pipeline Core Library
// Description: Public API surface for the decision pipeline core.
// Purpose: Expose core types, the activation engine, primitives, and runtime.
// Dependencies: crate::{core, activation, primitives, registry, interfaces, persistence, runtime}
// ============================================================================

//! ## Overview
//! Decision pipeline core computes per-subject business decisions from
//! canonical facts and persists them idempotently. Primitives are pure rule
//! tables registered once in a [`Registry`]; the [`Runner`] resolves one per
//! run, streams inputs through it, and writes decisions and evidence through
//! injected ports. The activation engine is shared by the selection
//! primitives that pick a ranked set of items per shopper.
//!
//! The crate is backend-agnostic: stores, config sources, and schedulers
//! integrate through the traits in [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod activation;
pub mod core;
pub mod interfaces;
pub mod persistence;
pub mod primitives;
pub mod registry;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::Clock;
pub use interfaces::ConfigProvider;
pub use interfaces::ConfigProviderError;
pub use interfaces::DEFAULT_CANONICAL_VERSION;
pub use interfaces::EventError;
pub use interfaces::EventPublisher;
pub use interfaces::InputStream;
pub use interfaces::InputsRepository;
pub use interfaces::LockError;
pub use interfaces::LockManager;
pub use interfaces::OutputsRepository;
pub use interfaces::ProvisioningError;
pub use interfaces::ReadinessError;
pub use interfaces::ReadinessGate;
pub use interfaces::ReadinessVerdict;
pub use interfaces::RepositoryError;
pub use interfaces::ResolvedConfig;
pub use interfaces::RunRegistry;
pub use interfaces::RunRegistryError;
pub use persistence::DecisionRow;
pub use persistence::EvidenceKey;
pub use persistence::EvidenceRow;
pub use persistence::NaturalKey;
pub use persistence::PersistenceError;
pub use persistence::UpsertBackend;
pub use persistence::UpsertOptions;
pub use persistence::WriteMode;
pub use primitives::BindError;
pub use primitives::EvaluationError;
pub use primitives::Evaluator;
pub use primitives::FetchCapability;
pub use primitives::Primitive;
pub use registry::PrimitiveDescriptor;
pub use registry::Registry;
pub use registry::RegistryBuilder;
pub use registry::RegistryError;
pub use runtime::CancellationToken;
pub use runtime::JobManager;
pub use runtime::RetryPolicy;
pub use runtime::RunError;
pub use runtime::RunOutcome;
pub use runtime::Runner;
