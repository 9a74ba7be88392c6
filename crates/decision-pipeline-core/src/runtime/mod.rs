// crates/decision-pipeline-core/src/runtime/mod.rs
// ============================================================================
// Module: Decision Pipeline Runtime
// Description: Runner, job manager, retry, cancellation, and in-memory ports.
// Purpose: Execute primitive runs against injected repositories.
// Dependencies: crate::{core, interfaces, persistence, primitives, registry}
// ============================================================================

//! ## Overview
//! Runtime modules drive a run from lock acquisition to audit. Every binary
//! and test goes through the same [`Runner`] so lifecycle behavior stays
//! uniform across entry points.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod cancellation;
pub mod jobs;
pub mod memory;
pub mod retry;
pub mod runner;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cancellation::CancellationToken;
pub use jobs::DEFAULT_JOB_MAX_AGE;
pub use jobs::JobError;
pub use jobs::JobHandle;
pub use jobs::JobManager;
pub use jobs::JobState;
pub use jobs::JobStatus;
pub use memory::FixedClock;
pub use memory::InMemoryInputsRepository;
pub use memory::InMemoryOutputsRepository;
pub use memory::InMemoryRunRegistry;
pub use memory::LocalLockManager;
pub use memory::NoopEventPublisher;
pub use memory::NoopLockManager;
pub use memory::NoopRunRegistry;
pub use memory::RecordingEventPublisher;
pub use memory::StaticConfigProvider;
pub use memory::StaticReadinessGate;
pub use memory::SystemClock;
pub use retry::RetryPolicy;
pub use retry::Sleeper;
pub use retry::ThreadSleeper;
pub use retry::retry_transient;
pub use runner::CANCELLED_MESSAGE;
pub use runner::RunError;
pub use runner::RunOutcome;
pub use runner::Runner;
