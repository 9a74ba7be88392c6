// crates/decision-pipeline-config/src/lib.rs
// ============================================================================
// Module: Decision Pipeline Config Library
// Description: Canonical config model, validation, and config provider.
// Purpose: Single source of truth for decision-pipeline.toml semantics.
// Dependencies: decision-pipeline-core, decision-pipeline-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `decision-pipeline-config` defines the configuration model for the
//! decision pipeline binary: logging, the output store, retry, runner
//! side channels, and per-tenant primitive settings. Loading is strict and
//! fails closed; [`InlineConfigProvider`] serves the tenant tables to the
//! runner.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod provider;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use provider::DEFAULT_TENANT;
pub use provider::InlineConfigProvider;
