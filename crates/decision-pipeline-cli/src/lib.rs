// crates/decision-pipeline-cli/src/lib.rs
// ============================================================================
// Module: Decision Pipeline CLI Library
// Description: Support code shared by the decision-pipeline binary.
// Purpose: Expose the file-backed inputs and outputs repositories for reuse and tests.
// Dependencies: decision-pipeline-core, serde, serde_jcs, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Library half of the CLI crate. The binary in `main.rs` wires config,
//! stores, and the runner; this crate holds the pieces worth testing on
//! their own.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod inputs;
pub mod outputs;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use inputs::FileInputsRepository;
pub use inputs::InputsFileError;
pub use inputs::MAX_INPUTS_FILE_BYTES;
pub use outputs::FileOutputsRepository;
