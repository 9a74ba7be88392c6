// crates/decision-pipeline-core/src/runtime/cancellation.rs
// ============================================================================
// Module: Cooperative Cancellation
// Description: Shared flag checked by the runner between inputs.
// Purpose: Let callers stop a run without killing its thread.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`CancellationToken`] is a cloneable handle over one atomic flag. The
//! job manager keeps a clone per job and the runner polls its clone once per
//! input. Cancellation is one-way: a cancelled token never resets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Token
// ============================================================================

/// Cloneable cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Shared flag.
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation for every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
