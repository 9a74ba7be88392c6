// crates/decision-pipeline-core/src/runtime/retry.rs
// ============================================================================
// Module: Transient Retry
// Description: Bounded exponential backoff for repository calls.
// Purpose: Absorb short infrastructure outages without masking real failures.
// Dependencies: crate::interfaces, serde, tracing
// ============================================================================

//! ## Overview
//! Only [`RepositoryError::Transient`] is retried. Every other error, and the
//! last transient error once attempts are exhausted, is returned unchanged.
//! Delays grow by `multiplier` per attempt and are capped at `max_delay_ms`.
//! The [`Sleeper`] seam lets tests observe delays without waiting.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::interfaces::RepositoryError;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Retry policy for transient repository errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound on a single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Returns a policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Returns the delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_sign_loss,
            clippy::cast_possible_truncation,
            reason = "Delays are clamped to max_delay_ms before conversion."
        )]
        let millis = {
            let raw = (self.initial_delay_ms as f64) * self.multiplier.max(1.0).powi(exponent);
            raw.min(self.max_delay_ms as f64).max(0.0) as u64
        };
        Duration::from_millis(millis)
    }
}

// ============================================================================
// SECTION: Sleeper
// ============================================================================

/// Blocks the current thread between attempts.
pub trait Sleeper {
    /// Sleeps for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Runs `operation`, retrying transient failures per `policy`.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// `max_attempts` is reached.
pub fn retry_transient<T, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut operation: F,
) -> Result<T, RepositoryError>
where
    F: FnMut() -> Result<T, RepositoryError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient repository error; retrying"
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
