//! Retry utilities with exponential backoff, cap, and jitter.
//!
//! First-phase calls retry a bounded number of times through `backon`, with
//! the backoff built by `FirstPhaseRetryConfig`. Finalize calls (Confirm, Cancel,
//! compensate, complete, AT commit and rollback) use [`RetryConfig`] in an
//! explicit loop that may be unbounded.

use std::time::Duration;

use crate::interfaces::participant::ParticipantError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for first retry (before jitter).
    pub base_delay: Duration,
    /// Maximum delay cap (before jitter).
    pub max_delay: Duration,
    /// Maximum number of retry attempts; `None` retries until acknowledged.
    pub max_retries: Option<u32>,
    /// Jitter factor: delay is multiplied by random value in [1-jitter, 1+jitter].
    /// Set to 0.0 for no jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            max_retries: None,
            jitter: 0.25, // ±25% jitter
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: delay = base * 2^attempt, capped at max_delay.
    /// Jitter is applied using a simple hash-based approach to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(1u64 << attempt.min(20));

        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as u64);

        // Current time nanos + attempt as entropy source
        let jittered_ms = if self.jitter > 0.0 {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0) as u64;
            let hash = now.wrapping_mul(31).wrapping_add(attempt as u64 * 17);
            let jitter_pct = ((hash % 1000) as f64 / 1000.0) * 2.0 - 1.0; // -1.0 to 1.0
            let jitter_factor = 1.0 + (jitter_pct * self.jitter);
            (capped_ms as f64 * jitter_factor) as u64
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms)
    }

    /// Check if another retry attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_retries {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Determines if a participant error is retryable.
///
/// Retryable: transport failures and per-call timeouts.
///
/// Non-retryable:
/// - `Rejected`: business refusal, will never succeed on retry
/// - `InvariantViolation`: local state is inconsistent, needs an operator
pub fn is_retryable(err: &ParticipantError) -> bool {
    err.is_transient()
}
