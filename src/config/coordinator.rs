//! Coordinator and demo configuration.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Deserialize;

use crate::utils::retry::RetryConfig;

/// Default per-call deadline for first-phase calls.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 3_000;

/// Default number of terminal transactions kept for lookup.
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 10_000;

/// Bounded retry of Try / forward / reduce calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirstPhaseRetryConfig {
    /// Delay before the first retry.
    pub min_delay_ms: u64,
    /// Delay cap.
    pub max_delay_ms: u64,
    /// Retries after the initial attempt.
    pub max_attempts: usize,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for FirstPhaseRetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 50,
            max_delay_ms: 1_000,
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl FirstPhaseRetryConfig {
    /// Build the `backon` policy for first-phase calls.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_attempts);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Retry of Confirm / Cancel / compensate / complete / AT commit and rollback.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FinalizeRetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` (the default) retries until the participant acknowledges.
    pub max_retries: Option<u32>,
    /// Jitter factor in [0, 1].
    pub jitter: f64,
    /// Log a warning every N failed attempts of the same call.
    pub warn_every: u32,
}

impl Default for FinalizeRetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 5_000,
            max_retries: None,
            jitter: 0.25,
            warn_every: 10,
        }
    }
}

impl FinalizeRetryConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
            jitter: self.jitter.clamp(0.0, 1.0),
        }
    }
}

/// Transaction coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Deadline of one participant call, in milliseconds.
    pub call_timeout_ms: u64,
    pub first_phase: FirstPhaseRetryConfig,
    pub finalize: FinalizeRetryConfig,
    /// Terminal transactions kept for lookup; the oldest are dropped first.
    pub archive_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            first_phase: FirstPhaseRetryConfig::default(),
            finalize: FinalizeRetryConfig::default(),
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Config with short delays and no jitter, for tests.
    pub fn for_test() -> Self {
        Self {
            call_timeout_ms: 200,
            first_phase: FirstPhaseRetryConfig {
                min_delay_ms: 1,
                max_delay_ms: 5,
                max_attempts: 2,
                jitter: false,
            },
            finalize: FinalizeRetryConfig {
                base_delay_ms: 1,
                max_delay_ms: 5,
                max_retries: None,
                jitter: 0.0,
                warn_every: 10,
            },
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
        }
    }
}

/// Seed data and request of the purchase demo.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub product_id: String,
    pub owner_id: String,
    /// Initial stock of the product in every inventory ledger.
    pub stock: u64,
    /// Initial account balance, in minor units.
    pub balance: u64,
    /// Unit price, in minor units.
    pub unit_price: i64,
    /// Quantity bought per purchase.
    pub quantity: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            product_id: "product-1".to_string(),
            owner_id: "user-1".to_string(),
            stock: 20,
            balance: 10_000,
            unit_price: 100,
            quantity: 10,
        }
    }
}
