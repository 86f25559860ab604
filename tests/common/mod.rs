//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use dtxn::config::{CoordinatorConfig, DemoConfig};
use dtxn::interfaces::participant::{
    ActionContext, Operation, ParticipantClient, ParticipantError, Result, BRANCH_ID_KEY,
    COUNT_KEY, RESOURCE_ID_KEY, XID_KEY,
};
use dtxn::services::InMemoryDeployment;

pub const PRODUCT: &str = "product-1";
pub const OWNER: &str = "user-1";

/// Demo deployment seeded with 20 units of stock and a 10000 balance.
pub async fn deployment() -> InMemoryDeployment {
    InMemoryDeployment::seed(CoordinatorConfig::for_test(), &DemoConfig::default())
        .await
        .unwrap()
}

/// Context of a branch as the coordinator would deliver it.
pub fn branch_context(xid: &str, branch_id: &str, count: u64) -> ActionContext {
    ActionContext::new()
        .with(XID_KEY, xid)
        .with(BRANCH_ID_KEY, branch_id)
        .with(RESOURCE_ID_KEY, PRODUCT)
        .with(COUNT_KEY, count)
}

/// Fails one operation with a transient error a fixed number of times, then
/// forwards to the wrapped participant.
pub struct FlakyParticipant {
    inner: Arc<dyn ParticipantClient>,
    operation: Operation,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyParticipant {
    pub fn new(inner: Arc<dyn ParticipantClient>, operation: Operation, failures: usize) -> Self {
        Self {
            inner,
            operation,
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Calls of the flaky operation, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParticipantClient for FlakyParticipant {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, operation: Operation, context: &ActionContext) -> Result<()> {
        if operation == self.operation {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(ParticipantError::Transient("connection reset".to_string()));
            }
        }
        self.inner.call(operation, context).await
    }
}

/// Sleeps before forwarding one operation, so a short call timeout drops the
/// request before it reaches the participant.
pub struct SlowParticipant {
    inner: Arc<dyn ParticipantClient>,
    operation: Operation,
    delay: Duration,
}

impl SlowParticipant {
    pub fn new(inner: Arc<dyn ParticipantClient>, operation: Operation, delay: Duration) -> Self {
        Self {
            inner,
            operation,
            delay,
        }
    }
}

#[async_trait]
impl ParticipantClient for SlowParticipant {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, operation: Operation, context: &ActionContext) -> Result<()> {
        if operation == self.operation {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.call(operation, context).await
    }
}
