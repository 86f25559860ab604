//! Inventory participants.
//!
//! `TccInventory` reserves stock into `frozen` on Try and settles or releases
//! it on Confirm/Cancel. `SagaInventory` consumes stock directly on forward
//! and gives it back on compensate.
//!
//! Saga steps keep no row of their own: a step is PROCESSING once its
//! forward landed, then SUCCESS on complete or FAIL on compensate, and
//! [`SagaInventory::step_status`] reads that off the fence.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::interfaces::participant::{ActionContext, ParticipantError, Rejection, Result};
use crate::interfaces::resource::{SagaResource, TccResource};
use crate::ledger::{LedgerKind, OrderStatus, ResourceLedger};

use super::fence::{
    run_first_phase, run_second_phase, BranchFence, FenceKey, FenceState, Resolution,
};
use super::positive_count;

async fn insufficient(ledger: &ResourceLedger, resource_id: &str, requested: u64) -> ParticipantError {
    let available = ledger
        .get(resource_id)
        .await
        .map(|row| row.residue)
        .unwrap_or(0);
    warn!(ledger = %ledger.name(), resource_id, requested, available, "Insufficient resource");
    Rejection::InsufficientResource {
        resource_id: resource_id.to_string(),
        requested,
        available,
    }
    .into()
}

/// TCC inventory: `total == used + frozen + residue`.
pub struct TccInventory {
    ledger: Arc<ResourceLedger>,
    fence: BranchFence,
}

impl TccInventory {
    pub fn new(ledger: Arc<ResourceLedger>) -> Self {
        debug_assert_eq!(ledger.kind(), LedgerKind::Reserving);
        let fence = BranchFence::new(ledger.name());
        Self { ledger, fence }
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn fence(&self) -> &BranchFence {
        &self.fence
    }
}

#[async_trait]
impl TccResource for TccInventory {
    async fn try_reserve(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let resource_id = context.resource_id()?;
        let count = positive_count(context)?;

        run_first_phase(&self.fence, &key, async {
            match self.ledger.freeze(resource_id, count).await? {
                Some(applied) => {
                    info!(
                        xid = %key.xid,
                        resource_id,
                        count,
                        residue = applied.after.residue,
                        frozen = applied.after.frozen(),
                        "Try: stock frozen"
                    );
                    Ok(())
                }
                None => Err(insufficient(&self.ledger, resource_id, count).await),
            }
        })
        .await
    }

    async fn confirm(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let resource_id = context.resource_id()?;
        let count = positive_count(context)?;

        run_second_phase(&self.fence, &key, Resolution::Commit, async {
            match self.ledger.settle(resource_id, count).await? {
                Some(applied) => {
                    info!(xid = %key.xid, resource_id, count, used = applied.after.used, "Confirm: frozen stock settled");
                }
                None => {
                    warn!(xid = %key.xid, resource_id, count, "Confirm: nothing frozen, treating as already confirmed");
                }
            }
            Ok::<_, ParticipantError>(())
        })
        .await
    }

    async fn cancel(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let resource_id = context.resource_id()?;
        let count = positive_count(context)?;

        run_second_phase(&self.fence, &key, Resolution::Rollback, async {
            match self.ledger.release(resource_id, count).await? {
                Some(applied) => {
                    info!(xid = %key.xid, resource_id, count, residue = applied.after.residue, "Cancel: frozen stock released");
                }
                None => {
                    warn!(xid = %key.xid, resource_id, count, "Cancel: nothing frozen, treating as empty rollback");
                }
            }
            Ok::<_, ParticipantError>(())
        })
        .await
    }
}

/// Saga inventory: `total == used + residue`.
pub struct SagaInventory {
    ledger: Arc<ResourceLedger>,
    fence: BranchFence,
}

impl SagaInventory {
    pub fn new(ledger: Arc<ResourceLedger>) -> Self {
        debug_assert_eq!(ledger.kind(), LedgerKind::Direct);
        let fence = BranchFence::new(ledger.name());
        Self { ledger, fence }
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn fence(&self) -> &BranchFence {
        &self.fence
    }

    /// Status of one saga step, `None` if the branch never reached us.
    pub async fn step_status(&self, key: &FenceKey) -> Option<OrderStatus> {
        self.fence.state(key).await.map(FenceState::step_status)
    }
}

#[async_trait]
impl SagaResource for SagaInventory {
    async fn forward(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let resource_id = context.resource_id()?;
        let count = positive_count(context)?;

        run_first_phase(&self.fence, &key, async {
            match self.ledger.consume(resource_id, count).await? {
                Some(applied) => {
                    info!(xid = %key.xid, resource_id, count, residue = applied.after.residue, "Forward: stock reduced, step PROCESSING");
                    Ok(())
                }
                None => Err(insufficient(&self.ledger, resource_id, count).await),
            }
        })
        .await
    }

    async fn compensate(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let resource_id = context.resource_id()?;
        let count = positive_count(context)?;

        run_second_phase(&self.fence, &key, Resolution::Rollback, async {
            match self.ledger.restore(resource_id, count).await? {
                Some(applied) => {
                    info!(xid = %key.xid, resource_id, count, residue = applied.after.residue, "Compensate: stock restored, step FAIL");
                    Ok(())
                }
                None => Err(ParticipantError::InvariantViolation(format!(
                    "cannot restore {count} of {resource_id}: used is below the forward amount"
                ))),
            }
        })
        .await
    }

    async fn complete(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(&self.fence, &key, Resolution::Commit, async {
            info!(xid = %key.xid, branch_id = %key.branch_id, "Complete: step SUCCESS");
            Ok::<_, ParticipantError>(())
        })
        .await
    }
}
