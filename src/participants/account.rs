//! Account balance participant (Saga).
//!
//! Balances live in a direct ledger keyed by owner id, in minor currency
//! units: `residue` is the spendable balance and `used` what has been
//! debited by purchases.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::interfaces::participant::{
    ActionContext, ParticipantError, Rejection, Result, AMOUNT_KEY, OWNER_ID_KEY,
};
use crate::interfaces::resource::SagaResource;
use crate::ledger::{LedgerKind, ResourceLedger};

use super::fence::{run_first_phase, run_second_phase, BranchFence, FenceKey, Resolution};

fn debit_amount(context: &ActionContext) -> std::result::Result<u64, Rejection> {
    match u64::try_from(context.i64(AMOUNT_KEY)?) {
        Ok(amount) if amount > 0 => Ok(amount),
        _ => Err(Rejection::Refused("amount must be positive".to_string())),
    }
}

pub struct SagaAccount {
    ledger: Arc<ResourceLedger>,
    fence: BranchFence,
}

impl SagaAccount {
    pub fn new(ledger: Arc<ResourceLedger>) -> Self {
        debug_assert_eq!(ledger.kind(), LedgerKind::Direct);
        let fence = BranchFence::new(ledger.name());
        Self { ledger, fence }
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }
}

#[async_trait]
impl SagaResource for SagaAccount {
    async fn forward(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let owner_id = context.str(OWNER_ID_KEY)?;
        let amount = debit_amount(context)?;

        run_first_phase(&self.fence, &key, async {
            match self.ledger.consume(owner_id, amount).await? {
                Some(applied) => {
                    info!(xid = %key.xid, owner_id, amount, balance = applied.after.residue, "Forward: balance debited");
                    Ok(())
                }
                None => {
                    let available = self
                        .ledger
                        .get(owner_id)
                        .await
                        .map(|row| row.residue)
                        .unwrap_or(0);
                    warn!(xid = %key.xid, owner_id, amount, available, "Insufficient balance");
                    Err(ParticipantError::from(Rejection::InsufficientResource {
                        resource_id: owner_id.to_string(),
                        requested: amount,
                        available,
                    }))
                }
            }
        })
        .await
    }

    async fn compensate(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let owner_id = context.str(OWNER_ID_KEY)?;
        let amount = debit_amount(context)?;

        run_second_phase(&self.fence, &key, Resolution::Rollback, async {
            match self.ledger.restore(owner_id, amount).await? {
                Some(applied) => {
                    info!(xid = %key.xid, owner_id, amount, balance = applied.after.residue, "Compensate: balance refunded");
                    Ok(())
                }
                None => Err(ParticipantError::InvariantViolation(format!(
                    "cannot refund {amount} to {owner_id}: debited total is lower"
                ))),
            }
        })
        .await
    }

    async fn complete(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(&self.fence, &key, Resolution::Commit, async {
            info!(xid = %key.xid, branch_id = %key.branch_id, "Complete: debit final");
            Ok::<_, ParticipantError>(())
        })
        .await
    }
}
