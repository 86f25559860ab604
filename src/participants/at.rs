//! In-memory AT collaborator.
//!
//! An AT branch is a single local transaction whose undo belongs to the
//! participant. The reduce call records before/after images of the touched
//! row; a global rollback replays the difference in reverse, a global commit
//! discards the record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::interfaces::participant::{ActionContext, ParticipantError, Rejection, Result};
use crate::interfaces::resource::AtResource;
use crate::ledger::{LedgerKind, LedgerRow, OrderBook, OrderStatus, ResourceLedger};

use super::fence::{run_first_phase, run_second_phase, BranchFence, FenceKey, Resolution};
use super::order::{new_order, settle_order};
use super::positive_count;

/// Undo record of one AT branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub before: LedgerRow,
    pub after: LedgerRow,
}

impl UndoRecord {
    /// Amount moved into `used` by the branch.
    pub fn delta(&self) -> u64 {
        self.after.used.saturating_sub(self.before.used)
    }
}

pub struct AtInventory {
    ledger: Arc<ResourceLedger>,
    fence: BranchFence,
    undo_log: RwLock<HashMap<FenceKey, UndoRecord>>,
}

impl AtInventory {
    pub fn new(ledger: Arc<ResourceLedger>) -> Self {
        debug_assert_eq!(ledger.kind(), LedgerKind::Direct);
        let fence = BranchFence::new(ledger.name());
        Self {
            ledger,
            fence,
            undo_log: RwLock::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    /// Undo records not yet resolved by a commit or rollback.
    pub async fn pending_undo(&self) -> usize {
        self.undo_log.read().await.len()
    }
}

#[async_trait]
impl AtResource for AtInventory {
    async fn reduce(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let resource_id = context.resource_id()?;
        let count = positive_count(context)?;

        run_first_phase(&self.fence, &key, async {
            let Some(applied) = self.ledger.consume(resource_id, count).await? else {
                let available = self
                    .ledger
                    .get(resource_id)
                    .await
                    .map(|row| row.residue)
                    .unwrap_or(0);
                warn!(xid = %key.xid, resource_id, count, available, "Insufficient resource");
                return Err(ParticipantError::from(Rejection::InsufficientResource {
                    resource_id: resource_id.to_string(),
                    requested: count,
                    available,
                }));
            };

            info!(xid = %key.xid, resource_id, count, residue = applied.after.residue, "Reduce: stock consumed, undo recorded");
            self.undo_log.write().await.insert(
                key.clone(),
                UndoRecord {
                    before: applied.before,
                    after: applied.after,
                },
            );
            Ok(())
        })
        .await
    }

    async fn commit(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(&self.fence, &key, Resolution::Commit, async {
            self.undo_log.write().await.remove(&key);
            info!(xid = %key.xid, branch_id = %key.branch_id, "AT commit: undo record dropped");
            Ok::<_, ParticipantError>(())
        })
        .await
    }

    async fn rollback(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(&self.fence, &key, Resolution::Rollback, async {
            let record = self.undo_log.read().await.get(&key).cloned();
            let Some(record) = record else {
                warn!(xid = %key.xid, branch_id = %key.branch_id, "AT rollback: no undo record");
                return Ok(());
            };

            let resource_id = record.after.resource_id.as_str();
            let delta = record.delta();
            if self.ledger.restore(resource_id, delta).await?.is_none() {
                error!(xid = %key.xid, resource_id, delta, "AT rollback: row no longer matches after-image");
                return Err(ParticipantError::InvariantViolation(format!(
                    "undo of {delta} on {resource_id} would drive used negative"
                )));
            }

            self.undo_log.write().await.remove(&key);
            info!(xid = %key.xid, resource_id, delta, "AT rollback: undo applied");
            Ok(())
        })
        .await
    }
}

/// AT order service: reduce inserts `INIT`, commit `SUCCESS`, rollback
/// `CANCEL`.
pub struct AtOrders {
    orders: Arc<OrderBook>,
    fence: BranchFence,
}

impl AtOrders {
    pub fn new(orders: Arc<OrderBook>) -> Self {
        Self {
            orders,
            fence: BranchFence::new("order-at"),
        }
    }

    pub fn orders(&self) -> &Arc<OrderBook> {
        &self.orders
    }
}

#[async_trait]
impl AtResource for AtOrders {
    async fn reduce(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let order = new_order(context, OrderStatus::Init)?;

        run_first_phase(&self.fence, &key, async {
            let order = self.orders.insert(order).await;
            info!(xid = %order.xid, order_id = order.id, "Reduce: order created INIT");
            Ok::<_, ParticipantError>(())
        })
        .await
    }

    async fn commit(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(
            &self.fence,
            &key,
            Resolution::Commit,
            settle_order(&self.orders, context, &[OrderStatus::Init], OrderStatus::Success),
        )
        .await
    }

    async fn rollback(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(
            &self.fence,
            &key,
            Resolution::Rollback,
            settle_order(&self.orders, context, &[OrderStatus::Init], OrderStatus::Cancel),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::participant::{BRANCH_ID_KEY, COUNT_KEY, RESOURCE_ID_KEY, XID_KEY};

    fn ctx(branch: &str, count: u64) -> ActionContext {
        ActionContext::new()
            .with(XID_KEY, "tx-1")
            .with(BRANCH_ID_KEY, branch)
            .with(RESOURCE_ID_KEY, "p-1")
            .with(COUNT_KEY, count)
    }

    async fn inventory(stock: u64) -> AtInventory {
        let ledger = Arc::new(ResourceLedger::new("inventory-at", LedgerKind::Direct));
        ledger.seed(LedgerRow::direct("p-1", stock)).await.unwrap();
        AtInventory::new(ledger)
    }

    #[tokio::test]
    async fn test_reduce_then_rollback_restores() {
        let inv = inventory(10).await;
        let c = ctx("b-1", 4);

        inv.reduce(&c).await.unwrap();
        assert_eq!(inv.ledger().get("p-1").await.unwrap().residue, 6);
        assert_eq!(inv.pending_undo().await, 1);

        inv.rollback(&c).await.unwrap();
        inv.rollback(&c).await.unwrap();
        assert_eq!(
            inv.ledger().get("p-1").await.unwrap(),
            LedgerRow::direct("p-1", 10)
        );
        assert_eq!(inv.pending_undo().await, 0);
    }

    #[tokio::test]
    async fn test_reduce_then_commit_keeps_effect() {
        let inv = inventory(10).await;
        let c = ctx("b-1", 4);

        inv.reduce(&c).await.unwrap();
        inv.commit(&c).await.unwrap();
        let row = inv.ledger().get("p-1").await.unwrap();
        assert_eq!((row.used, row.residue), (4, 6));
        assert_eq!(inv.pending_undo().await, 0);
    }

    #[tokio::test]
    async fn test_reduce_fails_fast_when_short() {
        let inv = inventory(3).await;
        let err = inv.reduce(&ctx("b-1", 4)).await.unwrap_err();
        assert!(matches!(
            err,
            ParticipantError::Rejected(Rejection::InsufficientResource { .. })
        ));
        assert_eq!(inv.pending_undo().await, 0);
    }

    #[tokio::test]
    async fn test_rollback_detects_lost_update() {
        let inv = inventory(10).await;
        let c = ctx("b-1", 4);
        inv.reduce(&c).await.unwrap();

        // Someone else moves the consumed stock back outside the protocol.
        inv.ledger().restore("p-1", 4).await.unwrap().unwrap();

        let err = inv.rollback(&c).await.unwrap_err();
        assert!(matches!(err, ParticipantError::InvariantViolation(_)));
        assert_eq!(inv.pending_undo().await, 1);
    }

    #[tokio::test]
    async fn test_at_orders() {
        let book = Arc::new(OrderBook::new());
        let svc = AtOrders::new(book.clone());
        let c = ctx("b-1", 1)
            .with(crate::interfaces::participant::OWNER_ID_KEY, "u-1")
            .with(crate::interfaces::participant::AMOUNT_KEY, 200i64);

        svc.reduce(&c).await.unwrap();
        svc.rollback(&c).await.unwrap();
        assert_eq!(book.by_xid("tx-1").await[0].status, OrderStatus::Cancel);
    }
}
