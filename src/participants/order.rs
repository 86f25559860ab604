//! Order participants.
//!
//! Orders are the business record of a purchase. The first phase inserts the
//! order in a non-terminal status; the second phase moves it with a
//! conditional transition so repeated deliveries affect zero rows.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::interfaces::participant::{
    ActionContext, ParticipantError, Result, AMOUNT_KEY, OWNER_ID_KEY,
};
use crate::interfaces::resource::{SagaResource, TccResource};
use crate::ledger::{NewOrder, OrderBook, OrderStatus};

use super::fence::{run_first_phase, run_second_phase, BranchFence, FenceKey, Resolution};
use super::positive_count;

/// Build the order a first-phase call creates.
pub(crate) fn new_order(
    context: &ActionContext,
    status: OrderStatus,
) -> std::result::Result<NewOrder, ParticipantError> {
    Ok(NewOrder {
        xid: context.xid()?.to_string(),
        owner_id: context.str(OWNER_ID_KEY)?.to_string(),
        resource_id: context.resource_id()?.to_string(),
        quantity: positive_count(context)?,
        amount: context.i64(AMOUNT_KEY)?,
        status,
    })
}

/// Conditional transition of the branch's order, logging zero-row outcomes.
pub(crate) async fn settle_order(
    orders: &OrderBook,
    context: &ActionContext,
    from: &[OrderStatus],
    to: OrderStatus,
) -> Result<()> {
    let xid = context.xid()?;
    let owner_id = context.str(OWNER_ID_KEY)?;
    let resource_id = context.resource_id()?;

    let affected = orders.transition(xid, owner_id, resource_id, from, to).await;
    if affected == 0 {
        debug!(xid, owner_id, resource_id, status = %to, "Order already settled");
    } else {
        info!(xid, owner_id, resource_id, status = %to, "Order settled");
    }
    Ok(())
}

/// TCC order service: Try inserts `INIT`, Confirm `SUCCESS`, Cancel `CANCEL`.
pub struct TccOrders {
    orders: Arc<OrderBook>,
    fence: BranchFence,
}

impl TccOrders {
    pub fn new(orders: Arc<OrderBook>) -> Self {
        Self {
            orders,
            fence: BranchFence::new("order-tcc"),
        }
    }

    pub fn orders(&self) -> &Arc<OrderBook> {
        &self.orders
    }
}

#[async_trait]
impl TccResource for TccOrders {
    async fn try_reserve(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let order = new_order(context, OrderStatus::Init)?;

        run_first_phase(&self.fence, &key, async {
            let order = self.orders.insert(order).await;
            info!(xid = %order.xid, order_id = order.id, "Try: order created INIT");
            Ok::<_, ParticipantError>(())
        })
        .await
    }

    async fn confirm(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(
            &self.fence,
            &key,
            Resolution::Commit,
            settle_order(&self.orders, context, &[OrderStatus::Init], OrderStatus::Success),
        )
        .await
    }

    async fn cancel(&self, context: &ActionContext) -> Result<()> {
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

/// Saga order service: forward inserts `PROCESSING`, complete `SUCCESS`,
/// compensate `FAIL`.
pub struct SagaOrders {
    orders: Arc<OrderBook>,
    fence: BranchFence,
}

impl SagaOrders {
    pub fn new(orders: Arc<OrderBook>) -> Self {
        Self {
            orders,
            fence: BranchFence::new("order-saga"),
        }
    }

    pub fn orders(&self) -> &Arc<OrderBook> {
        &self.orders
    }
}

#[async_trait]
impl SagaResource for SagaOrders {
    async fn forward(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        let order = new_order(context, OrderStatus::Processing)?;

        run_first_phase(&self.fence, &key, async {
            let order = self.orders.insert(order).await;
            info!(xid = %order.xid, order_id = order.id, "Forward: order created PROCESSING");
            Ok::<_, ParticipantError>(())
        })
        .await
    }

    async fn compensate(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(
            &self.fence,
            &key,
            Resolution::Rollback,
            settle_order(
                &self.orders,
                context,
                &[OrderStatus::Init, OrderStatus::Processing],
                OrderStatus::Fail,
            ),
        )
        .await
    }

    async fn complete(&self, context: &ActionContext) -> Result<()> {
        let key = FenceKey::from_context(context)?;
        run_second_phase(
            &self.fence,
            &key,
            Resolution::Commit,
            settle_order(
                &self.orders,
                context,
                &[OrderStatus::Processing],
                OrderStatus::Success,
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::participant::{BRANCH_ID_KEY, COUNT_KEY, RESOURCE_ID_KEY, XID_KEY};

    fn ctx(xid: &str) -> ActionContext {
        ActionContext::new()
            .with(XID_KEY, xid)
            .with(BRANCH_ID_KEY, "b-1")
            .with(OWNER_ID_KEY, "u-1")
            .with(RESOURCE_ID_KEY, "p-1")
            .with(COUNT_KEY, 2u64)
            .with(AMOUNT_KEY, 400i64)
    }

    #[tokio::test]
    async fn test_tcc_order_confirm() {
        let book = Arc::new(OrderBook::new());
        let svc = TccOrders::new(book.clone());
        let c = ctx("tx-1");

        svc.try_reserve(&c).await.unwrap();
        svc.try_reserve(&c).await.unwrap();
        assert_eq!(book.len().await, 1);
        assert_eq!(book.by_xid("tx-1").await[0].status, OrderStatus::Init);

        svc.confirm(&c).await.unwrap();
        svc.confirm(&c).await.unwrap();
        let order = &book.by_xid("tx-1").await[0];
        assert_eq!(order.status, OrderStatus::Success);
        assert_eq!(order.amount, 400);
    }

    #[tokio::test]
    async fn test_tcc_order_cancel() {
        let book = Arc::new(OrderBook::new());
        let svc = TccOrders::new(book.clone());
        let c = ctx("tx-1");

        svc.try_reserve(&c).await.unwrap();
        svc.cancel(&c).await.unwrap();
        assert_eq!(book.by_xid("tx-1").await[0].status, OrderStatus::Cancel);
    }

    #[tokio::test]
    async fn test_tcc_order_empty_cancel_creates_nothing() {
        let book = Arc::new(OrderBook::new());
        let svc = TccOrders::new(book.clone());

        svc.cancel(&ctx("tx-9")).await.unwrap();
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_owner_rejected() {
        let book = Arc::new(OrderBook::new());
        let svc = TccOrders::new(book.clone());
        let c = ActionContext::new()
            .with(XID_KEY, "tx-1")
            .with(BRANCH_ID_KEY, "b-1")
            .with(RESOURCE_ID_KEY, "p-1")
            .with(COUNT_KEY, 1u64)
            .with(AMOUNT_KEY, 1i64);

        let err = svc.try_reserve(&c).await.unwrap_err();
        assert!(matches!(err, ParticipantError::Rejected(_)));
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn test_saga_order_lifecycle() {
        let book = Arc::new(OrderBook::new());
        let svc = SagaOrders::new(book.clone());
        let ok = ctx("tx-1");
        let failed = ctx("tx-2");

        svc.forward(&ok).await.unwrap();
        svc.forward(&failed).await.unwrap();
        assert_eq!(book.by_xid("tx-1").await[0].status, OrderStatus::Processing);

        svc.complete(&ok).await.unwrap();
        svc.compensate(&failed).await.unwrap();
        svc.compensate(&failed).await.unwrap();

        assert_eq!(book.by_xid("tx-1").await[0].status, OrderStatus::Success);
        assert_eq!(book.by_xid("tx-2").await[0].status, OrderStatus::Fail);
    }
}
