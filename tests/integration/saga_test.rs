//! Saga purchase integration tests.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{deployment, FlakyParticipant, OWNER, PRODUCT};
use dtxn::clients::LocalParticipant;
use dtxn::config::CoordinatorConfig;
use dtxn::interfaces::participant::{
    ActionContext, Operation, Rejection, Result, COUNT_KEY, RESOURCE_ID_KEY,
};
use dtxn::interfaces::SagaResource;
use dtxn::ledger::{LedgerKind, LedgerRow, OrderStatus, ResourceLedger};
use dtxn::orchestration::{
    BranchStatus, SagaDefinition, SagaOrchestrator, SagaStatus, SagaStep, TransactionCoordinator,
    TransactionError,
};
use dtxn::participants::{FenceKey, FenceState, SagaInventory};
use dtxn::services::{PurchaseRequest, PurchaseService, INVENTORY_SAGA};

/// Tests that a successful saga reduces stock and balance and completes the order.
#[tokio::test]
async fn test_saga_purchase_succeeds() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let report = service
        .purchase_saga(&PurchaseRequest::new(OWNER, PRODUCT, 10, 100))
        .await
        .unwrap();

    assert_eq!(report.status, SagaStatus::Success);
    assert_eq!(
        report.succeeded,
        vec!["create-order", "reduce-stock", "reduce-balance"]
    );

    let stock = deployment.saga_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((stock.used, stock.residue), (10, 10));
    let balance = deployment.accounts.get(OWNER).await.unwrap();
    assert_eq!((balance.used, balance.residue), (1000, 9000));

    let orders = deployment.saga_orders.by_xid(&report.xid.to_string()).await;
    assert_eq!(orders[0].status, OrderStatus::Success);

    let archived = deployment.coordinator.archived(report.xid).await.unwrap();
    assert!(archived
        .branches()
        .iter()
        .all(|b| b.status == BranchStatus::Completed));
}

/// Tests that an insufficient balance compensates stock and order in reverse.
#[tokio::test]
async fn test_saga_insufficient_balance_compensates() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    // 10 * 2000 exceeds the 10000 balance.
    let report = service
        .purchase_saga(&PurchaseRequest::new(OWNER, PRODUCT, 10, 2000))
        .await
        .unwrap();

    assert_eq!(report.status, SagaStatus::Fail);
    assert_eq!(report.succeeded, vec!["create-order", "reduce-stock"]);
    let (step, error) = report.failure.unwrap();
    assert_eq!(step, "reduce-balance");
    assert!(matches!(
        error.rejection(),
        Some(Rejection::InsufficientResource { .. })
    ));

    let stock = deployment.saga_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((stock.used, stock.residue), (0, 20));
    let balance = deployment.accounts.get(OWNER).await.unwrap();
    assert_eq!(balance.residue, 10_000);

    let orders = deployment.saga_orders.by_xid(&report.xid.to_string()).await;
    assert_eq!(orders[0].status, OrderStatus::Fail);
    assert!(deployment.check_all().await.is_ok());
}

/// Tests that a complete call failing transiently is retried until it lands.
#[tokio::test]
async fn test_complete_retried_after_transient_failures() {
    let ledger = Arc::new(ResourceLedger::new(INVENTORY_SAGA, LedgerKind::Direct));
    ledger.seed(LedgerRow::direct(PRODUCT, 20)).await.unwrap();
    let inventory = Arc::new(SagaInventory::new(ledger.clone()));

    let flaky = Arc::new(FlakyParticipant::new(
        Arc::new(LocalParticipant::saga(INVENTORY_SAGA, inventory.clone())),
        Operation::Complete,
        3,
    ));
    let coordinator = Arc::new(
        TransactionCoordinator::new(CoordinatorConfig::for_test()).with_participant(flaky.clone()),
    );
    let saga = SagaOrchestrator::new(coordinator.clone());
    let definition = SagaDefinition::new(
        "reduce",
        vec![SagaStep::new("reduce-stock", INVENTORY_SAGA)],
    );
    let input = ActionContext::new()
        .with(RESOURCE_ID_KEY, PRODUCT)
        .with(COUNT_KEY, 5u64);

    let report = saga.run(&definition, &input).await.unwrap();

    assert_eq!(report.status, SagaStatus::Success);
    assert_eq!(flaky.attempts(), 4);

    let row = ledger.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.residue), (5, 15));

    let archived = coordinator.archived(report.xid).await.unwrap();
    let branch = &archived.branches()[0];
    assert_eq!(branch.status, BranchStatus::Completed);
    let key = FenceKey::new(report.xid.to_string(), branch.id.to_string());
    assert_eq!(
        inventory.fence().state(&key).await,
        Some(FenceState::Committed)
    );
}

/// Tests that an unknown product fails the stock step and fails the order.
#[tokio::test]
async fn test_saga_unknown_product_fails_order() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let report = service
        .purchase_saga(&PurchaseRequest::new(OWNER, "unknown-product", 1, 100))
        .await
        .unwrap();

    // The order is created before stock is checked, so it is compensated.
    assert_eq!(report.status, SagaStatus::Fail);
    assert_eq!(report.succeeded, vec!["create-order"]);
    let (step, error) = report.failure.unwrap();
    assert_eq!(step, "reduce-stock");
    assert!(matches!(
        error.rejection(),
        Some(Rejection::ResourceNotFound(_))
    ));
    assert_eq!(
        deployment.saga_inventory.get(PRODUCT).await.unwrap().residue,
        20
    );
    assert_eq!(
        deployment.saga_orders.all().await[0].status,
        OrderStatus::Fail
    );
}

/// Saga inventory whose forward outlives the coordinator's call timeout,
/// either landing before its reply is delayed or landing late.
struct SlowForward {
    inner: Arc<SagaInventory>,
    delay: Duration,
    lands_first: bool,
}

#[async_trait]
impl SagaResource for SlowForward {
    async fn forward(&self, context: &ActionContext) -> Result<()> {
        if self.lands_first {
            let result = self.inner.forward(context).await;
            tokio::time::sleep(self.delay).await;
            return result;
        }
        tokio::time::sleep(self.delay).await;
        self.inner.forward(context).await
    }

    async fn compensate(&self, context: &ActionContext) -> Result<()> {
        self.inner.compensate(context).await
    }

    async fn complete(&self, context: &ActionContext) -> Result<()> {
        self.inner.complete(context).await
    }
}

/// Run a one-step saga against a forward slower than the 200ms call timeout,
/// then check the ledger once every in-flight forward has finished.
async fn run_timed_out_step(lands_first: bool) {
    let ledger = Arc::new(ResourceLedger::new(INVENTORY_SAGA, LedgerKind::Direct));
    ledger.seed(LedgerRow::direct(PRODUCT, 20)).await.unwrap();
    let inventory = Arc::new(SagaInventory::new(ledger.clone()));
    let slow = Arc::new(SlowForward {
        inner: inventory.clone(),
        delay: Duration::from_millis(600),
        lands_first,
    });

    let coordinator = Arc::new(
        TransactionCoordinator::new(CoordinatorConfig::for_test())
            .with_participant(Arc::new(LocalParticipant::saga(INVENTORY_SAGA, slow))),
    );
    let saga = SagaOrchestrator::new(coordinator.clone());
    let definition = SagaDefinition::new(
        "reduce",
        vec![SagaStep::new("reduce-stock", INVENTORY_SAGA)],
    );
    let input = ActionContext::new()
        .with(RESOURCE_ID_KEY, PRODUCT)
        .with(COUNT_KEY, 5u64);

    let report = saga.run(&definition, &input).await.unwrap();
    assert_eq!(report.status, SagaStatus::Fail);
    assert!(matches!(
        report.failure,
        Some((_, TransactionError::Aborted { .. }))
    ));

    // Let every spawned forward finish before looking at the ledger.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let row = ledger.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.residue), (0, 20));

    let archived = coordinator.archived(report.xid).await.unwrap();
    let branch = &archived.branches()[0];
    assert_eq!(branch.status, BranchStatus::Compensated);
    let key = FenceKey::new(report.xid.to_string(), branch.id.to_string());
    assert_eq!(
        inventory.fence().state(&key).await,
        Some(FenceState::RolledBack)
    );
    assert_eq!(inventory.step_status(&key).await, Some(OrderStatus::Fail));
}

/// Tests that a step applied before its reply timed out is compensated.
#[tokio::test]
async fn test_timed_out_step_that_landed_is_compensated() {
    run_timed_out_step(true).await;
}

/// Tests that a step landing after the saga failed is refused, so the
/// stock it would have taken stays available.
#[tokio::test]
async fn test_timed_out_step_landing_late_is_refused() {
    run_timed_out_step(false).await;
}
