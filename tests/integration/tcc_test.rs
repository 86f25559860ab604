//! TCC purchase integration tests.
//!
//! Drives the coordinator against local TCC participants backed by
//! in-memory ledgers.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{branch_context, deployment, SlowParticipant, OWNER, PRODUCT};
use dtxn::clients::LocalParticipant;
use dtxn::config::CoordinatorConfig;
use dtxn::interfaces::participant::{
    ActionContext, BranchMode, Operation, ParticipantError, Rejection, COUNT_KEY,
    RESOURCE_ID_KEY,
};
use dtxn::interfaces::TccResource;
use dtxn::ledger::{LedgerKind, LedgerRow, OrderStatus, ResourceLedger};
use dtxn::orchestration::{BranchStatus, TransactionCoordinator, TransactionError, TransactionStatus};
use dtxn::participants::{FenceKey, FenceState, TccInventory};
use dtxn::services::{PurchaseRequest, PurchaseService, INVENTORY_TCC};

/// Tests that a confirmed purchase moves the reserved stock to used.
#[tokio::test]
async fn test_try_confirm_settles_stock() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let xid = service
        .purchase_tcc(&PurchaseRequest::new(OWNER, PRODUCT, 10, 100))
        .await
        .unwrap();

    let row = deployment.tcc_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.frozen(), row.residue), (10, 0, 10));

    let orders = deployment.tcc_orders.by_xid(&xid.to_string()).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Success);
    assert_eq!(orders[0].amount, 1000);

    let archived = deployment.coordinator.archived(xid).await.unwrap();
    assert_eq!(archived.status(), TransactionStatus::Committed);
    assert!(archived
        .branches()
        .iter()
        .all(|b| b.status == BranchStatus::Confirmed));
}

/// Tests that a purchase failing after Try releases the frozen stock.
#[tokio::test]
async fn test_try_cancel_releases_stock() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let err = service
        .purchase_tcc(&PurchaseRequest::new(OWNER, PRODUCT, 8, 100).failing())
        .await
        .unwrap_err();

    let xid = match err {
        TransactionError::Aborted { xid, .. } => xid,
        other => panic!("expected abort, got {other:?}"),
    };
    let row = deployment.tcc_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.frozen(), row.residue), (0, 0, 20));

    let orders = deployment.tcc_orders.by_xid(&xid.to_string()).await;
    assert_eq!(orders[0].status, OrderStatus::Cancel);
    assert_eq!(
        deployment.coordinator.archived(xid).await.unwrap().status(),
        TransactionStatus::RolledBack
    );
}

/// Tests that insufficient stock rolls the order back and leaves the
/// ledger untouched.
#[tokio::test]
async fn test_insufficient_stock_rolls_back_order() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let err = service
        .purchase_tcc(&PurchaseRequest::new(OWNER, PRODUCT, 25, 100))
        .await
        .unwrap_err();

    assert!(matches!(
        err.rejection(),
        Some(Rejection::InsufficientResource { .. })
    ));
    let row = deployment.tcc_inventory.get(PRODUCT).await.unwrap();
    assert_eq!(row.residue, 20);
    assert_eq!(row.frozen(), 0);

    let orders = deployment.tcc_orders.all().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Cancel);
}

/// Tests that two purchases draw down the stock and the third is refused.
#[tokio::test]
async fn test_sequential_purchases_exhaust_stock() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());
    let request = PurchaseRequest::new(OWNER, PRODUCT, 10, 100);

    service.purchase_tcc(&request).await.unwrap();
    service.purchase_tcc(&request).await.unwrap();
    assert!(service.purchase_tcc(&request).await.is_err());

    let row = deployment.tcc_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.frozen(), row.residue), (20, 0, 0));
    assert!(deployment.check_all().await.is_ok());
}

/// Tests that a Try arriving after its Cancel is refused as suspended.
#[tokio::test]
async fn test_late_try_after_cancel_is_suspended() {
    let ledger = Arc::new(ResourceLedger::new(INVENTORY_TCC, LedgerKind::Reserving));
    ledger.seed(LedgerRow::reserving(PRODUCT, 20)).await.unwrap();
    let inventory = TccInventory::new(ledger.clone());
    let ctx = branch_context("tx-late", "b-1", 5);

    inventory.cancel(&ctx).await.unwrap();
    let err = inventory.try_reserve(&ctx).await.unwrap_err();

    assert!(matches!(
        err,
        ParticipantError::Rejected(Rejection::Suspended { .. })
    ));
    let row = ledger.get(PRODUCT).await.unwrap();
    assert_eq!((row.frozen(), row.residue), (0, 20));
}

/// Tests that a Try lost to a timeout is cancelled as an empty rollback,
/// and that the Try arriving afterwards has no effect.
#[tokio::test]
async fn test_timed_out_try_is_cancelled_empty() {
    let ledger = Arc::new(ResourceLedger::new(INVENTORY_TCC, LedgerKind::Reserving));
    ledger.seed(LedgerRow::reserving(PRODUCT, 20)).await.unwrap();
    let inventory = Arc::new(TccInventory::new(ledger.clone()));

    let local = Arc::new(LocalParticipant::tcc(INVENTORY_TCC, inventory.clone()));
    let slow = Arc::new(SlowParticipant::new(
        local,
        Operation::TryReduce,
        Duration::from_millis(500),
    ));
    let mut config = CoordinatorConfig::for_test();
    config.call_timeout_ms = 50;
    let coordinator = TransactionCoordinator::new(config).with_participant(slow);

    let mut tx = coordinator.begin();
    let params = ActionContext::new()
        .with(RESOURCE_ID_KEY, PRODUCT)
        .with(COUNT_KEY, 5u64);
    let err = coordinator
        .call_branch(&mut tx, INVENTORY_TCC, BranchMode::Tcc, params)
        .await
        .unwrap_err();
    assert!(matches!(err, TransactionError::Aborted { .. }));
    assert_eq!(tx.branches()[0].status, BranchStatus::Uncertain);

    coordinator.rollback(&mut tx).await.unwrap();
    assert_eq!(tx.status(), TransactionStatus::RolledBack);
    assert_eq!(tx.branches()[0].status, BranchStatus::Cancelled);

    let branch_id = tx.branches()[0].id.to_string();
    let xid = tx.id().to_string();
    let key = FenceKey::new(&xid, &branch_id);
    assert_eq!(
        inventory.fence().state(&key).await,
        Some(FenceState::RolledBack)
    );

    let late = inventory
        .try_reserve(&branch_context(&xid, &branch_id, 5))
        .await;
    assert!(matches!(
        late,
        Err(ParticipantError::Rejected(Rejection::Suspended { .. }))
    ));
    let row = ledger.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.frozen(), row.residue), (0, 0, 20));
}
