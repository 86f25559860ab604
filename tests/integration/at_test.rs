//! AT purchase integration tests.

#[path = "../common/mod.rs"]
mod common;

use common::{deployment, OWNER, PRODUCT};
use dtxn::interfaces::participant::Rejection;
use dtxn::ledger::OrderStatus;
use dtxn::orchestration::{BranchStatus, TransactionError, TransactionStatus};
use dtxn::services::{PurchaseRequest, PurchaseService};

/// Tests that a committed AT purchase keeps the reduction and drops the undo record.
#[tokio::test]
async fn test_at_commit_keeps_reduction() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let xid = service
        .purchase_at(&PurchaseRequest::new(OWNER, PRODUCT, 10, 100))
        .await
        .unwrap();

    let row = deployment.at_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.residue), (10, 10));
    assert_eq!(deployment.at_collaborator.pending_undo().await, 0);

    let orders = deployment.at_orders.by_xid(&xid.to_string()).await;
    assert_eq!(orders[0].status, OrderStatus::Success);

    let archived = deployment.coordinator.archived(xid).await.unwrap();
    assert!(archived
        .branches()
        .iter()
        .all(|b| b.status == BranchStatus::Committed));
}

/// Tests that an AT rollback restores the ledger from the undo record.
#[tokio::test]
async fn test_at_rollback_restores_ledger() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let err = service
        .purchase_at(&PurchaseRequest::new(OWNER, PRODUCT, 10, 100).failing())
        .await
        .unwrap_err();
    let xid = match err {
        TransactionError::Aborted { xid, .. } => xid,
        other => panic!("expected abort, got {other:?}"),
    };

    let row = deployment.at_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.residue), (0, 20));
    assert_eq!(deployment.at_collaborator.pending_undo().await, 0);

    let orders = deployment.at_orders.by_xid(&xid.to_string()).await;
    assert_eq!(orders[0].status, OrderStatus::Cancel);

    let archived = deployment.coordinator.archived(xid).await.unwrap();
    assert_eq!(archived.status(), TransactionStatus::RolledBack);
    assert!(archived
        .branches()
        .iter()
        .all(|b| b.status == BranchStatus::RolledBack));
}

/// Tests that a refused reduction rolls back the order branch only.
#[tokio::test]
async fn test_at_insufficient_stock_cancels_order() {
    let deployment = deployment().await;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let err = service
        .purchase_at(&PurchaseRequest::new(OWNER, PRODUCT, 21, 100))
        .await
        .unwrap_err();

    assert!(matches!(
        err.rejection(),
        Some(Rejection::InsufficientResource { .. })
    ));
    let row = deployment.at_inventory.get(PRODUCT).await.unwrap();
    assert_eq!(row.residue, 20);
    assert_eq!(deployment.at_orders.all().await[0].status, OrderStatus::Cancel);
    assert!(deployment.check_all().await.is_ok());
}
