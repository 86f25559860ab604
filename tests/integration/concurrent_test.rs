//! Concurrent purchase integration tests.
//!
//! Many global transactions contend for the same ledger row; the conditional
//! ledger updates must admit exactly as many as the stock allows.

#[path = "../common/mod.rs"]
mod common;

use std::future::Future;
use std::sync::Arc;

use common::{deployment, OWNER, PRODUCT};
use dtxn::ledger::OrderStatus;
use dtxn::services::{InMemoryDeployment, PurchaseRequest, PurchaseService};
use tokio::sync::Barrier;

const BUYERS: usize = 10;
const QUANTITY: u64 = 3;

/// Start `BUYERS` purchases at once and count the ones that went through.
async fn race<F, Fut>(purchase: F) -> (InMemoryDeployment, usize)
where
    F: Fn(Arc<PurchaseService>, PurchaseRequest) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let deployment = deployment().await;
    let service = Arc::new(PurchaseService::new(deployment.coordinator.clone()));
    let barrier = Arc::new(Barrier::new(BUYERS));

    let handles: Vec<_> = (0..BUYERS)
        .map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            let purchase = purchase.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                purchase(service, PurchaseRequest::new(OWNER, PRODUCT, QUANTITY, 100)).await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }
    assert!(deployment.check_all().await.is_ok());
    (deployment, succeeded)
}

/// Tests that concurrent TCC purchases never oversell.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tcc_purchases_never_oversell() {
    let (deployment, succeeded) = race(|service, request| async move {
        service.purchase_tcc(&request).await.is_ok()
    })
    .await;

    // 20 units, 3 per purchase.
    assert_eq!(succeeded, 6);
    let row = deployment.tcc_inventory.get(PRODUCT).await.unwrap();
    assert_eq!((row.used, row.frozen(), row.residue), (18, 0, 2));

    let confirmed = deployment
        .tcc_orders
        .all()
        .await
        .into_iter()
        .filter(|o| o.status == OrderStatus::Success)
        .count();
    assert_eq!(confirmed, 6);
}

/// Tests that concurrent AT and Saga purchases admit the same number of buyers.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_at_and_saga_purchases_never_oversell() {
    let (deployment, at) = race(|service, request| async move {
        service.purchase_at(&request).await.is_ok()
    })
    .await;
    assert_eq!(at, 6);
    assert_eq!(deployment.at_inventory.get(PRODUCT).await.unwrap().residue, 2);
    assert_eq!(deployment.at_collaborator.pending_undo().await, 0);

    let (deployment, saga) = race(|service, request| async move {
        matches!(
            service.purchase_saga(&request).await,
            Ok(report) if report.failure.is_none()
        )
    })
    .await;
    assert_eq!(saga, 6);
    assert_eq!(deployment.saga_inventory.get(PRODUCT).await.unwrap().residue, 2);
    assert_eq!(deployment.accounts.get(OWNER).await.unwrap().residue, 10_000 - 1800);
}
