//! dtxn-demo: purchase walkthrough
//!
//! Runs one purchase per transaction mode against in-memory participants,
//! first committing, then with a simulated failure, and logs the ledgers.
//!
//! ## Architecture
//! ```text
//! [PurchaseService] --> [TransactionCoordinator] --> order-{tcc,saga,at}
//!                                                --> inventory-{tcc,saga,at}
//!                                                --> account-saga
//! ```
//!
//! ## Configuration
//! - DTXN_CONFIG: Path to a YAML config file (optional)
//! - DTXN__DEMO__QUANTITY etc.: Override individual settings
//! - DTXN_LOG: Log filter (default: info)

use tracing::{info, warn};

use dtxn::config::Config;
use dtxn::services::{InMemoryDeployment, PurchaseRequest, PurchaseService};
use dtxn::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let deployment = InMemoryDeployment::seed(config.coordinator.clone(), &config.demo).await?;
    let service = PurchaseService::new(deployment.coordinator.clone());

    let request = PurchaseRequest::from_demo(&config.demo);
    info!(
        owner_id = %request.owner_id,
        product_id = %request.product_id,
        quantity = request.quantity,
        amount = request.amount()?,
        "dtxn-demo started"
    );

    // A second purchase of the same size exhausts the demo stock, so run the
    // failing variant first.
    for request in [request.clone().failing(), request] {
        let label = if request.simulate_failure {
            "rollback"
        } else {
            "commit"
        };

        match service.purchase_tcc(&request).await {
            Ok(xid) => info!(scenario = label, xid = %xid, "TCC purchase done"),
            Err(e) => warn!(scenario = label, error = %e, "TCC purchase failed"),
        }

        match service.purchase_at(&request).await {
            Ok(xid) => info!(scenario = label, xid = %xid, "AT purchase done"),
            Err(e) => warn!(scenario = label, error = %e, "AT purchase failed"),
        }
    }

    // Saga failure path: ask for more stock than exists.
    let oversized = PurchaseRequest::new(
        &config.demo.owner_id,
        &config.demo.product_id,
        config.demo.stock + 1,
        config.demo.unit_price,
    );
    for request in [oversized, PurchaseRequest::from_demo(&config.demo)] {
        let report = service.purchase_saga(&request).await?;
        info!(
            xid = %report.xid,
            status = %report.status,
            succeeded = ?report.succeeded,
            failed_step = ?report.failure.as_ref().map(|(step, _)| step),
            "Saga purchase done"
        );
    }

    for ledger in deployment.ledgers() {
        for row in ledger.rows().await {
            info!(
                ledger = ledger.name(),
                resource_id = %row.resource_id,
                total = row.total,
                used = row.used,
                frozen = ?row.frozen,
                residue = row.residue,
                "Ledger row"
            );
        }
    }
    for (name, orders) in [
        ("order-tcc", &deployment.tcc_orders),
        ("order-saga", &deployment.saga_orders),
        ("order-at", &deployment.at_orders),
    ] {
        for order in orders.all().await {
            info!(book = name, id = order.id, xid = %order.xid, status = %order.status, "Order");
        }
    }

    deployment.check_all().await?;
    info!("dtxn-demo finished, all ledgers balanced");
    Ok(())
}
