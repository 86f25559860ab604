//! Purchase scenarios.
//!
//! A purchase creates an order and reduces stock (and, in the Saga flow, the
//! buyer's balance). The same business flow is wired once per protocol:
//!
//! - TCC: order and inventory Try concurrently, then Confirm or Cancel
//! - Saga: create order, reduce stock, reduce balance; compensate on failure
//! - AT: order and inventory reduce, then AT commit or rollback

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::LocalParticipant;
use crate::config::{CoordinatorConfig, DemoConfig};
use crate::interfaces::participant::{
    ActionContext, AMOUNT_KEY, COUNT_KEY, OWNER_ID_KEY, RESOURCE_ID_KEY,
};
use crate::ledger::{LedgerError, LedgerKind, LedgerRow, OrderBook, ResourceLedger};
use crate::orchestration::{
    BranchCall, Result, SagaDefinition, SagaOrchestrator, SagaReport, SagaStep,
    TransactionCoordinator, TransactionError,
};
use crate::participants::{
    AtInventory, AtOrders, SagaAccount, SagaInventory, SagaOrders, TccInventory, TccOrders,
};

pub const ORDER_TCC: &str = "order-tcc";
pub const INVENTORY_TCC: &str = "inventory-tcc";
pub const ORDER_SAGA: &str = "order-saga";
pub const INVENTORY_SAGA: &str = "inventory-saga";
pub const ACCOUNT_SAGA: &str = "account-saga";
pub const ORDER_AT: &str = "order-at";
pub const INVENTORY_AT: &str = "inventory-at";

/// A buyer's request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub owner_id: String,
    pub product_id: String,
    pub quantity: u64,
    /// Unit price in minor units.
    pub unit_price: i64,
    /// Abort after every first phase succeeded, exercising the rollback path.
    #[serde(default)]
    pub simulate_failure: bool,
}

impl PurchaseRequest {
    pub fn new(
        owner_id: impl Into<String>,
        product_id: impl Into<String>,
        quantity: u64,
        unit_price: i64,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            product_id: product_id.into(),
            quantity,
            unit_price,
            simulate_failure: false,
        }
    }

    pub fn from_demo(demo: &DemoConfig) -> Self {
        Self::new(&demo.owner_id, &demo.product_id, demo.quantity, demo.unit_price)
    }

    pub fn failing(mut self) -> Self {
        self.simulate_failure = true;
        self
    }

    /// Order total, in minor units.
    pub fn amount(&self) -> Result<i64> {
        i64::try_from(self.quantity)
            .ok()
            .and_then(|q| q.checked_mul(self.unit_price))
            .ok_or_else(|| TransactionError::InvalidRequest("order amount overflows".to_string()))
    }

    /// Parameters shared by every branch of the purchase.
    pub fn params(&self) -> Result<ActionContext> {
        Ok(ActionContext::new()
            .with(OWNER_ID_KEY, self.owner_id.as_str())
            .with(RESOURCE_ID_KEY, self.product_id.as_str())
            .with(COUNT_KEY, self.quantity)
            .with(AMOUNT_KEY, self.amount()?))
    }
}

/// The Saga purchase: order, stock, balance.
pub fn purchase_saga_definition() -> SagaDefinition {
    SagaDefinition::new(
        "purchase",
        vec![
            SagaStep::new("create-order", ORDER_SAGA),
            SagaStep::new("reduce-stock", INVENTORY_SAGA),
            SagaStep::new("reduce-balance", ACCOUNT_SAGA),
        ],
    )
}

/// Every participant of the purchase flow, backed by in-memory ledgers.
pub struct InMemoryDeployment {
    pub tcc_inventory: Arc<ResourceLedger>,
    pub saga_inventory: Arc<ResourceLedger>,
    pub at_inventory: Arc<ResourceLedger>,
    pub accounts: Arc<ResourceLedger>,
    pub tcc_orders: Arc<OrderBook>,
    pub saga_orders: Arc<OrderBook>,
    pub at_orders: Arc<OrderBook>,
    pub at_collaborator: Arc<AtInventory>,
    pub coordinator: Arc<TransactionCoordinator>,
}

impl InMemoryDeployment {
    /// Build the ledgers, seed them from `demo` and register every
    /// participant on a fresh coordinator.
    pub async fn seed(
        coordinator_config: CoordinatorConfig,
        demo: &DemoConfig,
    ) -> std::result::Result<Self, LedgerError> {
        let tcc_inventory = Arc::new(ResourceLedger::new(INVENTORY_TCC, LedgerKind::Reserving));
        let saga_inventory = Arc::new(ResourceLedger::new(INVENTORY_SAGA, LedgerKind::Direct));
        let at_inventory = Arc::new(ResourceLedger::new(INVENTORY_AT, LedgerKind::Direct));
        let accounts = Arc::new(ResourceLedger::new(ACCOUNT_SAGA, LedgerKind::Direct));

        tcc_inventory
            .seed(LedgerRow::reserving(&demo.product_id, demo.stock))
            .await?;
        saga_inventory
            .seed(LedgerRow::direct(&demo.product_id, demo.stock))
            .await?;
        at_inventory
            .seed(LedgerRow::direct(&demo.product_id, demo.stock))
            .await?;
        accounts
            .seed(LedgerRow::direct(&demo.owner_id, demo.balance))
            .await?;

        let tcc_orders = Arc::new(OrderBook::new());
        let saga_orders = Arc::new(OrderBook::new());
        let at_orders = Arc::new(OrderBook::new());
        let at_collaborator = Arc::new(AtInventory::new(at_inventory.clone()));

        let coordinator = TransactionCoordinator::new(coordinator_config)
            .with_participant(Arc::new(LocalParticipant::tcc(
                ORDER_TCC,
                Arc::new(TccOrders::new(tcc_orders.clone())),
            )))
            .with_participant(Arc::new(LocalParticipant::tcc(
                INVENTORY_TCC,
                Arc::new(TccInventory::new(tcc_inventory.clone())),
            )))
            .with_participant(Arc::new(LocalParticipant::saga(
                ORDER_SAGA,
                Arc::new(SagaOrders::new(saga_orders.clone())),
            )))
            .with_participant(Arc::new(LocalParticipant::saga(
                INVENTORY_SAGA,
                Arc::new(SagaInventory::new(saga_inventory.clone())),
            )))
            .with_participant(Arc::new(LocalParticipant::saga(
                ACCOUNT_SAGA,
                Arc::new(SagaAccount::new(accounts.clone())),
            )))
            .with_participant(Arc::new(LocalParticipant::at(
                ORDER_AT,
                Arc::new(AtOrders::new(at_orders.clone())),
            )))
            .with_participant(Arc::new(LocalParticipant::at(
                INVENTORY_AT,
                at_collaborator.clone(),
            )));

        Ok(Self {
            tcc_inventory,
            saga_inventory,
            at_inventory,
            accounts,
            tcc_orders,
            saga_orders,
            at_orders,
            at_collaborator,
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn ledgers(&self) -> [&Arc<ResourceLedger>; 4] {
        [
            &self.tcc_inventory,
            &self.saga_inventory,
            &self.at_inventory,
            &self.accounts,
        ]
    }

    /// Invariant check over every ledger.
    pub async fn check_all(&self) -> std::result::Result<(), LedgerError> {
        for ledger in self.ledgers() {
            ledger.check_all().await?;
        }
        Ok(())
    }
}

/// Runs purchases against a coordinator.
pub struct PurchaseService {
    coordinator: Arc<TransactionCoordinator>,
    saga: SagaOrchestrator,
    saga_definition: SagaDefinition,
}

impl PurchaseService {
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        Self::with_saga_definition(coordinator, purchase_saga_definition())
    }

    pub fn with_saga_definition(
        coordinator: Arc<TransactionCoordinator>,
        saga_definition: SagaDefinition,
    ) -> Self {
        Self {
            saga: SagaOrchestrator::new(coordinator.clone()),
            coordinator,
            saga_definition,
        }
    }

    /// Order and inventory branches, TCC or AT.
    async fn two_branch(&self, calls: Vec<BranchCall>, request: &PurchaseRequest) -> Result<Uuid> {
        if !request.simulate_failure {
            return self.coordinator.execute(calls).await;
        }

        let mut tx = self.coordinator.begin();
        let outcome = self.coordinator.call_branches(&mut tx, calls).await;
        let xid = tx.id();
        self.coordinator.rollback(&mut tx).await?;
        match outcome {
            Ok(_) => {
                warn!(xid = %xid, "Simulated failure, purchase rolled back");
                Err(TransactionError::Aborted {
                    xid,
                    reason: "simulated failure".to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Purchase with TCC: order and stock reserved concurrently.
    #[tracing::instrument(name = "purchase.tcc", skip_all, fields(owner_id = %request.owner_id, product_id = %request.product_id))]
    pub async fn purchase_tcc(&self, request: &PurchaseRequest) -> Result<Uuid> {
        let params = request.params()?;
        let xid = self
            .two_branch(
                vec![
                    BranchCall::tcc(ORDER_TCC, params.clone()),
                    BranchCall::tcc(INVENTORY_TCC, params),
                ],
                request,
            )
            .await?;
        info!(xid = %xid, "TCC purchase committed");
        Ok(xid)
    }

    /// Purchase with a saga: order, stock, then balance.
    #[tracing::instrument(name = "purchase.saga", skip_all, fields(owner_id = %request.owner_id, product_id = %request.product_id))]
    pub async fn purchase_saga(&self, request: &PurchaseRequest) -> Result<SagaReport> {
        let params = request.params()?;
        self.saga.run(&self.saga_definition, &params).await
    }

    /// Purchase with AT branches.
    #[tracing::instrument(name = "purchase.at", skip_all, fields(owner_id = %request.owner_id, product_id = %request.product_id))]
    pub async fn purchase_at(&self, request: &PurchaseRequest) -> Result<Uuid> {
        let params = request.params()?;
        let xid = self
            .two_branch(
                vec![
                    BranchCall::at(ORDER_AT, params.clone()),
                    BranchCall::at(INVENTORY_AT, params),
                ],
                request,
            )
            .await?;
        info!(xid = %xid, "AT purchase committed");
        Ok(xid)
    }
}
