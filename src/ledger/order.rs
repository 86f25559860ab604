//! Order records.
//!
//! Orders are created in `INIT`/`PROCESSING` by a first-phase call and only
//! reach a terminal status through a conditional transition driven by the
//! second phase (Confirm/Cancel, complete/compensate, AT commit/rollback).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Order status.
///
/// - AT / TCC: `INIT -> {SUCCESS, CANCEL}`
/// - Saga: `PROCESSING -> {SUCCESS, FAIL}` (`INIT` is accepted as a
///   compensation source)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Init,
    Processing,
    Success,
    Cancel,
    Fail,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Success | OrderStatus::Cancel | OrderStatus::Fail
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Init => "INIT",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Success => "SUCCESS",
            OrderStatus::Cancel => "CANCEL",
            OrderStatus::Fail => "FAIL",
        };
        f.write_str(name)
    }
}

/// Fields supplied when an order is created.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub xid: String,
    pub owner_id: String,
    pub resource_id: String,
    pub quantity: u64,
    /// Amount in minor currency units.
    pub amount: i64,
    pub status: OrderStatus,
}

/// A stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: u64,
    /// Global transaction that created the order.
    pub xid: String,
    pub owner_id: String,
    pub resource_id: String,
    pub quantity: u64,
    pub amount: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    orders: BTreeMap<u64, Order>,
}

/// In-memory order table.
#[derive(Default)]
pub struct OrderBook {
    table: RwLock<Table>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new order, assigning the next id.
    pub async fn insert(&self, new: NewOrder) -> Order {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let now = Utc::now();
        let order = Order {
            id: table.next_id,
            xid: new.xid,
            owner_id: new.owner_id,
            resource_id: new.resource_id,
            quantity: new.quantity,
            amount: new.amount,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        table.orders.insert(order.id, order.clone());
        order
    }

    /// Conditional status update.
    ///
    /// Moves every order of `xid` for (`owner_id`, `resource_id`) whose
    /// status is in `from` to `to`. Returns the number of rows affected.
    pub async fn transition(
        &self,
        xid: &str,
        owner_id: &str,
        resource_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> usize {
        let mut table = self.table.write().await;
        let now = Utc::now();
        let mut affected = 0;
        for order in table.orders.values_mut() {
            if order.xid == xid
                && order.owner_id == owner_id
                && order.resource_id == resource_id
                && from.contains(&order.status)
            {
                order.status = to;
                order.updated_at = now;
                affected += 1;
            }
        }
        affected
    }

    pub async fn get(&self, id: u64) -> Option<Order> {
        self.table.read().await.orders.get(&id).cloned()
    }

    /// Orders created by a global transaction.
    pub async fn by_xid(&self, xid: &str) -> Vec<Order> {
        self.table
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.xid == xid)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Order> {
        self.table.read().await.orders.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
