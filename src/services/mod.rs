//! Business services built on the coordinator.

pub mod purchase;

pub use purchase::{
    purchase_saga_definition, InMemoryDeployment, PurchaseRequest, PurchaseService, ACCOUNT_SAGA,
    INVENTORY_AT, INVENTORY_SAGA, INVENTORY_TCC, ORDER_AT, ORDER_SAGA, ORDER_TCC,
};
