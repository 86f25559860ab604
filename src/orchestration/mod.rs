//! Global transaction orchestration.
//!
//! - `transaction`: global transaction and branch model
//! - `coordinator`: TCC / Saga / AT branch driver
//! - `saga`: step orchestration with reverse-order compensation

pub mod coordinator;
pub mod saga;
pub mod transaction;

pub use coordinator::{BranchCall, TransactionCoordinator};
pub use saga::{SagaDefinition, SagaOrchestrator, SagaReport, SagaStatus, SagaStep};
pub use transaction::{
    Branch, BranchFailure, BranchResult, BranchStatus, GlobalTransaction, Result,
    TransactionError, TransactionStatus,
};
