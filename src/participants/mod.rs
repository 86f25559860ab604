//! Participant services.
//!
//! Concrete TCC, Saga and AT resources backed by in-memory ledgers and order
//! books. Each one guards its effects with a [`BranchFence`].
//!
//! - `inventory`: product stock (TCC reservation, Saga forward step)
//! - `order`: order records for all three modes
//! - `account`: account balances (Saga forward step)
//! - `at`: AT collaborator keeping its own undo records

pub mod account;
pub mod at;
pub mod fence;
pub mod inventory;
pub mod order;

pub use account::SagaAccount;
pub use at::{AtInventory, AtOrders};
pub use fence::{BranchFence, FenceKey, FenceState, Resolution};
pub use inventory::{SagaInventory, TccInventory};
pub use order::{SagaOrders, TccOrders};

use crate::interfaces::participant::{ActionContext, ParticipantError, Rejection};
use crate::ledger::LedgerError;

impl From<LedgerError> for ParticipantError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { resource_id, .. } => {
                ParticipantError::Rejected(Rejection::ResourceNotFound(resource_id))
            }
            other => ParticipantError::InvariantViolation(other.to_string()),
        }
    }
}

/// `count` parameter, which must be positive.
pub(crate) fn positive_count(context: &ActionContext) -> Result<u64, Rejection> {
    match context.count()? {
        0 => Err(Rejection::Refused("count must be positive".to_string())),
        n => Ok(n),
    }
}
