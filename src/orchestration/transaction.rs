//! Global transactions and their branches.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::interfaces::participant::{ActionContext, BranchMode, Rejection};

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Outcome of a first-phase call: the registered branch id.
pub type BranchResult = Result<Uuid>;

/// Errors surfaced to the initiator of a global transaction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction {xid} rejected: {rejection}")]
    Rejected { xid: Uuid, rejection: Rejection },

    #[error("Transaction {xid} aborted: {reason}")]
    Aborted { xid: Uuid, reason: String },

    #[error("Invariant violation in transaction {xid}: {message}")]
    InvariantViolation { xid: Uuid, message: String },

    #[error("Transaction {xid} is {status}, cannot {operation}")]
    InvalidState {
        xid: Uuid,
        status: TransactionStatus,
        operation: &'static str,
    },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransactionError {
    /// Business rejection that caused the abort, if any.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            TransactionError::Rejected { rejection, .. } => Some(rejection),
            _ => None,
        }
    }
}

/// Global transaction status.
///
/// `ACTIVE -> COMMITTING -> COMMITTED` or `ACTIVE -> ROLLING_BACK -> ROLLED_BACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// Coordinator-side branch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    // TCC
    Tried,
    Confirmed,
    Cancelled,
    // Saga
    Processing,
    Completed,
    Compensated,
    // AT
    Reduced,
    Committed,
    RolledBack,
    /// First phase gave up on transient failures; outcome unknown.
    Uncertain,
}

impl BranchStatus {
    /// Status after a successful first phase.
    pub fn prepared(mode: BranchMode) -> Self {
        match mode {
            BranchMode::Tcc => BranchStatus::Tried,
            BranchMode::Saga => BranchStatus::Processing,
            BranchMode::At => BranchStatus::Reduced,
        }
    }

    /// Status after an acknowledged global commit.
    pub fn committed(mode: BranchMode) -> Self {
        match mode {
            BranchMode::Tcc => BranchStatus::Confirmed,
            BranchMode::Saga => BranchStatus::Completed,
            BranchMode::At => BranchStatus::Committed,
        }
    }

    /// Status after an acknowledged global rollback.
    pub fn rolled_back(mode: BranchMode) -> Self {
        match mode {
            BranchMode::Tcc => BranchStatus::Cancelled,
            BranchMode::Saga => BranchStatus::Compensated,
            BranchMode::At => BranchStatus::RolledBack,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BranchStatus::Confirmed
                | BranchStatus::Cancelled
                | BranchStatus::Completed
                | BranchStatus::Compensated
                | BranchStatus::Committed
                | BranchStatus::RolledBack
        )
    }

    /// Valid transitions of a branch in `mode`.
    pub fn can_transition_to(&self, to: BranchStatus, mode: BranchMode) -> bool {
        if *self == BranchStatus::Uncertain {
            // Outcome unknown: only a rollback, which the participant fence
            // turns into an empty rollback if the first phase never landed.
            return to == BranchStatus::rolled_back(mode);
        }
        *self == BranchStatus::prepared(mode)
            && (to == BranchStatus::committed(mode) || to == BranchStatus::rolled_back(mode))
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchStatus::Tried => "TRIED",
            BranchStatus::Confirmed => "CONFIRMED",
            BranchStatus::Cancelled => "CANCELLED",
            BranchStatus::Processing => "PROCESSING",
            BranchStatus::Completed => "COMPLETED",
            BranchStatus::Compensated => "COMPENSATED",
            BranchStatus::Reduced => "REDUCED",
            BranchStatus::Committed => "COMMITTED",
            BranchStatus::RolledBack => "ROLLED_BACK",
            BranchStatus::Uncertain => "UNCERTAIN",
        };
        f.write_str(name)
    }
}

/// One participant's part of a global transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Branch {
    pub id: Uuid,
    pub xid: Uuid,
    pub mode: BranchMode,
    /// Routing name of the participant that owns the branch.
    pub resource_id: String,
    pub status: BranchStatus,
    /// Parameters replayed on every later call, including `xid` and `branch_id`.
    pub context: ActionContext,
}

/// First-phase call refused on business grounds; no branch was created.
#[derive(Debug, Clone, Serialize)]
pub struct BranchFailure {
    pub resource_id: String,
    pub reason: String,
}

/// A global transaction, owned by the caller that began it.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalTransaction {
    pub(crate) id: Uuid,
    pub(crate) status: TransactionStatus,
    pub(crate) branches: Vec<Branch>,
    pub(crate) failures: Vec<BranchFailure>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) flag: Option<String>,
}

impl GlobalTransaction {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: TransactionStatus::Active,
            branches: Vec::new(),
            failures: Vec::new(),
            created_at: Utc::now(),
            flag: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Branches in registration order.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, id: Uuid) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    pub fn failures(&self) -> &[BranchFailure] {
        &self.failures
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Set when a finalize call was rejected or reported an invariant
    /// violation. The transaction then needs an operator.
    pub fn flag(&self) -> Option<&str> {
        self.flag.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_uncertain(&self) -> bool {
        self.branches
            .iter()
            .any(|b| b.status == BranchStatus::Uncertain)
    }
}
