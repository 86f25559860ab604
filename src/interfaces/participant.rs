//! Participant RPC interface.
//!
//! A participant is one independently-failing service that owns part of the
//! state touched by a global transaction. The coordinator only ever talks to
//! it through [`ParticipantClient::call`], naming the protocol step with an
//! explicit [`Operation`] and passing the branch's [`ActionContext`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context key holding the global transaction id.
pub const XID_KEY: &str = "xid";
/// Context key holding the branch id allocated by the coordinator.
pub const BRANCH_ID_KEY: &str = "branch_id";
/// Context key naming the ledger row a branch acts upon.
pub const RESOURCE_ID_KEY: &str = "resource_id";
/// Context key holding the requested quantity.
pub const COUNT_KEY: &str = "count";
/// Context key naming the owner (user/account) of an order or balance.
pub const OWNER_ID_KEY: &str = "owner_id";
/// Context key holding a monetary amount in minor units.
pub const AMOUNT_KEY: &str = "amount";

/// Result type for participant calls.
pub type Result<T> = std::result::Result<T, ParticipantError>;

/// Coordination protocol used by a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchMode {
    /// Try-Confirm-Cancel with explicit reservation.
    Tcc,
    /// Forward step with a compensating action.
    Saga,
    /// Single-phase call whose undo is owned by the participant.
    At,
}

impl fmt::Display for BranchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchMode::Tcc => "TCC",
            BranchMode::Saga => "SAGA",
            BranchMode::At => "AT",
        };
        f.write_str(name)
    }
}

/// A protocol step a participant can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    TryReduce,
    ConfirmReduce,
    CancelReduce,
    ReduceForward,
    Compensate,
    Complete,
    #[serde(rename = "reduceAT")]
    ReduceAt,
    AtCommit,
    AtRollback,
}

impl Operation {
    /// Wire name of the operation (used as the HTTP path segment).
    pub fn name(&self) -> &'static str {
        match self {
            Operation::TryReduce => "tryReduce",
            Operation::ConfirmReduce => "confirmReduce",
            Operation::CancelReduce => "cancelReduce",
            Operation::ReduceForward => "reduceForward",
            Operation::Compensate => "compensate",
            Operation::Complete => "complete",
            Operation::ReduceAt => "reduceAT",
            Operation::AtCommit => "atCommit",
            Operation::AtRollback => "atRollback",
        }
    }

    /// Protocol the operation belongs to.
    pub fn mode(&self) -> BranchMode {
        match self {
            Operation::TryReduce | Operation::ConfirmReduce | Operation::CancelReduce => {
                BranchMode::Tcc
            }
            Operation::ReduceForward | Operation::Compensate | Operation::Complete => {
                BranchMode::Saga
            }
            Operation::ReduceAt | Operation::AtCommit | Operation::AtRollback => BranchMode::At,
        }
    }

    /// First-phase operation for a mode (Try, forward, reduce).
    pub fn first_phase(mode: BranchMode) -> Self {
        match mode {
            BranchMode::Tcc => Operation::TryReduce,
            BranchMode::Saga => Operation::ReduceForward,
            BranchMode::At => Operation::ReduceAt,
        }
    }

    /// Operation delivered on global commit (Confirm, complete, AT commit).
    pub fn commit_phase(mode: BranchMode) -> Self {
        match mode {
            BranchMode::Tcc => Operation::ConfirmReduce,
            BranchMode::Saga => Operation::Complete,
            BranchMode::At => Operation::AtCommit,
        }
    }

    /// Operation delivered on global rollback (Cancel, compensate, AT rollback).
    pub fn rollback_phase(mode: BranchMode) -> Self {
        match mode {
            BranchMode::Tcc => Operation::CancelReduce,
            BranchMode::Saga => Operation::Compensate,
            BranchMode::At => Operation::AtRollback,
        }
    }

    /// True for operations that must be retried until acknowledged.
    pub fn is_finalize(&self) -> bool {
        !matches!(
            self,
            Operation::TryReduce | Operation::ReduceForward | Operation::ReduceAt
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters captured when a branch is first called.
///
/// Replayed verbatim on Confirm/Cancel/compensate so the second phase never
/// depends on the original caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionContext(BTreeMap<String, Value>);

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy every entry of `defaults` that this context does not already set.
    pub fn merge_defaults(&mut self, defaults: &ActionContext) {
        for (key, value) in &defaults.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Required string parameter.
    pub fn str(&self, key: &str) -> std::result::Result<&str, Rejection> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Rejection::MissingParameter(key.to_string()))
    }

    /// Required unsigned integer parameter.
    pub fn u64(&self, key: &str) -> std::result::Result<u64, Rejection> {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| Rejection::MissingParameter(key.to_string()))
    }

    /// Required signed integer parameter.
    pub fn i64(&self, key: &str) -> std::result::Result<i64, Rejection> {
        self.0
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| Rejection::MissingParameter(key.to_string()))
    }

    pub fn xid(&self) -> std::result::Result<&str, Rejection> {
        self.str(XID_KEY)
    }

    pub fn branch_id(&self) -> std::result::Result<&str, Rejection> {
        self.str(BRANCH_ID_KEY)
    }

    pub fn resource_id(&self) -> std::result::Result<&str, Rejection> {
        self.str(RESOURCE_ID_KEY)
    }

    pub fn count(&self) -> std::result::Result<u64, Rejection> {
        self.u64(COUNT_KEY)
    }
}

/// Business rejection: the participant refused the request on its merits.
///
/// Never retried; a rejection in the first phase drives global rollback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Insufficient resource {resource_id}: requested {requested}, available {available}")]
    InsufficientResource {
        resource_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Branch {branch_id} of {xid} was already rolled back")]
    Suspended { xid: String, branch_id: String },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Refused: {0}")]
    Refused(String),
}

/// Errors returned by a participant call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParticipantError {
    #[error("Business rejection: {0}")]
    Rejected(#[from] Rejection),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl ParticipantError {
    /// Transport-level failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ParticipantError::Transient(_) | ParticipantError::Timeout(_)
        )
    }
}

/// RPC capability used by the coordinator to reach one participant.
///
/// Implementations:
/// - `LocalParticipant`: in-process dispatch to a TCC/Saga/AT resource
/// - `HttpParticipantClient`: JSON over HTTP
/// - `ScriptedParticipant`: scripted outcomes for tests
#[async_trait]
pub trait ParticipantClient: Send + Sync {
    /// Routing name of the participant (e.g. "inventory-tcc").
    fn name(&self) -> &str;

    /// Perform one protocol step.
    ///
    /// `Ok(())` is the participant's acknowledgement.
    async fn call(&self, operation: Operation, context: &ActionContext) -> Result<()>;
}
