//! Participant-side branch state machine.
//!
//! Every participant keeps one fence record per (xid, branch id). The record
//! makes second-phase calls idempotent, turns a rollback with no prior first
//! phase into an empty rollback, and leaves a tombstone so that a first-phase
//! call arriving after its own rollback is refused.
//!
//! Records stay until [`BranchFence::prune`] drops the resolved ones of a
//! transaction.
//!
//! ```text
//!            begin_first            finish_first(ok)
//!   (none) -------------> PENDING -----------------> PREPARED
//!     |                      | finish_first(err)       |   \
//!     |                      v                         |    \ begin(Commit)
//!     |                   (none)                       |     v
//!     | begin(Rollback)                  begin(Rollback)|   COMMITTED
//!     v                                                v
//!  ROLLED_BACK (tombstone)  <------------------------ ROLLED_BACK
//! ```

use std::collections::HashMap;
use std::future::Future;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::interfaces::participant::{ActionContext, ParticipantError, Rejection, Result};
use crate::ledger::OrderStatus;

/// Identity of a branch as seen by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FenceKey {
    pub xid: String,
    pub branch_id: String,
}

impl FenceKey {
    pub fn new(xid: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            xid: xid.into(),
            branch_id: branch_id.into(),
        }
    }

    pub fn from_context(context: &ActionContext) -> std::result::Result<Self, Rejection> {
        Ok(Self::new(context.xid()?, context.branch_id()?))
    }
}

/// Local state of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FenceState {
    /// First phase is executing.
    Pending,
    /// First phase applied (TCC: TRIED, Saga: PROCESSING, AT: reduced).
    Prepared,
    /// Second phase committed (CONFIRMED / SUCCESS).
    Committed,
    /// Rolled back, or tombstone of an empty rollback.
    RolledBack,
}

impl FenceState {
    /// Saga step status this state stands for: PENDING is INIT, PREPARED is
    /// PROCESSING, COMMITTED is SUCCESS and ROLLED_BACK is FAIL.
    pub fn step_status(self) -> OrderStatus {
        match self {
            FenceState::Pending => OrderStatus::Init,
            FenceState::Prepared => OrderStatus::Processing,
            FenceState::Committed => OrderStatus::Success,
            FenceState::RolledBack => OrderStatus::Fail,
        }
    }
}

/// Second-phase direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Commit,
    Rollback,
}

/// What the caller must do after consulting the fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply the local effect.
    Apply,
    /// Already done (or nothing to undo); acknowledge without effect.
    Skip,
}

/// Per-participant fence table.
pub struct BranchFence {
    participant: String,
    records: RwLock<HashMap<FenceKey, FenceState>>,
}

impl BranchFence {
    pub fn new(participant: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn state(&self, key: &FenceKey) -> Option<FenceState> {
        self.records.read().await.get(key).copied()
    }

    /// Claim a branch for its first phase.
    pub async fn begin_first(&self, key: &FenceKey) -> Result<Decision> {
        let mut records = self.records.write().await;
        match records.get(key).copied() {
            None => {
                records.insert(key.clone(), FenceState::Pending);
                Ok(Decision::Apply)
            }
            Some(FenceState::Pending) => Err(ParticipantError::Transient(format!(
                "first phase of branch {} already in progress",
                key.branch_id
            ))),
            Some(FenceState::Prepared) | Some(FenceState::Committed) => {
                debug!(participant = %self.participant, xid = %key.xid, branch_id = %key.branch_id, "Duplicate first phase, already applied");
                Ok(Decision::Skip)
            }
            Some(FenceState::RolledBack) => {
                warn!(participant = %self.participant, xid = %key.xid, branch_id = %key.branch_id, "Refusing first phase after rollback");
                Err(Rejection::Suspended {
                    xid: key.xid.clone(),
                    branch_id: key.branch_id.clone(),
                }
                .into())
            }
        }
    }

    /// Record the outcome of a claimed first phase.
    pub async fn finish_first(&self, key: &FenceKey, applied: bool) {
        let mut records = self.records.write().await;
        if records.get(key) != Some(&FenceState::Pending) {
            return;
        }
        if applied {
            records.insert(key.clone(), FenceState::Prepared);
        } else {
            records.remove(key);
        }
    }

    /// Claim a branch for its second phase.
    pub async fn begin(&self, key: &FenceKey, resolution: Resolution) -> Result<Decision> {
        let mut records = self.records.write().await;
        let current = records.get(key).copied();
        match (resolution, current) {
            (_, Some(FenceState::Pending)) => Err(ParticipantError::Transient(format!(
                "first phase of branch {} still in progress",
                key.branch_id
            ))),
            (Resolution::Commit, Some(FenceState::Prepared)) => {
                records.insert(key.clone(), FenceState::Committed);
                Ok(Decision::Apply)
            }
            (Resolution::Commit, Some(FenceState::Committed)) => Ok(Decision::Skip),
            (Resolution::Commit, None) => {
                warn!(participant = %self.participant, xid = %key.xid, branch_id = %key.branch_id, "Commit for unknown branch, treating as already committed");
                Ok(Decision::Skip)
            }
            (Resolution::Commit, Some(FenceState::RolledBack)) => Err(Rejection::Refused(format!(
                "branch {} was rolled back and cannot commit",
                key.branch_id
            ))
            .into()),
            (Resolution::Rollback, Some(FenceState::Prepared)) => {
                records.insert(key.clone(), FenceState::RolledBack);
                Ok(Decision::Apply)
            }
            (Resolution::Rollback, Some(FenceState::RolledBack)) => Ok(Decision::Skip),
            (Resolution::Rollback, None) => {
                info!(participant = %self.participant, xid = %key.xid, branch_id = %key.branch_id, "Empty rollback");
                records.insert(key.clone(), FenceState::RolledBack);
                Ok(Decision::Skip)
            }
            (Resolution::Rollback, Some(FenceState::Committed)) => {
                Err(Rejection::Refused(format!(
                    "branch {} was committed and cannot roll back",
                    key.branch_id
                ))
                .into())
            }
        }
    }

    /// Drop the resolved records of `xid`, tombstones included, and return
    /// how many went. PENDING and PREPARED records are kept.
    ///
    /// Only call this once no first-phase call for `xid` can still arrive:
    /// without its tombstone a late first phase would apply again.
    pub async fn prune(&self, xid: &str) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|key, state| {
            key.xid != xid || matches!(state, FenceState::Pending | FenceState::Prepared)
        });
        let pruned = before - records.len();
        if pruned > 0 {
            debug!(participant = %self.participant, xid, pruned, "Pruned fence records");
        }
        pruned
    }

    /// Undo a claim made by [`begin`](Self::begin) whose local effect failed.
    pub async fn revert(&self, key: &FenceKey) {
        let mut records = self.records.write().await;
        if let Some(state) = records.get_mut(key) {
            if matches!(state, FenceState::Committed | FenceState::RolledBack) {
                *state = FenceState::Prepared;
            }
        }
    }
}

/// Run a first-phase effect under the fence.
pub async fn run_first_phase<Fut>(fence: &BranchFence, key: &FenceKey, effect: Fut) -> Result<()>
where
    Fut: Future<Output = Result<()>>,
{
    if fence.begin_first(key).await? == Decision::Skip {
        return Ok(());
    }
    let result = effect.await;
    fence.finish_first(key, result.is_ok()).await;
    result
}

/// Run a second-phase effect under the fence.
pub async fn run_second_phase<Fut>(
    fence: &BranchFence,
    key: &FenceKey,
    resolution: Resolution,
    effect: Fut,
) -> Result<()>
where
    Fut: Future<Output = Result<()>>,
{
    if fence.begin(key, resolution).await? == Decision::Skip {
        return Ok(());
    }
    let result = effect.await;
    if result.is_err() {
        fence.revert(key).await;
    }
    result
}
