//! Transaction coordinator.
//!
//! Owns the participant registry and drives the branches of a
//! [`GlobalTransaction`] through their protocols:
//!
//! - first phase (Try / forward / reduce): bounded retries through `backon`,
//!   each attempt under the call deadline. Exhausted retries leave the branch
//!   `UNCERTAIN`.
//! - finalize (Confirm / complete / AT commit, Cancel / compensate / AT
//!   rollback): retried until acknowledged. A business rejection or an
//!   invariant violation stops the transaction and flags it.
//!
//! Commit runs branches in registration order, rollback in reverse.
//! Terminal transactions are archived, up to `archive_capacity` of them;
//! the oldest entries are dropped first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::interfaces::participant::{
    ActionContext, BranchMode, Operation, ParticipantClient, ParticipantError, BRANCH_ID_KEY,
    XID_KEY,
};
use crate::utils::retry::is_retryable;

use super::transaction::{
    Branch, BranchFailure, BranchResult, BranchStatus, GlobalTransaction, Result,
    TransactionError, TransactionStatus,
};

/// One first-phase call requested by the initiator.
#[derive(Debug, Clone)]
pub struct BranchCall {
    /// Routing name of the participant.
    pub resource_id: String,
    pub mode: BranchMode,
    pub params: ActionContext,
}

impl BranchCall {
    pub fn new(resource_id: impl Into<String>, mode: BranchMode, params: ActionContext) -> Self {
        Self {
            resource_id: resource_id.into(),
            mode,
            params,
        }
    }

    pub fn tcc(resource_id: impl Into<String>, params: ActionContext) -> Self {
        Self::new(resource_id, BranchMode::Tcc, params)
    }

    pub fn saga(resource_id: impl Into<String>, params: ActionContext) -> Self {
        Self::new(resource_id, BranchMode::Saga, params)
    }

    pub fn at(resource_id: impl Into<String>, params: ActionContext) -> Self {
        Self::new(resource_id, BranchMode::At, params)
    }
}

/// Branch prepared for dispatch, with the outcome of its first phase.
struct Dispatched {
    branch: Branch,
    outcome: std::result::Result<(), ParticipantError>,
}

/// Terminal transactions in archival order, bounded by capacity.
struct Archive {
    entries: HashMap<Uuid, GlobalTransaction>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl Archive {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, tx: GlobalTransaction) {
        let id = tx.id;
        if self.entries.insert(id, tx).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                debug!(xid = %oldest, "Evicted transaction from archive");
            }
        }
    }
}

pub struct TransactionCoordinator {
    participants: HashMap<String, Arc<dyn ParticipantClient>>,
    config: CoordinatorConfig,
    archive: RwLock<Archive>,
}

impl TransactionCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            participants: HashMap::new(),
            archive: RwLock::new(Archive::new(config.archive_capacity)),
            config,
        }
    }

    /// Register a participant under its routing name.
    pub fn register(&mut self, client: Arc<dyn ParticipantClient>) {
        debug!(participant = %client.name(), "Registered participant");
        self.participants.insert(client.name().to_string(), client);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_participant(mut self, client: Arc<dyn ParticipantClient>) -> Self {
        self.register(client);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn participant(&self, resource_id: &str) -> Result<Arc<dyn ParticipantClient>> {
        self.participants
            .get(resource_id)
            .cloned()
            .ok_or_else(|| TransactionError::UnknownParticipant(resource_id.to_string()))
    }

    /// Start a new global transaction.
    pub fn begin(&self) -> GlobalTransaction {
        let tx = GlobalTransaction::new();
        info!(xid = %tx.id, "Global transaction begun");
        tx
    }

    /// Terminal transaction by id, while it is still archived.
    pub async fn archived(&self, id: Uuid) -> Option<GlobalTransaction> {
        self.archive.read().await.entries.get(&id).cloned()
    }

    fn ensure_status(
        tx: &GlobalTransaction,
        allowed: &[TransactionStatus],
        operation: &'static str,
    ) -> Result<()> {
        if allowed.contains(&tx.status) {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                xid: tx.id,
                status: tx.status,
                operation,
            })
        }
    }

    /// One participant call under the call deadline.
    async fn invoke(
        &self,
        client: &dyn ParticipantClient,
        operation: Operation,
        context: &ActionContext,
    ) -> std::result::Result<(), ParticipantError> {
        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, client.call(operation, context)).await {
            Ok(result) => result,
            Err(_) => Err(ParticipantError::Timeout(timeout)),
        }
    }

    /// Build the branch and run its first phase with bounded retries.
    async fn dispatch(
        &self,
        xid: Uuid,
        client: Arc<dyn ParticipantClient>,
        call: BranchCall,
    ) -> Dispatched {
        let branch_id = Uuid::new_v4();
        let mut context = call.params;
        context.insert(XID_KEY, xid.to_string());
        context.insert(BRANCH_ID_KEY, branch_id.to_string());

        let operation = Operation::first_phase(call.mode);
        let outcome = (|| async { self.invoke(client.as_ref(), operation, &context).await })
            .retry(self.config.first_phase.backoff())
            .when(is_retryable)
            .notify(|err: &ParticipantError, dur: Duration| {
                warn!(
                    xid = %xid,
                    branch_id = %branch_id,
                    participant = %call.resource_id,
                    operation = %operation,
                    error = %err,
                    retry_in = ?dur,
                    "First-phase call failed, retrying"
                );
            })
            .await;

        Dispatched {
            branch: Branch {
                id: branch_id,
                xid,
                mode: call.mode,
                resource_id: call.resource_id,
                status: BranchStatus::prepared(call.mode),
                context,
            },
            outcome,
        }
    }

    /// Register a dispatched branch on the transaction.
    fn record(&self, tx: &mut GlobalTransaction, dispatched: Dispatched) -> BranchResult {
        let Dispatched { mut branch, outcome } = dispatched;
        let xid = tx.id;

        match outcome {
            Ok(()) => {
                info!(
                    xid = %xid,
                    branch_id = %branch.id,
                    participant = %branch.resource_id,
                    mode = %branch.mode,
                    status = %branch.status,
                    "Branch registered"
                );
                let id = branch.id;
                tx.branches.push(branch);
                Ok(id)
            }
            Err(ParticipantError::Rejected(rejection)) => {
                warn!(xid = %xid, participant = %branch.resource_id, reason = %rejection, "First phase rejected");
                tx.failures.push(BranchFailure {
                    resource_id: branch.resource_id,
                    reason: rejection.to_string(),
                });
                Err(TransactionError::Rejected { xid, rejection })
            }
            Err(ParticipantError::InvariantViolation(message)) => {
                error!(xid = %xid, participant = %branch.resource_id, error = %message, "Participant reported invariant violation");
                tx.failures.push(BranchFailure {
                    resource_id: branch.resource_id,
                    reason: message.clone(),
                });
                Err(TransactionError::InvariantViolation { xid, message })
            }
            Err(err) => {
                warn!(
                    xid = %xid,
                    branch_id = %branch.id,
                    participant = %branch.resource_id,
                    error = %err,
                    "First phase retries exhausted, branch UNCERTAIN"
                );
                branch.status = BranchStatus::Uncertain;
                let reason = format!("{} on {}", err, branch.resource_id);
                tx.branches.push(branch);
                Err(TransactionError::Aborted { xid, reason })
            }
        }
    }

    /// Dispatch the first phase of one branch.
    #[tracing::instrument(name = "coordinator.call_branch", skip_all, fields(xid = %tx.id, resource_id = %resource_id, mode = %mode))]
    pub async fn call_branch(
        &self,
        tx: &mut GlobalTransaction,
        resource_id: &str,
        mode: BranchMode,
        params: ActionContext,
    ) -> BranchResult {
        Self::ensure_status(tx, &[TransactionStatus::Active], "call a branch")?;
        let client = self.participant(resource_id)?;

        let dispatched = self
            .dispatch(tx.id, client, BranchCall::new(resource_id, mode, params))
            .await;
        self.record(tx, dispatched)
    }

    /// Dispatch several independent Try/reduce calls concurrently.
    ///
    /// Branches are registered in call order. Returns the first failure by
    /// call order.
    #[tracing::instrument(name = "coordinator.call_branches", skip_all, fields(xid = %tx.id, calls = calls.len()))]
    pub async fn call_branches(
        &self,
        tx: &mut GlobalTransaction,
        calls: Vec<BranchCall>,
    ) -> Result<Vec<Uuid>> {
        Self::ensure_status(tx, &[TransactionStatus::Active], "call branches")?;
        if calls.iter().any(|c| c.mode == BranchMode::Saga) {
            return Err(TransactionError::InvalidRequest(
                "saga steps must run sequentially".to_string(),
            ));
        }

        let clients = calls
            .iter()
            .map(|c| self.participant(&c.resource_id))
            .collect::<Result<Vec<_>>>()?;

        let xid = tx.id;
        let dispatched = join_all(
            clients
                .into_iter()
                .zip(calls)
                .map(|(client, call)| self.dispatch(xid, client, call)),
        )
        .await;

        let mut ids = Vec::with_capacity(dispatched.len());
        let mut first_error = None;
        for d in dispatched {
            match self.record(tx, d) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }

    /// Deliver a finalize operation until the participant acknowledges it.
    async fn finalize(
        &self,
        branch: &Branch,
        operation: Operation,
    ) -> std::result::Result<(), ParticipantError> {
        let client = self.participant(&branch.resource_id).map_err(|e| {
            ParticipantError::InvariantViolation(format!("branch {}: {}", branch.id, e))
        })?;
        let retry = self.config.finalize.retry_config();
        let warn_every = self.config.finalize.warn_every.max(1);

        let mut attempt: u32 = 0;
        loop {
            match self.invoke(client.as_ref(), operation, &branch.context).await {
                Ok(()) => {
                    debug!(xid = %branch.xid, branch_id = %branch.id, operation = %operation, attempts = attempt + 1, "Finalize acknowledged");
                    return Ok(());
                }
                Err(err) if is_retryable(&err) && retry.should_retry(attempt) => {
                    let delay = retry.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    if attempt % warn_every == 0 {
                        warn!(
                            xid = %branch.xid,
                            branch_id = %branch.id,
                            participant = %branch.resource_id,
                            operation = %operation,
                            attempts = attempt,
                            error = %err,
                            "Finalize still not acknowledged"
                        );
                    } else {
                        debug!(xid = %branch.xid, branch_id = %branch.id, operation = %operation, error = %err, retry_in = ?delay, "Finalize failed, retrying");
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Drive one branch to `target` by delivering `operation`.
    ///
    /// On failure the transaction is flagged and left in its current status.
    async fn finish_branch(
        &self,
        tx: &mut GlobalTransaction,
        index: usize,
        operation: Operation,
        target: BranchStatus,
    ) -> Result<()> {
        let branch = &tx.branches[index];
        if !branch.status.can_transition_to(target, branch.mode) {
            let message = format!(
                "branch {} cannot move from {} to {}",
                branch.id, branch.status, target
            );
            error!(xid = %tx.id, error = %message, "Invalid branch transition");
            tx.flag = Some(message.clone());
            return Err(TransactionError::InvariantViolation { xid: tx.id, message });
        }

        if let Err(err) = self.finalize(branch, operation).await {
            let message = format!(
                "{} of branch {} on {} failed: {}",
                operation, branch.id, branch.resource_id, err
            );
            error!(xid = %tx.id, branch_id = %branch.id, error = %err, status = %tx.status, "Finalize refused, transaction flagged");
            tx.flag = Some(message.clone());
            return Err(TransactionError::InvariantViolation { xid: tx.id, message });
        }

        tx.branches[index].status = target;
        Ok(())
    }

    async fn archive(&self, tx: &GlobalTransaction) {
        self.archive.write().await.insert(tx.clone());
    }

    /// Commit every branch.
    ///
    /// Requires an `ACTIVE` transaction with no recorded failures and no
    /// `UNCERTAIN` branch; otherwise returns `InvalidState` without touching
    /// any branch.
    #[tracing::instrument(name = "coordinator.commit", skip_all, fields(xid = %tx.id))]
    pub async fn commit(&self, tx: &mut GlobalTransaction) -> Result<()> {
        Self::ensure_status(tx, &[TransactionStatus::Active], "commit")?;
        if !tx.failures.is_empty() || tx.has_uncertain() {
            warn!(xid = %tx.id, failures = tx.failures.len(), "Commit refused, transaction must roll back");
            return Err(TransactionError::InvalidState {
                xid: tx.id,
                status: tx.status,
                operation: "commit a transaction with failed branches",
            });
        }

        tx.status = TransactionStatus::Committing;
        for index in 0..tx.branches.len() {
            let mode = tx.branches[index].mode;
            self.finish_branch(
                tx,
                index,
                Operation::commit_phase(mode),
                BranchStatus::committed(mode),
            )
            .await?;
        }

        tx.status = TransactionStatus::Committed;
        self.archive(tx).await;
        info!(xid = %tx.id, branches = tx.branches.len(), "Global transaction committed");
        Ok(())
    }

    /// Roll back every branch that reached a reversible state, in reverse
    /// registration order.
    ///
    /// Valid on `ACTIVE` and on `ROLLING_BACK` (resume).
    #[tracing::instrument(name = "coordinator.rollback", skip_all, fields(xid = %tx.id))]
    pub async fn rollback(&self, tx: &mut GlobalTransaction) -> Result<()> {
        Self::ensure_status(
            tx,
            &[TransactionStatus::Active, TransactionStatus::RollingBack],
            "roll back",
        )?;

        tx.status = TransactionStatus::RollingBack;
        for index in (0..tx.branches.len()).rev() {
            let branch = &tx.branches[index];
            if branch.status.is_final() {
                continue;
            }

            let mode = branch.mode;
            self.finish_branch(
                tx,
                index,
                Operation::rollback_phase(mode),
                BranchStatus::rolled_back(mode),
            )
            .await?;
        }

        tx.status = TransactionStatus::RolledBack;
        tx.flag = None;
        self.archive(tx).await;
        info!(xid = %tx.id, branches = tx.branches.len(), "Global transaction rolled back");
        Ok(())
    }

    /// Begin, run every call, then commit; on failure roll back and return
    /// the originating error.
    ///
    /// Consecutive TCC/AT calls are dispatched concurrently, saga steps one
    /// at a time.
    #[tracing::instrument(name = "coordinator.execute", skip_all, fields(calls = calls.len()))]
    pub async fn execute(&self, calls: Vec<BranchCall>) -> Result<Uuid> {
        let mut tx = self.begin();

        match self.run_calls(&mut tx, calls).await {
            Ok(()) => {
                self.commit(&mut tx).await?;
                Ok(tx.id)
            }
            Err(origin) => {
                warn!(xid = %tx.id, error = %origin, "Global transaction failed, rolling back");
                self.rollback(&mut tx).await?;
                Err(origin)
            }
        }
    }

    async fn run_calls(&self, tx: &mut GlobalTransaction, calls: Vec<BranchCall>) -> Result<()> {
        let mut batch = Vec::new();
        for call in calls {
            if call.mode == BranchMode::Saga {
                if !batch.is_empty() {
                    self.call_branches(tx, std::mem::take(&mut batch)).await?;
                }
                self.call_branch(tx, &call.resource_id, call.mode, call.params)
                    .await?;
            } else {
                batch.push(call);
            }
        }
        if !batch.is_empty() {
            self.call_branches(tx, batch).await?;
        }
        Ok(())
    }
}
