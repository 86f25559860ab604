//! Scripted participant client for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::participant::{
    ActionContext, Operation, ParticipantClient, ParticipantError, Rejection, Result,
};

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub participant: String,
    pub operation: Operation,
    pub context: ActionContext,
}

/// Call log shared by several participants to observe global ordering.
#[derive(Default, Clone)]
pub struct CallJournal {
    calls: Arc<RwLock<Vec<RecordedCall>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, call: RecordedCall) {
        self.calls.write().await.push(call);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// `(participant, operation)` pairs in call order.
    pub async fn sequence(&self) -> Vec<(String, Operation)> {
        self.calls
            .read()
            .await
            .iter()
            .map(|c| (c.participant.clone(), c.operation))
            .collect()
    }
}

/// Participant whose outcomes are scripted per operation.
///
/// Each operation pops the next queued outcome; once the queue is empty the
/// call succeeds.
pub struct ScriptedParticipant {
    name: String,
    outcomes: RwLock<HashMap<Operation, VecDeque<Result<()>>>>,
    delays: RwLock<HashMap<Operation, Duration>>,
    journal: CallJournal,
}

impl ScriptedParticipant {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_journal(name, CallJournal::new())
    }

    pub fn with_journal(name: impl Into<String>, journal: CallJournal) -> Self {
        Self {
            name: name.into(),
            outcomes: RwLock::new(HashMap::new()),
            delays: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Queue an outcome for the next call of `operation`.
    pub async fn push(&self, operation: Operation, outcome: Result<()>) {
        self.outcomes
            .write()
            .await
            .entry(operation)
            .or_default()
            .push_back(outcome);
    }

    /// Queue `times` transient failures for `operation`.
    pub async fn fail_transient(&self, operation: Operation, times: usize) {
        for _ in 0..times {
            self.push(
                operation,
                Err(ParticipantError::Transient("Mock connection failure".to_string())),
            )
            .await;
        }
    }

    /// Queue a business rejection for `operation`.
    pub async fn reject(&self, operation: Operation, reason: &str) {
        self.push(operation, Err(Rejection::Refused(reason.to_string()).into()))
            .await;
    }

    /// Delay every call of `operation` (to exercise call timeouts).
    pub async fn set_delay(&self, operation: Operation, delay: Duration) {
        self.delays.write().await.insert(operation, delay);
    }

    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    /// Calls made to this participant.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.journal
            .calls()
            .await
            .into_iter()
            .filter(|c| c.participant == self.name)
            .collect()
    }

    /// Number of calls of `operation` made to this participant.
    pub async fn count(&self, operation: Operation) -> usize {
        self.calls()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

#[async_trait]
impl ParticipantClient for ScriptedParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, operation: Operation, context: &ActionContext) -> Result<()> {
        self.journal
            .record(RecordedCall {
                participant: self.name.clone(),
                operation,
                context: context.clone(),
            })
            .await;

        let delay = self.delays.read().await.get(&operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.outcomes
            .write()
            .await
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}
