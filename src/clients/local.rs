//! In-process participant client.
//!
//! Dispatches an [`Operation`] to the TCC, Saga or AT capability of a local
//! service. Operations of a different mode than the wrapped resource are
//! refused. Each call runs on its own tokio task.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::interfaces::participant::{
    ActionContext, BranchMode, Operation, ParticipantClient, ParticipantError, Rejection, Result,
};
use crate::interfaces::resource::{AtResource, SagaResource, TccResource};

/// A local service, tagged by the protocol it implements.
#[derive(Clone)]
pub enum LocalResource {
    Tcc(Arc<dyn TccResource>),
    Saga(Arc<dyn SagaResource>),
    At(Arc<dyn AtResource>),
}

impl LocalResource {
    pub fn mode(&self) -> BranchMode {
        match self {
            LocalResource::Tcc(_) => BranchMode::Tcc,
            LocalResource::Saga(_) => BranchMode::Saga,
            LocalResource::At(_) => BranchMode::At,
        }
    }

    async fn dispatch(&self, name: &str, operation: Operation, context: &ActionContext) -> Result<()> {
        match (self, operation) {
            (LocalResource::Tcc(r), Operation::TryReduce) => r.try_reserve(context).await,
            (LocalResource::Tcc(r), Operation::ConfirmReduce) => r.confirm(context).await,
            (LocalResource::Tcc(r), Operation::CancelReduce) => r.cancel(context).await,
            (LocalResource::Saga(r), Operation::ReduceForward) => r.forward(context).await,
            (LocalResource::Saga(r), Operation::Compensate) => r.compensate(context).await,
            (LocalResource::Saga(r), Operation::Complete) => r.complete(context).await,
            (LocalResource::At(r), Operation::ReduceAt) => r.reduce(context).await,
            (LocalResource::At(r), Operation::AtCommit) => r.commit(context).await,
            (LocalResource::At(r), Operation::AtRollback) => r.rollback(context).await,
            (resource, operation) => Err(Rejection::Refused(format!(
                "{} participant {} does not support {}",
                resource.mode(),
                name,
                operation
            ))
            .into()),
        }
    }
}

/// Participant client calling a service in the same process.
pub struct LocalParticipant {
    name: String,
    resource: LocalResource,
}

impl LocalParticipant {
    pub fn new(name: impl Into<String>, resource: LocalResource) -> Self {
        Self {
            name: name.into(),
            resource,
        }
    }

    pub fn tcc(name: impl Into<String>, resource: Arc<dyn TccResource>) -> Self {
        Self::new(name, LocalResource::Tcc(resource))
    }

    pub fn saga(name: impl Into<String>, resource: Arc<dyn SagaResource>) -> Self {
        Self::new(name, LocalResource::Saga(resource))
    }

    pub fn at(name: impl Into<String>, resource: Arc<dyn AtResource>) -> Self {
        Self::new(name, LocalResource::At(resource))
    }

    pub fn mode(&self) -> BranchMode {
        self.resource.mode()
    }
}

#[async_trait]
impl ParticipantClient for LocalParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    /// Runs the operation on its own task so that a caller giving up on the
    /// call (deadline) does not cancel the participant midway.
    async fn call(&self, operation: Operation, context: &ActionContext) -> Result<()> {
        debug!(participant = %self.name, operation = %operation, "Local call");
        let resource = self.resource.clone();
        let name = self.name.clone();
        let context = context.clone();

        tokio::spawn(async move { resource.dispatch(&name, operation, &context).await })
            .await
            .map_err(|e| ParticipantError::Transient(format!("participant task failed: {e}")))?
    }
}
