//! Saga orchestration.
//!
//! A saga is an ordered list of steps, each a forward action on one
//! participant paired with its compensation. `SagaOrchestrator::run` drives
//! the steps through the coordinator:
//!
//! 1. Forward each step in order
//! 2. On the first failure, compensate every step that succeeded or whose
//!    outcome is unknown, newest first, and report `FAIL`
//! 3. Otherwise complete every step in order and report `SUCCESS`
//!
//! Definitions are plain serde structs, loadable from YAML or JSON.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::config_base_dir;
use crate::interfaces::participant::{ActionContext, BranchMode};

use super::coordinator::TransactionCoordinator;
use super::transaction::{Result, TransactionError, TransactionStatus};

/// One step of a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    /// Step label used in logs.
    pub name: String,
    /// Routing name of the participant executing the step.
    pub participant: String,
    /// Step-specific parameters; saga input fills in whatever is not set.
    #[serde(default)]
    pub params: ActionContext,
}

impl SagaStep {
    pub fn new(name: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            participant: participant.into(),
            params: ActionContext::new(),
        }
    }

    pub fn with_params(mut self, params: ActionContext) -> Self {
        self.params = params;
        self
    }
}

/// An ordered list of saga steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub name: String,
    pub steps: Vec<SagaStep>,
}

impl SagaDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<SagaStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| TransactionError::InvalidRequest(format!("invalid saga definition: {e}")))
    }

    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source)
            .map_err(|e| TransactionError::InvalidRequest(format!("invalid saga definition: {e}")))
    }

    /// Load a definition file; relative paths resolve against the config
    /// base directory. `.json` files are parsed as JSON, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = if path.is_relative() {
            config_base_dir().join(path)
        } else {
            path.to_path_buf()
        };

        let source = std::fs::read_to_string(&path).map_err(|e| {
            TransactionError::InvalidRequest(format!("cannot read {}: {e}", path.display()))
        })?;

        let definition = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&source)?,
            _ => Self::from_yaml(&source)?,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// A saga needs at least one step and unique step names.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(TransactionError::InvalidRequest(format!(
                "saga {} has no steps",
                self.name
            )));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(TransactionError::InvalidRequest(format!(
                    "saga {} repeats step {}",
                    self.name, step.name
                )));
            }
        }
        Ok(())
    }
}

/// Final status of a saga run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Success,
    Fail,
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaStatus::Success => f.write_str("SUCCESS"),
            SagaStatus::Fail => f.write_str("FAIL"),
        }
    }
}

/// Result of one saga run.
#[derive(Debug, Clone)]
pub struct SagaReport {
    pub xid: Uuid,
    pub status: SagaStatus,
    /// Steps whose forward action succeeded, in execution order.
    pub succeeded: Vec<String>,
    /// Step that failed and why.
    pub failure: Option<(String, TransactionError)>,
}

pub struct SagaOrchestrator {
    coordinator: Arc<TransactionCoordinator>,
}

impl SagaOrchestrator {
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Run a saga with `input` as default parameters of every step.
    ///
    /// Step failures are reported as `FAIL`; an error is returned only when
    /// the definition is invalid or finalization could not complete.
    #[tracing::instrument(name = "saga.orchestrate", skip_all, fields(saga = %definition.name))]
    pub async fn run(&self, definition: &SagaDefinition, input: &ActionContext) -> Result<SagaReport> {
        definition.validate()?;

        let mut tx = self.coordinator.begin();
        let mut succeeded = Vec::with_capacity(definition.steps.len());
        let mut failure = None;

        for step in &definition.steps {
            let mut params = step.params.clone();
            params.merge_defaults(input);

            match self
                .coordinator
                .call_branch(&mut tx, &step.participant, BranchMode::Saga, params)
                .await
            {
                Ok(_) => succeeded.push(step.name.clone()),
                Err(e) => {
                    warn!(xid = %tx.id(), step = %step.name, error = %e, "Saga step failed, compensating");
                    failure = Some((step.name.clone(), e));
                    break;
                }
            }
        }

        let status = if failure.is_some() {
            self.coordinator.rollback(&mut tx).await?;
            SagaStatus::Fail
        } else {
            self.coordinator.commit(&mut tx).await?;
            SagaStatus::Success
        };

        debug_assert!(matches!(
            tx.status(),
            TransactionStatus::Committed | TransactionStatus::RolledBack
        ));
        info!(xid = %tx.id(), status = %status, steps = succeeded.len(), "Saga finished");

        Ok(SagaReport {
            xid: tx.id(),
            status,
            succeeded,
            failure,
        })
    }
}
