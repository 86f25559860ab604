//! Capability interfaces implemented by participant services.
//!
//! Each protocol is an explicit trait rather than annotated methods; the
//! local adapter maps an [`Operation`](super::Operation) onto the matching
//! capability.

use async_trait::async_trait;

use super::participant::{ActionContext, Result};

/// Try-Confirm-Cancel capability.
///
/// `confirm` and `cancel` must be idempotent; `cancel` must succeed without
/// effect when `try_reserve` never ran for the branch (empty rollback).
#[async_trait]
pub trait TccResource: Send + Sync {
    async fn try_reserve(&self, context: &ActionContext) -> Result<()>;

    async fn confirm(&self, context: &ActionContext) -> Result<()>;

    async fn cancel(&self, context: &ActionContext) -> Result<()>;
}

/// Saga step capability.
///
/// `compensate` is unconditionally reversible and a no-op when `forward`
/// never ran; `complete` is a terminal marker with no numeric effect.
#[async_trait]
pub trait SagaResource: Send + Sync {
    async fn forward(&self, context: &ActionContext) -> Result<()>;

    async fn compensate(&self, context: &ActionContext) -> Result<()>;

    async fn complete(&self, context: &ActionContext) -> Result<()>;
}

/// AT-mode collaborator.
///
/// `reduce` applies its effect immediately; the collaborator alone knows how
/// to undo it when `rollback` is signalled.
#[async_trait]
pub trait AtResource: Send + Sync {
    async fn reduce(&self, context: &ActionContext) -> Result<()>;

    /// Global commit: release whatever undo state the branch kept.
    async fn commit(&self, context: &ActionContext) -> Result<()>;

    /// Global rollback: undo the branch's local effect.
    async fn rollback(&self, context: &ActionContext) -> Result<()>;
}
