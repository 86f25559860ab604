//! Abstract interfaces for dtxn components.
//!
//! These traits define the contracts for:
//! - Participant RPC (how the coordinator reaches a branch)
//! - Participant capabilities (TCC, Saga, AT resource services)

pub mod participant;
pub mod resource;

pub use participant::{
    ActionContext, BranchMode, Operation, ParticipantClient, ParticipantError, Rejection,
    AMOUNT_KEY, BRANCH_ID_KEY, COUNT_KEY, OWNER_ID_KEY, RESOURCE_ID_KEY, XID_KEY,
};
pub use resource::{AtResource, SagaResource, TccResource};
