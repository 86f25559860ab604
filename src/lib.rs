//! dtxn - Distributed transaction coordinator
//!
//! Coordinates global transactions across participants that each own a
//! slice of state. Participants take part in one of three modes:
//!
//! - TCC: Try reserves, Confirm settles, Cancel releases
//! - Saga: forward action with a compensating action, run in order
//! - AT: the participant reduces directly and keeps an undo record
//!
//! Participants guard every phase with a per-branch fence so that repeated,
//! reordered or late calls stay idempotent.

pub mod clients;
pub mod config;
pub mod interfaces;
pub mod ledger;
pub mod orchestration;
pub mod participants;
pub mod services;
pub mod utils;
