//! Participant clients.

pub mod http;
pub mod local;
pub mod mock;

pub use http::{HttpParticipantClient, HttpParticipantConfig};
pub use local::{LocalParticipant, LocalResource};
pub use mock::{CallJournal, RecordedCall, ScriptedParticipant};
