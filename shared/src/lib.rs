//! Shared types for the table session core
//!
//! Entity models, state machines, session events, the gateway command
//! envelope and the unified error codes used by the core and its clients.

pub mod command;
pub mod error;
pub mod event;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use command::{
    Actor, ActorRole, CommandError, CommandPayload, CommandResponse, ConflictState, ResponseData,
    SessionCommand,
};
pub use error::{ErrorCategory, ErrorCode, ErrorKind};
pub use event::{EventPayload, SessionEvent, SessionEventType};
