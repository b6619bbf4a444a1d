//! Error category and kind classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Domain category, determined by the code range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Table and session errors (1xxx)
    Session,
    /// Participant errors (2xxx)
    Participant,
    /// Permission errors (3xxx)
    Permission,
    /// Order errors (4xxx)
    Order,
    /// Waiter call errors (5xxx)
    WaiterCall,
    /// System errors (9xxx and anything unassigned)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..1000 => Self::General,
            1000..2000 => Self::Session,
            2000..3000 => Self::Participant,
            3000..4000 => Self::Permission,
            4000..5000 => Self::Order,
            5000..6000 => Self::WaiterCall,
            _ => Self::System,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Session => "session",
            Self::Participant => "participant",
            Self::Permission => "permission",
            Self::Order => "order",
            Self::WaiterCall => "waiter_call",
            Self::System => "system",
        }
    }
}

/// How a caller is expected to react to an error
///
/// | Kind | Reaction |
/// |------|----------|
/// | `Conflict` | present the existing conflicting state |
/// | `InvalidInput` | surface verbatim |
/// | `State` | refetch, retry once, then surface |
/// | `NotFound` | surface verbatim |
/// | `Permission` | surface verbatim |
/// | `Collaborator` | already retried with backoff; surface |
/// | `System` | log and surface as internal |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    InvalidInput,
    State,
    NotFound,
    Permission,
    Collaborator,
    System,
}

impl ErrorKind {
    /// Whether a gateway should refetch and retry once before surfacing
    pub fn is_retryable_state(&self) -> bool {
        matches!(self, Self::State)
    }
}

impl ErrorCode {
    /// Get the domain category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }

    /// Get the reaction kind for this error code
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::TableOccupied | ErrorCode::CallAlreadyActive | ErrorCode::NameTaken => {
                ErrorKind::Conflict
            }

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidName
            | ErrorCode::ItemNotFound
            | ErrorCode::ItemUnavailable
            | ErrorCode::InvalidCustomization
            | ErrorCode::QuantityOutOfRange
            | ErrorCode::NoteTooLong
            | ErrorCode::EmptyOrder
            | ErrorCode::TableMismatch
            | ErrorCode::ParticipantNotInSession
            | ErrorCode::InvalidSatisfactionScore => ErrorKind::InvalidInput,

            ErrorCode::InvalidTransition
            | ErrorCode::SessionClosed
            | ErrorCode::SessionAlreadyClosed
            | ErrorCode::AlreadyTerminal
            | ErrorCode::OrderNotPending
            | ErrorCode::ParticipantLeft
            | ErrorCode::TableInactive => ErrorKind::State,

            ErrorCode::NotFound
            | ErrorCode::TableNotFound
            | ErrorCode::SessionNotFound
            | ErrorCode::ParticipantNotFound
            | ErrorCode::OrderNotFound
            | ErrorCode::LineNotFound
            | ErrorCode::CallNotFound => ErrorKind::NotFound,

            ErrorCode::PermissionDenied => ErrorKind::Permission,

            ErrorCode::CollaboratorUnavailable => ErrorKind::Collaborator,

            ErrorCode::Success
            | ErrorCode::Unknown
            | ErrorCode::InternalError
            | ErrorCode::StorageFailed => ErrorKind::System,
        }
    }
}
