//! Core error type
//!
//! Every rejected operation returns one of these and leaves all entities
//! exactly as they were. [`SessionError::code`] maps onto the shared error
//! codes so gateways can classify failures without matching on variants.

use crate::storage::StorageError;
use shared::command::{CommandError, ConflictState};
use shared::models::{CallStatus, OrderStatus, Session, WaiterCall};
use shared::{ErrorCode, ErrorKind};
use thiserror::Error;

/// Session core errors
#[derive(Debug, Error)]
pub enum SessionError {
    // ========== Table / Session ==========
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table is not active: {0}")]
    TableInactive(String),

    #[error("Table {} already has active session {}", session.table_id, session.id)]
    TableOccupied { session: Box<Session> },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session is closed: {0}")]
    SessionClosed(String),

    #[error("Session already closed: {0}")]
    SessionAlreadyClosed(String),

    // ========== Participant ==========
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Participant {participant_id} is not in session {session_id}")]
    ParticipantNotInSession {
        participant_id: String,
        session_id: String,
    },

    #[error("Participant has left the session: {0}")]
    ParticipantLeft(String),

    #[error("Display name '{requested}' is taken")]
    NameTaken { requested: String, suggestion: String },

    #[error("Invalid display name: {0}")]
    InvalidName(String),

    // ========== Orders ==========
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order line not found: {0}")]
    LineNotFound(String),

    #[error("Catalog item not found: {0}")]
    ItemNotFound(String),

    #[error("Catalog item unavailable: {0}")]
    ItemUnavailable(String),

    #[error("Customization {customization_id} is not offered for item {item_id}")]
    InvalidCustomization {
        item_id: String,
        customization_id: String,
    },

    #[error("Quantity {quantity} out of range (1..={max})")]
    QuantityOutOfRange { quantity: i32, max: i32 },

    #[error("Note too long: {len} characters (max {max})")]
    NoteTooLong { len: usize, max: usize },

    #[error("Order has no lines: {0}")]
    EmptyOrder(String),

    #[error("Order {order_id} is {status}, only pending orders can be edited")]
    OrderNotPending { order_id: String, status: OrderStatus },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Order {order_id} is already {status}")]
    AlreadyTerminal { order_id: String, status: OrderStatus },

    // ========== Waiter calls ==========
    #[error("Waiter call not found: {0}")]
    CallNotFound(String),

    #[error("Table {} already has active call {}", call.table_id, call.id)]
    CallAlreadyActive { call: Box<WaiterCall> },

    #[error("Table {table_id} does not belong to session {session_id}")]
    TableMismatch { table_id: String, session_id: String },

    #[error("Satisfaction score {0} out of range (1..=5)")]
    InvalidSatisfactionScore(u8),

    // ========== Permission / System ==========
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    pub fn order_transition(from: OrderStatus, to: OrderStatus) -> Self {
        SessionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn call_transition(from: CallStatus, to: CallStatus) -> Self {
        SessionError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::TableNotFound(_) => ErrorCode::TableNotFound,
            SessionError::TableInactive(_) => ErrorCode::TableInactive,
            SessionError::TableOccupied { .. } => ErrorCode::TableOccupied,
            SessionError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            SessionError::SessionClosed(_) => ErrorCode::SessionClosed,
            SessionError::SessionAlreadyClosed(_) => ErrorCode::SessionAlreadyClosed,
            SessionError::ParticipantNotFound(_) => ErrorCode::ParticipantNotFound,
            SessionError::ParticipantNotInSession { .. } => ErrorCode::ParticipantNotInSession,
            SessionError::ParticipantLeft(_) => ErrorCode::ParticipantLeft,
            SessionError::NameTaken { .. } => ErrorCode::NameTaken,
            SessionError::InvalidName(_) => ErrorCode::InvalidName,
            SessionError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            SessionError::LineNotFound(_) => ErrorCode::LineNotFound,
            SessionError::ItemNotFound(_) => ErrorCode::ItemNotFound,
            SessionError::ItemUnavailable(_) => ErrorCode::ItemUnavailable,
            SessionError::InvalidCustomization { .. } => ErrorCode::InvalidCustomization,
            SessionError::QuantityOutOfRange { .. } => ErrorCode::QuantityOutOfRange,
            SessionError::NoteTooLong { .. } => ErrorCode::NoteTooLong,
            SessionError::EmptyOrder(_) => ErrorCode::EmptyOrder,
            SessionError::OrderNotPending { .. } => ErrorCode::OrderNotPending,
            SessionError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            SessionError::AlreadyTerminal { .. } => ErrorCode::AlreadyTerminal,
            SessionError::CallNotFound(_) => ErrorCode::CallNotFound,
            SessionError::CallAlreadyActive { .. } => ErrorCode::CallAlreadyActive,
            SessionError::TableMismatch { .. } => ErrorCode::TableMismatch,
            SessionError::InvalidSatisfactionScore(_) => ErrorCode::InvalidSatisfactionScore,
            SessionError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            SessionError::CollaboratorUnavailable(_) => ErrorCode::CollaboratorUnavailable,
            SessionError::Storage(_) => ErrorCode::StorageFailed,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// The existing state a conflict refers to
    pub fn conflict_state(&self) -> Option<ConflictState> {
        match self {
            SessionError::TableOccupied { session } => Some(ConflictState::ActiveSession {
                session: session.as_ref().clone(),
            }),
            SessionError::CallAlreadyActive { call } => Some(ConflictState::ActiveCall {
                call: call.as_ref().clone(),
            }),
            SessionError::NameTaken {
                requested,
                suggestion,
            } => Some(ConflictState::Name {
                requested: requested.clone(),
                suggestion: suggestion.clone(),
            }),
            _ => None,
        }
    }
}

impl From<SessionError> for CommandError {
    fn from(err: SessionError) -> Self {
        if let SessionError::Storage(e) = &err {
            tracing::error!(error = %e, "Storage error occurred");
        }
        let conflict = err.conflict_state();
        let error = CommandError::new(err.code(), err.to_string());
        match conflict {
            Some(state) => error.with_conflict(state),
            None => error,
        }
    }
}
