//! Unified error codes for the table session core
//!
//! Error codes are organized by domain range:
//! - 0xxx: General errors
//! - 1xxx: Table / session errors
//! - 2xxx: Participant errors
//! - 3xxx: Permission errors
//! - 4xxx: Order errors
//! - 5xxx: Waiter call errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Represented as `u16` on the wire so gateways and clients in other
/// languages can switch on the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Illegal state machine transition
    InvalidTransition = 10,

    // ==================== 1xxx: Table / Session ====================
    TableNotFound = 1001,
    TableInactive = 1002,
    /// An active session already exists for the table
    TableOccupied = 1003,
    SessionNotFound = 1004,
    /// The session is no longer active
    SessionClosed = 1005,
    SessionAlreadyClosed = 1006,

    // ==================== 2xxx: Participant ====================
    ParticipantNotFound = 2001,
    ParticipantNotInSession = 2002,
    ParticipantLeft = 2003,
    /// Display name already used in the session
    NameTaken = 2004,
    InvalidName = 2005,

    // ==================== 3xxx: Permission ====================
    PermissionDenied = 3001,

    // ==================== 4xxx: Order ====================
    OrderNotFound = 4001,
    LineNotFound = 4002,
    ItemNotFound = 4003,
    ItemUnavailable = 4004,
    InvalidCustomization = 4005,
    QuantityOutOfRange = 4006,
    NoteTooLong = 4007,
    EmptyOrder = 4008,
    /// Cart mutation on an order that left `pending`
    OrderNotPending = 4009,
    AlreadyTerminal = 4010,

    // ==================== 5xxx: Waiter Call ====================
    CallNotFound = 5001,
    /// A non-terminal call already exists for the table
    CallAlreadyActive = 5002,
    TableMismatch = 5003,
    InvalidSatisfactionScore = 5004,

    // ==================== 9xxx: System ====================
    InternalError = 9001,
    StorageFailed = 9002,
    CollaboratorUnavailable = 9003,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::InvalidTransition => "Invalid state transition",

            ErrorCode::TableNotFound => "Table not found",
            ErrorCode::TableInactive => "Table is not active",
            ErrorCode::TableOccupied => "Table already has an active session",
            ErrorCode::SessionNotFound => "Session not found",
            ErrorCode::SessionClosed => "Session is closed",
            ErrorCode::SessionAlreadyClosed => "Session is already closed",

            ErrorCode::ParticipantNotFound => "Participant not found",
            ErrorCode::ParticipantNotInSession => "Participant does not belong to the session",
            ErrorCode::ParticipantLeft => "Participant has left the session",
            ErrorCode::NameTaken => "Display name is already taken",
            ErrorCode::InvalidName => "Display name is invalid",

            ErrorCode::PermissionDenied => "Permission denied",

            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::LineNotFound => "Order line not found",
            ErrorCode::ItemNotFound => "Catalog item not found",
            ErrorCode::ItemUnavailable => "Catalog item is unavailable",
            ErrorCode::InvalidCustomization => "Customization is not offered for this item",
            ErrorCode::QuantityOutOfRange => "Quantity is out of range",
            ErrorCode::NoteTooLong => "Note is too long",
            ErrorCode::EmptyOrder => "Order has no lines",
            ErrorCode::OrderNotPending => "Order is no longer editable",
            ErrorCode::AlreadyTerminal => "Order is already delivered or cancelled",

            ErrorCode::CallNotFound => "Waiter call not found",
            ErrorCode::CallAlreadyActive => "Table already has an active waiter call",
            ErrorCode::TableMismatch => "Table does not match the session",
            ErrorCode::InvalidSatisfactionScore => "Satisfaction score must be between 1 and 5",

            ErrorCode::InternalError => "Internal error",
            ErrorCode::StorageFailed => "Storage operation failed",
            ErrorCode::CollaboratorUnavailable => "Dependent service is unavailable",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            10 => Ok(ErrorCode::InvalidTransition),

            1001 => Ok(ErrorCode::TableNotFound),
            1002 => Ok(ErrorCode::TableInactive),
            1003 => Ok(ErrorCode::TableOccupied),
            1004 => Ok(ErrorCode::SessionNotFound),
            1005 => Ok(ErrorCode::SessionClosed),
            1006 => Ok(ErrorCode::SessionAlreadyClosed),

            2001 => Ok(ErrorCode::ParticipantNotFound),
            2002 => Ok(ErrorCode::ParticipantNotInSession),
            2003 => Ok(ErrorCode::ParticipantLeft),
            2004 => Ok(ErrorCode::NameTaken),
            2005 => Ok(ErrorCode::InvalidName),

            3001 => Ok(ErrorCode::PermissionDenied),

            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::LineNotFound),
            4003 => Ok(ErrorCode::ItemNotFound),
            4004 => Ok(ErrorCode::ItemUnavailable),
            4005 => Ok(ErrorCode::InvalidCustomization),
            4006 => Ok(ErrorCode::QuantityOutOfRange),
            4007 => Ok(ErrorCode::NoteTooLong),
            4008 => Ok(ErrorCode::EmptyOrder),
            4009 => Ok(ErrorCode::OrderNotPending),
            4010 => Ok(ErrorCode::AlreadyTerminal),

            5001 => Ok(ErrorCode::CallNotFound),
            5002 => Ok(ErrorCode::CallAlreadyActive),
            5003 => Ok(ErrorCode::TableMismatch),
            5004 => Ok(ErrorCode::InvalidSatisfactionScore),

            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::StorageFailed),
            9003 => Ok(ErrorCode::CollaboratorUnavailable),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidTransition.code(), 10);
        assert_eq!(ErrorCode::TableOccupied.code(), 1003);
        assert_eq!(ErrorCode::NameTaken.code(), 2004);
        assert_eq!(ErrorCode::PermissionDenied.code(), 3001);
        assert_eq!(ErrorCode::EmptyOrder.code(), 4008);
        assert_eq!(ErrorCode::CallAlreadyActive.code(), 5002);
        assert_eq!(ErrorCode::CollaboratorUnavailable.code(), 9003);
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(4999), Err(InvalidErrorCode(4999)));
        assert_eq!(InvalidErrorCode(42).to_string(), "invalid error code: 42");
    }

    #[test]
    fn test_serde_as_number() {
        let json = serde_json::to_string(&ErrorCode::CallAlreadyActive).unwrap();
        assert_eq!(json, "5002");
        let code: ErrorCode = serde_json::from_str("1003").unwrap();
        assert_eq!(code, ErrorCode::TableOccupied);
        assert!(serde_json::from_str::<ErrorCode>("77").is_err());
    }

    #[test]
    fn test_every_code_round_trips_through_u16() {
        for raw in 0u16..10_000 {
            if let Ok(code) = ErrorCode::try_from(raw) {
                assert_eq!(code.code(), raw);
                assert!(!code.message().is_empty());
            }
        }
    }
}
