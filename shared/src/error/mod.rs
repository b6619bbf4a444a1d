//! Unified error system for the table session core
//!
//! - [`ErrorCode`]: standardized numeric codes, grouped by domain range
//! - [`ErrorCategory`]: domain of an error (derived from its range)
//! - [`ErrorKind`]: how callers should react (conflict, invalid input, stale state, ...)
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Table / session errors
//! - 2xxx: Participant errors
//! - 3xxx: Permission errors
//! - 4xxx: Order errors
//! - 5xxx: Waiter call errors
//! - 9xxx: System errors

mod category;
mod codes;

pub use category::{ErrorCategory, ErrorKind};
pub use codes::{ErrorCode, InvalidErrorCode};
