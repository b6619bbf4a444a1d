//! Data models
//!
//! Shared between the coordination core and any gateway/client.
//! IDs are opaque strings (UUID v4 when generated by the core).

pub mod dining_table;
pub mod order;
pub mod session;
pub mod waiter_call;

// Re-exports
pub use dining_table::*;
pub use order::*;
pub use session::*;
pub use waiter_call::*;
