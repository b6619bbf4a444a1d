//! Session and Participant Models

use serde::{Deserialize, Serialize};

/// One occupancy period of a table
///
/// At most one active session exists per table. Once ended the record is
/// never modified again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub table_id: String,
    pub location_id: String,
    /// Unix millis
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub is_active: bool,
}

/// A diner attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub session_id: String,
    /// Opaque reference from the identity provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unique (case-insensitive) within the session
    pub display_name: String,
    pub joined_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<i64>,
}

impl Participant {
    /// Still seated at the table
    pub fn is_present(&self) -> bool {
        self.left_at.is_none()
    }
}
