//! Waiter Call Models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason a diner asks for staff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Assistance,
    Bill,
    Complaint,
    OrderReady,
}

/// Staff-facing urgency, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPriority {
    Low,
    Medium,
    High,
}

impl CallPriority {
    /// Parse a config value (`low` / `medium` / `high`)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Waiter call status
///
/// ```text
/// pending → acknowledged → in_progress → resolved
///    └──────────┴──→ cancelled
/// ```
///
/// `acknowledged → resolved` is also allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Acknowledged,
    InProgress,
    Resolved,
    Cancelled,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Resolved | CallStatus::Cancelled)
    }

    pub fn can_transition_to(&self, target: CallStatus) -> bool {
        matches!(
            (self, target),
            (CallStatus::Pending, CallStatus::Acknowledged)
                | (CallStatus::Acknowledged, CallStatus::InProgress)
                | (CallStatus::Acknowledged, CallStatus::Resolved)
                | (CallStatus::InProgress, CallStatus::Resolved)
                | (CallStatus::Pending, CallStatus::Cancelled)
                | (CallStatus::Acknowledged, CallStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Acknowledged => "acknowledged",
            CallStatus::InProgress => "in_progress",
            CallStatus::Resolved => "resolved",
            CallStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request for staff attention tied to a session and table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterCall {
    pub id: String,
    pub session_id: String,
    pub table_id: String,
    pub location_id: String,
    pub participant_id: String,
    pub kind: CallKind,
    pub priority: CallPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_staff_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satisfaction_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
}
