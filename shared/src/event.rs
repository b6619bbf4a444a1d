//! Session events - immutable facts published after a committed change

use crate::models::{Order, OrderStatus, Participant, Session, WaiterCall};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session event
///
/// `sequence` is assigned per session at commit time and is the
/// authoritative order for subscribers; `event_id` is globally unique and
/// identifies redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: String,
    pub sequence: u64,
    pub session_id: String,
    pub table_id: String,
    pub location_id: String,
    /// Server timestamp (Unix milliseconds)
    pub timestamp: i64,
    pub event_type: SessionEventType,
    pub payload: EventPayload,
}

/// Event type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    // Lifecycle
    SessionOpened,
    SessionClosed,

    // Participants
    ParticipantJoined,
    ParticipantLeft,
    ParticipantRenamed,

    // Orders
    OrderUpdated,
    OrderConfirmed,
    OrderStatusChanged,

    // Waiter calls
    WaiterCallCreated,
    WaiterCallAcknowledged,
    WaiterCallStarted,
    WaiterCallResolved,
    WaiterCallCancelled,
}

impl SessionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEventType::SessionOpened => "session_opened",
            SessionEventType::SessionClosed => "session_closed",
            SessionEventType::ParticipantJoined => "participant_joined",
            SessionEventType::ParticipantLeft => "participant_left",
            SessionEventType::ParticipantRenamed => "participant_renamed",
            SessionEventType::OrderUpdated => "order_updated",
            SessionEventType::OrderConfirmed => "order_confirmed",
            SessionEventType::OrderStatusChanged => "order_status_changed",
            SessionEventType::WaiterCallCreated => "waiter_call_created",
            SessionEventType::WaiterCallAcknowledged => "waiter_call_acknowledged",
            SessionEventType::WaiterCallStarted => "waiter_call_started",
            SessionEventType::WaiterCallResolved => "waiter_call_resolved",
            SessionEventType::WaiterCallCancelled => "waiter_call_cancelled",
        }
    }

    pub fn is_order_event(&self) -> bool {
        matches!(
            self,
            SessionEventType::OrderUpdated
                | SessionEventType::OrderConfirmed
                | SessionEventType::OrderStatusChanged
        )
    }

    pub fn is_call_event(&self) -> bool {
        matches!(
            self,
            SessionEventType::WaiterCallCreated
                | SessionEventType::WaiterCallAcknowledged
                | SessionEventType::WaiterCallStarted
                | SessionEventType::WaiterCallResolved
                | SessionEventType::WaiterCallCancelled
        )
    }
}

impl fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload - snapshot of the entity after the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Session {
        session: Session,
    },
    Participant {
        participant: Participant,
    },
    Order {
        order: Order,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_status: Option<OrderStatus>,
    },
    WaiterCall {
        call: WaiterCall,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(SessionEventType::ParticipantJoined.to_string(), "participant_joined");
        assert_eq!(
            serde_json::to_string(&SessionEventType::WaiterCallAcknowledged).unwrap(),
            "\"waiter_call_acknowledged\""
        );
        assert!(SessionEventType::OrderConfirmed.is_order_event());
        assert!(SessionEventType::WaiterCallCancelled.is_call_event());
        assert!(!SessionEventType::ParticipantLeft.is_call_event());
    }

    #[test]
    fn test_payload_tagging() {
        let payload = EventPayload::Session {
            session: Session {
                id: "s1".to_string(),
                table_id: "t1".to_string(),
                location_id: "loc".to_string(),
                started_at: 1,
                ended_at: None,
                is_active: true,
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "session");
        assert_eq!(json["session"]["table_id"], "t1");
        assert!(json["session"].get("ended_at").is_none());
    }
}
