use crate::storage::Record;
use crate::store::Change;
use shared::models::{CallStatus, WaiterCall};
use shared::{EventPayload, SessionEventType};

/// A session's waiter calls, oldest first
#[derive(Debug, Clone, Default)]
pub struct CallBook {
    calls: Vec<WaiterCall>,
}

impl CallBook {
    pub(crate) fn from_calls(mut calls: Vec<WaiterCall>) -> Self {
        calls.sort_by_key(|c| c.created_at);
        Self { calls }
    }

    pub fn get(&self, call_id: &str) -> Option<&WaiterCall> {
        self.calls.iter().find(|c| c.id == call_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaiterCall> {
        self.calls.iter()
    }

    /// The non-terminal call for a table, if any
    pub fn active_for_table(&self, table_id: &str) -> Option<&WaiterCall> {
        self.calls
            .iter()
            .find(|c| c.table_id == table_id && !c.status.is_terminal())
    }

    pub(in crate::calls) fn upsert(&mut self, call: WaiterCall) {
        match self.calls.iter_mut().find(|c| c.id == call.id) {
            Some(slot) => *slot = call,
            None => self.calls.push(call),
        }
    }
}

/// Terminal transitions forced by closing a session
#[derive(Debug, Default)]
pub(crate) struct CallCascade {
    closed: Vec<WaiterCall>,
}

impl CallCascade {
    pub(crate) fn change(&self) -> Change {
        self.closed.iter().fold(Change::new(), |change, call| {
            let event_type = match call.status {
                CallStatus::Resolved => SessionEventType::WaiterCallResolved,
                _ => SessionEventType::WaiterCallCancelled,
            };
            change
                .record(Record::WaiterCall(call.clone()))
                .event(event_type, EventPayload::WaiterCall { call: call.clone() })
        })
    }

    pub(crate) fn apply(self, book: &mut CallBook) {
        for call in self.closed {
            book.upsert(call);
        }
    }
}

/// Close every open call: cancel what hasn't started, resolve what has
pub(crate) fn cascade_on_close(book: &CallBook, now: i64) -> CallCascade {
    let closed = book
        .iter()
        .filter(|c| !c.status.is_terminal())
        .map(|c| {
            let mut call = c.clone();
            if call.status.can_transition_to(CallStatus::Cancelled) {
                call.status = CallStatus::Cancelled;
                call.cancel_reason = Some("session closed".to_string());
                call.cancelled_at = Some(now);
            } else {
                call.status = CallStatus::Resolved;
                call.resolution_note = Some("session closed".to_string());
                call.resolved_at = Some(now);
            }
            call
        })
        .collect();
    CallCascade { closed }
}
