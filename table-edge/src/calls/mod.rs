//! Call Coordinator - 呼叫服务员
//!
//! 每张桌同一时间最多一个未结束的呼叫；第二个呼叫返回已存在的那个。
//!
//! Waiter-call state machine with at most one open call per table:
//!
//! ```text
//! pending ──► acknowledged ──► in_progress ──► resolved
//!    │             │   └───────────────────────▲
//!    └─────────────┴──► cancelled
//! ```
//!
//! Priority is derived from the call kind at creation and never changes.
//! The one-open-call check runs under the session lock; since a table has
//! at most one active session and closing it terminates every open call,
//! the session's call book is the whole truth for its table.

mod book;

pub use book::CallBook;
pub(crate) use book::cascade_on_close;

use crate::core::{SessionError, SessionPolicy, SessionResult};
use crate::storage::Record;
use crate::store::{Change, SessionAggregate, SessionHandle, SessionStore};
use shared::models::{CallKind, CallPriority, CallStatus, WaiterCall};
use shared::util::{new_id, now_millis};
use shared::{EventPayload, SessionEventType};
use std::sync::Arc;

#[derive(Debug)]
pub struct CallCoordinator {
    store: Arc<SessionStore>,
    policy: SessionPolicy,
}

impl CallCoordinator {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let policy = store.policy().clone();
        Self { store, policy }
    }

    /// Priority for a call kind
    pub fn priority_for(&self, kind: CallKind) -> CallPriority {
        match kind {
            CallKind::Complaint => CallPriority::High,
            CallKind::Assistance | CallKind::OrderReady => CallPriority::Medium,
            CallKind::Bill => self.policy.bill_call_priority,
        }
    }

    pub fn create(
        &self,
        session_id: &str,
        table_id: &str,
        participant_id: &str,
        kind: CallKind,
        message: Option<String>,
    ) -> SessionResult<WaiterCall> {
        let message = self.validate_message(message)?;
        let handle = self.store.handle(session_id)?;
        let mut agg = handle.lock();
        agg.ensure_active()?;
        if agg.session().table_id != table_id {
            return Err(SessionError::TableMismatch {
                table_id: table_id.to_string(),
                session_id: session_id.to_string(),
            });
        }
        agg.present_participant(participant_id)?;

        if let Some(active) = agg.calls().active_for_table(table_id) {
            tracing::debug!(table_id, call_id = %active.id, "Table already has an open call");
            return Err(SessionError::CallAlreadyActive {
                call: Box::new(active.clone()),
            });
        }

        let call = WaiterCall {
            id: new_id(),
            session_id: session_id.to_string(),
            table_id: table_id.to_string(),
            location_id: agg.session().location_id.clone(),
            participant_id: participant_id.to_string(),
            kind,
            priority: self.priority_for(kind),
            message,
            status: CallStatus::Pending,
            assigned_staff_id: None,
            eta_minutes: None,
            resolution_note: None,
            satisfaction_score: None,
            cancel_reason: None,
            created_at: now_millis(),
            acknowledged_at: None,
            started_at: None,
            resolved_at: None,
            cancelled_at: None,
        };
        self.commit_call(&mut agg, call.clone(), SessionEventType::WaiterCallCreated)?;
        self.store.index_entity(&call.id, session_id);

        tracing::info!(
            call_id = %call.id,
            table_id,
            kind = ?call.kind,
            priority = ?call.priority,
            "Waiter call created"
        );
        Ok(call)
    }

    /// `pending → acknowledged`
    pub fn acknowledge(
        &self,
        call_id: &str,
        staff_id: &str,
        eta_minutes: Option<u32>,
    ) -> SessionResult<WaiterCall> {
        self.transition(call_id, CallStatus::Acknowledged, |call, now| {
            call.assigned_staff_id = Some(staff_id.to_string());
            call.eta_minutes = eta_minutes;
            call.acknowledged_at = Some(now);
        })
    }

    /// `acknowledged → in_progress`
    pub fn start(&self, call_id: &str, staff_id: &str) -> SessionResult<WaiterCall> {
        self.transition(call_id, CallStatus::InProgress, |call, now| {
            call.assigned_staff_id = Some(staff_id.to_string());
            call.started_at = Some(now);
        })
    }

    /// `acknowledged | in_progress → resolved`
    pub fn resolve(
        &self,
        call_id: &str,
        staff_id: &str,
        resolution_note: Option<String>,
        satisfaction_score: Option<u8>,
    ) -> SessionResult<WaiterCall> {
        if let Some(score) = satisfaction_score
            && !(1..=5).contains(&score)
        {
            return Err(SessionError::InvalidSatisfactionScore(score));
        }
        let resolution_note = self.validate_message(resolution_note)?;
        self.transition(call_id, CallStatus::Resolved, |call, now| {
            call.assigned_staff_id = Some(staff_id.to_string());
            call.resolution_note = resolution_note;
            call.satisfaction_score = satisfaction_score;
            call.resolved_at = Some(now);
        })
    }

    /// `pending | acknowledged → cancelled`
    pub fn cancel(&self, call_id: &str, reason: Option<String>) -> SessionResult<WaiterCall> {
        let reason = self.validate_message(reason)?;
        self.transition(call_id, CallStatus::Cancelled, |call, now| {
            call.cancel_reason = reason;
            call.cancelled_at = Some(now);
        })
    }

    // ========== Queries ==========

    pub fn call(&self, call_id: &str) -> SessionResult<WaiterCall> {
        let handle = self.locate(call_id)?;
        let agg = handle.lock();
        agg.calls()
            .get(call_id)
            .cloned()
            .ok_or_else(|| SessionError::CallNotFound(call_id.to_string()))
    }

    pub fn active_call_for_table(&self, table_id: &str) -> SessionResult<Option<WaiterCall>> {
        let Some(session) = self.store.active_session_for_table(table_id)? else {
            return Ok(None);
        };
        let handle = self.store.handle(&session.id)?;
        let agg = handle.lock();
        Ok(agg.calls().active_for_table(table_id).cloned())
    }

    /// Open calls at a location, highest priority first, then oldest first
    pub fn active_calls_for_location(&self, location_id: &str) -> Vec<WaiterCall> {
        let mut calls: Vec<WaiterCall> = self
            .store
            .active_session_ids(location_id)
            .iter()
            .filter_map(|session_id| self.store.handle(session_id).ok())
            .flat_map(|handle| {
                let agg = handle.lock();
                agg.calls()
                    .iter()
                    .filter(|c| !c.status.is_terminal())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        calls.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        calls
    }

    // ========== Internals ==========

    fn validate_message(&self, message: Option<String>) -> SessionResult<Option<String>> {
        let Some(message) = message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()) else {
            return Ok(None);
        };
        let len = message.chars().count();
        if len > self.policy.max_note_chars {
            return Err(SessionError::NoteTooLong {
                len,
                max: self.policy.max_note_chars,
            });
        }
        Ok(Some(message))
    }

    fn locate(&self, call_id: &str) -> SessionResult<SessionHandle> {
        let session_id = self
            .store
            .session_for_entity(call_id)?
            .ok_or_else(|| SessionError::CallNotFound(call_id.to_string()))?;
        self.store.handle(&session_id)
    }

    fn transition(
        &self,
        call_id: &str,
        target: CallStatus,
        update: impl FnOnce(&mut WaiterCall, i64),
    ) -> SessionResult<WaiterCall> {
        let handle = self.locate(call_id)?;
        let mut agg = handle.lock();
        let mut call = agg
            .calls()
            .get(call_id)
            .ok_or_else(|| SessionError::CallNotFound(call_id.to_string()))?
            .clone();

        if !call.status.can_transition_to(target) {
            tracing::warn!(call_id, from = %call.status, to = %target, "Rejected call transition");
            return Err(SessionError::call_transition(call.status, target));
        }

        let from = call.status;
        call.status = target;
        update(&mut call, now_millis());

        let event_type = match target {
            CallStatus::Acknowledged => SessionEventType::WaiterCallAcknowledged,
            CallStatus::InProgress => SessionEventType::WaiterCallStarted,
            CallStatus::Resolved => SessionEventType::WaiterCallResolved,
            CallStatus::Cancelled => SessionEventType::WaiterCallCancelled,
            CallStatus::Pending => SessionEventType::WaiterCallCreated,
        };
        self.commit_call(&mut agg, call.clone(), event_type)?;

        tracing::info!(call_id, from = %from, to = %target, "Waiter call updated");
        Ok(call)
    }

    fn commit_call(
        &self,
        agg: &mut SessionAggregate,
        call: WaiterCall,
        event_type: SessionEventType,
    ) -> SessionResult<()> {
        let change = Change::new()
            .record(Record::WaiterCall(call.clone()))
            .event(event_type, EventPayload::WaiterCall { call: call.clone() });
        self.store
            .commit(agg, change, move |agg| agg.calls.upsert(call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanoutHub;
    use crate::storage::{RedbStorage, SessionPersistence};
    use shared::models::DiningTable;

    struct Fixture {
        store: Arc<SessionStore>,
        calls: CallCoordinator,
        session_id: String,
        ana: String,
    }

    fn fixture(policy: SessionPolicy) -> Fixture {
        let persistence: Arc<dyn SessionPersistence> =
            Arc::new(RedbStorage::open_in_memory().unwrap());
        let hub = Arc::new(FanoutHub::new(64, Arc::clone(&persistence)));
        let store = Arc::new(SessionStore::new(persistence, hub, policy));
        store
            .register_table(DiningTable::new("t5", "loc", 5, 4))
            .unwrap();
        let session = store.open_session("t5").unwrap();
        let ana = store.join(&session.id, None, Some("Ana")).unwrap();
        Fixture {
            calls: CallCoordinator::new(store.clone()),
            store,
            session_id: session.id,
            ana: ana.id,
        }
    }

    #[test]
    fn test_priority_derivation() {
        let f = fixture(SessionPolicy::default());
        assert_eq!(f.calls.priority_for(CallKind::Complaint), CallPriority::High);
        assert_eq!(f.calls.priority_for(CallKind::Assistance), CallPriority::Medium);
        assert_eq!(f.calls.priority_for(CallKind::OrderReady), CallPriority::Medium);
        assert_eq!(f.calls.priority_for(CallKind::Bill), CallPriority::Medium);

        let f = fixture(SessionPolicy {
            bill_call_priority: CallPriority::High,
            ..SessionPolicy::default()
        });
        assert_eq!(f.calls.priority_for(CallKind::Bill), CallPriority::High);
    }

    #[test]
    fn test_second_call_returns_existing() {
        let f = fixture(SessionPolicy::default());
        let first = f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Assistance, None)
            .unwrap();
        match f.calls.create(&f.session_id, "t5", &f.ana, CallKind::Bill, None) {
            Err(SessionError::CallAlreadyActive { call }) => assert_eq!(call.id, first.id),
            other => panic!("expected CallAlreadyActive, got {other:?}"),
        }

        // Once resolved a new call is allowed
        f.calls.acknowledge(&first.id, "w1", Some(2)).unwrap();
        f.calls.resolve(&first.id, "w1", None, Some(5)).unwrap();
        assert!(f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Bill, None)
            .is_ok());
    }

    #[test]
    fn test_table_mismatch() {
        let f = fixture(SessionPolicy::default());
        assert!(matches!(
            f.calls
                .create(&f.session_id, "t9", &f.ana, CallKind::Assistance, None),
            Err(SessionError::TableMismatch { .. })
        ));
    }

    #[test]
    fn test_full_lifecycle_stamps() {
        let f = fixture(SessionPolicy::default());
        let call = f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Complaint, Some("cold soup".into()))
            .unwrap();
        let acked = f.calls.acknowledge(&call.id, "w1", Some(3)).unwrap();
        assert_eq!(acked.eta_minutes, Some(3));
        assert!(acked.acknowledged_at.is_some());

        let started = f.calls.start(&call.id, "w1").unwrap();
        assert_eq!(started.status, CallStatus::InProgress);
        assert!(matches!(
            f.calls.cancel(&call.id, None),
            Err(SessionError::InvalidTransition { .. })
        ));

        let resolved = f
            .calls
            .resolve(&call.id, "w1", Some("replaced".into()), Some(4))
            .unwrap();
        assert_eq!(resolved.status, CallStatus::Resolved);
        assert_eq!(resolved.satisfaction_score, Some(4));
    }

    #[test]
    fn test_acknowledge_resolved_call() {
        let f = fixture(SessionPolicy::default());
        let call = f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Assistance, None)
            .unwrap();
        f.calls.acknowledge(&call.id, "w1", None).unwrap();
        f.calls.resolve(&call.id, "w1", None, None).unwrap();
        let err = f.calls.acknowledge(&call.id, "w2", None).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_invalid_score_rejected_before_transition() {
        let f = fixture(SessionPolicy::default());
        let call = f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Assistance, None)
            .unwrap();
        f.calls.acknowledge(&call.id, "w1", None).unwrap();
        assert!(matches!(
            f.calls.resolve(&call.id, "w1", None, Some(6)),
            Err(SessionError::InvalidSatisfactionScore(6))
        ));
        assert_eq!(f.calls.call(&call.id).unwrap().status, CallStatus::Acknowledged);
    }

    #[test]
    fn test_location_dashboard_order() {
        let f = fixture(SessionPolicy::default());
        f.store
            .register_table(DiningTable::new("t6", "loc", 6, 2))
            .unwrap();
        let other = f.store.open_session("t6").unwrap();
        let bob = f.store.join(&other.id, None, Some("Bob")).unwrap();

        let assistance = f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Assistance, None)
            .unwrap();
        let complaint = f
            .calls
            .create(&other.id, "t6", &bob.id, CallKind::Complaint, None)
            .unwrap();

        let ids: Vec<String> = f
            .calls
            .active_calls_for_location("loc")
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![complaint.id, assistance.id.clone()]);
        assert_eq!(
            f.calls.active_call_for_table("t5").unwrap().map(|c| c.id),
            Some(assistance.id)
        );
        assert!(f.calls.active_calls_for_location("elsewhere").is_empty());
    }

    #[test]
    fn test_close_terminates_open_calls() {
        let f = fixture(SessionPolicy::default());
        let call = f
            .calls
            .create(&f.session_id, "t5", &f.ana, CallKind::Bill, None)
            .unwrap();
        f.store.close_session(&f.session_id).unwrap();
        let closed = f.calls.call(&call.id).unwrap();
        assert_eq!(closed.status, CallStatus::Cancelled);
        assert_eq!(f.calls.active_call_for_table("t5").unwrap(), None);
    }
}
