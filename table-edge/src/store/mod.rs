//! Session Store - 会话存储
//!
//! Single writer for tables, sessions and participants, and the owner of
//! every session's mutation boundary.
//!
//! 桌台、会话、参与者的唯一写入方；每个会话一把锁，所有修改都经过
//! [`SessionStore::commit`]：先持久化，再应用，最后广播。
//!
//! # Mutation flow
//!
//! ```text
//! operation(...)
//!     ├─ 1. Resolve the session (entity index)
//!     ├─ 2. Lock the session aggregate
//!     ├─ 3. Validate against current state
//!     ├─ 4. Build new record versions + event drafts (nothing applied yet)
//!     ├─ 5. commit(): persist records and sequenced events in one batch
//!     ├─ 6. Apply the new versions to the aggregate
//!     ├─ 7. Publish events through the fanout hub
//!     └─ 8. Unlock
//! ```
//!
//! A failed persist leaves the aggregate untouched and publishes nothing.
//!
//! # Residency
//!
//! Only live sessions stay in memory. Once a commit leaves a session
//! settled (closed, every order terminal) it is evicted together with its
//! entity index entries. Later lookups read it back from storage as a
//! detached aggregate; a settled session rejects every mutation, so the
//! detached copy is only ever read.
//!
//! # Locking
//!
//! - One `parking_lot::Mutex` per session and one per table slot; never
//!   held across an `.await`.
//! - Order: session lock, then table slot lock. `open_session` only takes
//!   the slot lock and a brand-new session, so it never waits on an
//!   existing session.

mod aggregate;
pub mod names;

pub use aggregate::SessionAggregate;
pub use names::NameGenerator;

use crate::calls;
use crate::core::{SessionError, SessionPolicy, SessionResult};
use crate::fanout::FanoutHub;
use crate::orders;
use crate::storage::{CommitBatch, PersistedState, Record, SessionPersistence};
use dashmap::DashMap;
use parking_lot::Mutex;
use shared::models::{DiningTable, DiningTableUpdate, Participant, Session};
use shared::util::{new_id, now_millis};
use shared::{EventPayload, SessionEvent, SessionEventType};
use std::sync::Arc;

pub(crate) type SessionHandle = Arc<Mutex<SessionAggregate>>;

#[derive(Debug)]
struct TableSlot {
    table: DiningTable,
    active_session: Option<Session>,
}

/// Event before it is given an id and a sequence
#[derive(Debug, Clone)]
pub(crate) struct EventDraft {
    pub event_type: SessionEventType,
    pub payload: EventPayload,
}

/// Records and events produced by one operation
#[derive(Debug, Default)]
pub(crate) struct Change {
    records: Vec<Record>,
    events: Vec<EventDraft>,
}

impl Change {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub(crate) fn event(mut self, event_type: SessionEventType, payload: EventPayload) -> Self {
        self.events.push(EventDraft {
            event_type,
            payload,
        });
        self
    }

    pub(crate) fn extend(mut self, other: Change) -> Self {
        self.records.extend(other.records);
        self.events.extend(other.events);
        self
    }
}

/// Table, session and participant state plus the per-session boundaries
pub struct SessionStore {
    tables: DashMap<String, Arc<Mutex<TableSlot>>>,
    sessions: DashMap<String, SessionHandle>,
    /// participant / order / line / call id -> session id
    entity_index: DashMap<String, String>,
    persistence: Arc<dyn SessionPersistence>,
    hub: Arc<FanoutHub>,
    policy: SessionPolicy,
    names: Mutex<NameGenerator>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("tables", &self.tables.len())
            .field("sessions", &self.sessions.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SessionStore {
    pub fn new(
        persistence: Arc<dyn SessionPersistence>,
        hub: Arc<FanoutHub>,
        policy: SessionPolicy,
    ) -> Self {
        Self::with_name_generator(persistence, hub, policy, NameGenerator::new())
    }

    pub fn with_name_generator(
        persistence: Arc<dyn SessionPersistence>,
        hub: Arc<FanoutHub>,
        policy: SessionPolicy,
        names: NameGenerator,
    ) -> Self {
        Self {
            tables: DashMap::new(),
            sessions: DashMap::new(),
            entity_index: DashMap::new(),
            persistence,
            hub,
            policy,
            names: Mutex::new(names),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    // ========== Tables ==========

    /// Register a table, or replace its definition if already known
    pub fn register_table(&self, table: DiningTable) -> SessionResult<DiningTable> {
        self.persistence.commit(&CommitBatch {
            records: vec![Record::Table(table.clone())],
            events: vec![],
        })?;

        match self.tables.get(&table.id).map(|slot| Arc::clone(slot.value())) {
            Some(slot) => slot.lock().table = table.clone(),
            None => {
                self.tables.insert(
                    table.id.clone(),
                    Arc::new(Mutex::new(TableSlot {
                        table: table.clone(),
                        active_session: None,
                    })),
                );
            }
        }
        tracing::info!(table_id = %table.id, number = table.number, "Table registered");
        Ok(table)
    }

    /// Toggle capacity / active flag; an active session is not affected
    pub fn update_table(
        &self,
        table_id: &str,
        update: DiningTableUpdate,
    ) -> SessionResult<DiningTable> {
        let slot = self.slot(table_id)?;
        let mut slot = slot.lock();

        let mut table = slot.table.clone();
        if let Some(capacity) = update.capacity {
            table.capacity = capacity;
        }
        if let Some(is_active) = update.is_active {
            table.is_active = is_active;
        }

        self.persistence.commit(&CommitBatch {
            records: vec![Record::Table(table.clone())],
            events: vec![],
        })?;
        slot.table = table.clone();
        tracing::info!(
            table_id = %table.id,
            capacity = table.capacity,
            is_active = table.is_active,
            "Table updated"
        );
        Ok(table)
    }

    pub fn table(&self, table_id: &str) -> SessionResult<DiningTable> {
        Ok(self.slot(table_id)?.lock().table.clone())
    }

    fn slot(&self, table_id: &str) -> SessionResult<Arc<Mutex<TableSlot>>> {
        self.tables
            .get(table_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| SessionError::TableNotFound(table_id.to_string()))
    }

    // ========== Session lifecycle ==========

    /// Start a session on a free table
    pub fn open_session(&self, table_id: &str) -> SessionResult<Session> {
        let slot = self.slot(table_id)?;
        let mut slot = slot.lock();

        if !slot.table.is_active {
            return Err(SessionError::TableInactive(table_id.to_string()));
        }
        if let Some(active) = &slot.active_session {
            tracing::debug!(table_id, session_id = %active.id, "Table occupied");
            return Err(SessionError::TableOccupied {
                session: Box::new(active.clone()),
            });
        }

        let session = Session {
            id: new_id(),
            table_id: slot.table.id.clone(),
            location_id: slot.table.location_id.clone(),
            started_at: now_millis(),
            ended_at: None,
            is_active: true,
        };
        let mut agg = SessionAggregate::new(session.clone());
        let change = Change::new()
            .record(Record::Session(session.clone()))
            .event(
                SessionEventType::SessionOpened,
                EventPayload::Session {
                    session: session.clone(),
                },
            );
        self.commit(&mut agg, change, |_| {})?;

        self.sessions
            .insert(session.id.clone(), Arc::new(Mutex::new(agg)));
        slot.active_session = Some(session.clone());

        tracing::info!(table_id, session_id = %session.id, "Session opened");
        Ok(session)
    }

    /// Add a participant; a missing or blank name is generated
    pub fn join(
        &self,
        session_id: &str,
        user_id: Option<String>,
        display_name: Option<&str>,
    ) -> SessionResult<Participant> {
        let requested = names::normalize(display_name)?;
        let handle = self.handle(session_id)?;
        let mut agg = handle.lock();
        agg.ensure_active()?;

        let display_name = match requested {
            Some(name) => names::with_suffix(&name, |n| agg.name_taken(n, None)),
            None => self
                .names
                .lock()
                .generate(self.policy.name_generation_attempts, |n| {
                    agg.name_taken(n, None)
                }),
        };

        let participant = Participant {
            id: new_id(),
            session_id: session_id.to_string(),
            user_id,
            display_name,
            joined_at: now_millis(),
            left_at: None,
        };
        let change = Change::new()
            .record(Record::Participant(participant.clone()))
            .event(
                SessionEventType::ParticipantJoined,
                EventPayload::Participant {
                    participant: participant.clone(),
                },
            );
        let joined = participant.clone();
        self.commit(&mut agg, change, move |agg| agg.participants.push(joined))?;
        self.index_entity(&participant.id, session_id);

        tracing::info!(
            session_id,
            participant_id = %participant.id,
            display_name = %participant.display_name,
            "Participant joined"
        );
        Ok(participant)
    }

    pub fn rename(&self, participant_id: &str, new_name: &str) -> SessionResult<Participant> {
        let name = names::normalize(Some(new_name))?
            .ok_or_else(|| SessionError::InvalidName("name is blank".to_string()))?;
        let handle = self.handle_for_participant(participant_id)?;
        let mut agg = handle.lock();
        agg.ensure_active()?;
        let current = agg.present_participant(participant_id)?.clone();

        if agg.name_taken(&name, Some(participant_id)) {
            let suggestion = names::with_suffix(&name, |n| agg.name_taken(n, Some(participant_id)));
            tracing::debug!(participant_id, requested = %name, "Display name taken");
            return Err(SessionError::NameTaken {
                requested: name,
                suggestion,
            });
        }

        let renamed = Participant {
            display_name: name,
            ..current
        };
        let change = Change::new()
            .record(Record::Participant(renamed.clone()))
            .event(
                SessionEventType::ParticipantRenamed,
                EventPayload::Participant {
                    participant: renamed.clone(),
                },
            );
        let applied = renamed.clone();
        self.commit(&mut agg, change, move |agg| replace_participant(agg, applied))?;

        tracing::info!(participant_id, display_name = %renamed.display_name, "Participant renamed");
        Ok(renamed)
    }

    /// Mark a participant as gone; may close the session when it empties
    pub fn leave(&self, participant_id: &str) -> SessionResult<Participant> {
        let handle = self.handle_for_participant(participant_id)?;
        let mut agg = handle.lock();
        agg.ensure_active()?;
        let current = agg.present_participant(participant_id)?.clone();

        let left = Participant {
            left_at: Some(now_millis()),
            ..current
        };
        let change = Change::new()
            .record(Record::Participant(left.clone()))
            .event(
                SessionEventType::ParticipantLeft,
                EventPayload::Participant {
                    participant: left.clone(),
                },
            );
        let applied = left.clone();
        let apply = move |agg: &mut SessionAggregate| replace_participant(agg, applied);

        // The leaver is the last one present: leave and close commit together
        if self.policy.auto_close_on_empty && agg.present_count() == 1 {
            tracing::info!(session_id = %left.session_id, "Last participant leaving, auto-closing");
            self.close_with(&mut agg, change, apply)?;
        } else {
            self.commit(&mut agg, change, apply)?;
        }
        tracing::info!(participant_id, session_id = %left.session_id, "Participant left");
        Ok(left)
    }

    /// End a session, cascading to its calls and (per policy) pending orders
    pub fn close_session(&self, session_id: &str) -> SessionResult<Session> {
        let handle = self.handle(session_id)?;
        let mut agg = handle.lock();
        self.close_locked(&mut agg)
    }

    fn close_locked(&self, agg: &mut SessionAggregate) -> SessionResult<Session> {
        self.close_with(agg, Change::new(), |_| {})
    }

    /// Close with `prefix` committed in the same batch, ahead of the cascade
    fn close_with<F>(
        &self,
        agg: &mut SessionAggregate,
        prefix: Change,
        prefix_apply: F,
    ) -> SessionResult<Session>
    where
        F: FnOnce(&mut SessionAggregate),
    {
        if !agg.session.is_active {
            return Err(SessionError::SessionAlreadyClosed(agg.session.id.clone()));
        }
        let now = now_millis();
        let closed = Session {
            ended_at: Some(now),
            is_active: false,
            ..agg.session.clone()
        };

        let order_cascade = orders::cascade_on_close(&agg.orders, self.policy.close_policy, now);
        let call_cascade = calls::cascade_on_close(&agg.calls, now);
        let change = prefix
            .extend(order_cascade.change())
            .extend(call_cascade.change())
            .record(Record::Session(closed.clone()))
            .event(
                SessionEventType::SessionClosed,
                EventPayload::Session {
                    session: closed.clone(),
                },
            );

        let applied = closed.clone();
        self.commit(agg, change, move |agg| {
            prefix_apply(agg);
            agg.session = applied;
            order_cascade.apply(&mut agg.orders);
            call_cascade.apply(&mut agg.calls);
        })?;

        if let Ok(slot) = self.slot(&closed.table_id) {
            let mut slot = slot.lock();
            if slot.active_session.as_ref().map(|s| s.id.as_str()) == Some(closed.id.as_str()) {
                slot.active_session = None;
            }
        }

        tracing::info!(
            session_id = %closed.id,
            table_id = %closed.table_id,
            policy = ?self.policy.close_policy,
            "Session closed"
        );
        Ok(closed)
    }

    // ========== Queries ==========

    pub fn session(&self, session_id: &str) -> SessionResult<Session> {
        Ok(self.handle(session_id)?.lock().session.clone())
    }

    pub fn participants(&self, session_id: &str) -> SessionResult<Vec<Participant>> {
        Ok(self.handle(session_id)?.lock().participants.clone())
    }

    pub fn participant(&self, participant_id: &str) -> SessionResult<Participant> {
        let handle = self.handle_for_participant(participant_id)?;
        let agg = handle.lock();
        agg.participant(participant_id)
            .cloned()
            .ok_or_else(|| SessionError::ParticipantNotFound(participant_id.to_string()))
    }

    pub fn active_session_for_table(&self, table_id: &str) -> SessionResult<Option<Session>> {
        Ok(self.slot(table_id)?.lock().active_session.clone())
    }

    /// Ids of every active session at a location
    pub fn active_session_ids(&self, location_id: &str) -> Vec<String> {
        self.tables
            .iter()
            .filter_map(|slot| {
                let slot = slot.lock();
                slot.active_session
                    .as_ref()
                    .filter(|s| s.location_id == location_id)
                    .map(|s| s.id.clone())
            })
            .collect()
    }

    // ========== Boundary plumbing ==========

    /// Number of sessions held in memory
    pub fn resident_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Mutation boundary of a session
    ///
    /// A settled session is not resident; it comes back from storage as a
    /// detached aggregate.
    pub(crate) fn handle(&self, session_id: &str) -> SessionResult<SessionHandle> {
        if let Some(handle) = self.sessions.get(session_id) {
            return Ok(Arc::clone(handle.value()));
        }
        match self.persistence.load_session(session_id)? {
            Some(persisted) => {
                tracing::debug!(session_id, "Session read back from storage");
                Ok(Arc::new(Mutex::new(SessionAggregate::restore(persisted))))
            }
            None => Err(SessionError::SessionNotFound(session_id.to_string())),
        }
    }

    fn handle_for_participant(&self, participant_id: &str) -> SessionResult<SessionHandle> {
        let session_id = self
            .session_for_entity(participant_id)?
            .ok_or_else(|| SessionError::ParticipantNotFound(participant_id.to_string()))?;
        self.handle(&session_id)
    }

    /// Session owning a participant, order, line or call
    pub(crate) fn session_for_entity(&self, entity_id: &str) -> SessionResult<Option<String>> {
        if let Some(session_id) = self.entity_index.get(entity_id) {
            return Ok(Some(session_id.value().clone()));
        }
        Ok(self.persistence.owner_session(entity_id)?)
    }

    pub(crate) fn index_entity(&self, entity_id: &str, session_id: &str) {
        self.entity_index
            .insert(entity_id.to_string(), session_id.to_string());
    }

    /// Persist a change, then apply it and publish its events
    ///
    /// Must be called with the session's lock held. On error nothing is
    /// applied and the sequence counter does not move.
    pub(crate) fn commit<F>(
        &self,
        agg: &mut SessionAggregate,
        change: Change,
        apply: F,
    ) -> SessionResult<()>
    where
        F: FnOnce(&mut SessionAggregate),
    {
        let timestamp = now_millis();
        let events: Vec<SessionEvent> = change
            .events
            .into_iter()
            .zip(agg.last_sequence + 1..)
            .map(|(draft, sequence)| SessionEvent {
                event_id: new_id(),
                sequence,
                session_id: agg.session.id.clone(),
                table_id: agg.session.table_id.clone(),
                location_id: agg.session.location_id.clone(),
                timestamp,
                event_type: draft.event_type,
                payload: draft.payload,
            })
            .collect();

        let batch = CommitBatch {
            records: change.records,
            events,
        };
        if let Err(e) = self.persistence.commit(&batch) {
            tracing::error!(session_id = %agg.session.id, error = %e, "Commit failed, change discarded");
            return Err(e.into());
        }

        apply(agg);
        if let Some(last) = batch.events.last() {
            agg.last_sequence = last.sequence;
        }
        for event in batch.events {
            self.hub.publish(event);
        }
        if agg.is_settled() {
            self.evict(agg);
        }
        Ok(())
    }

    fn evict(&self, agg: &SessionAggregate) {
        if self.sessions.remove(&agg.session.id).is_none() {
            return;
        }
        for entity_id in agg.entity_ids() {
            self.entity_index.remove(entity_id);
        }
        tracing::debug!(session_id = %agg.session.id, "Session settled, evicted from memory");
    }

    // ========== Recovery ==========

    /// Rebuild in-memory state from storage after a restart
    pub fn recover(&self, state: &PersistedState) {
        for table in &state.tables {
            self.tables.insert(
                table.id.clone(),
                Arc::new(Mutex::new(TableSlot {
                    table: table.clone(),
                    active_session: None,
                })),
            );
        }

        for persisted in &state.sessions {
            let agg = SessionAggregate::restore(persisted.clone());
            let session_id = agg.session.id.clone();
            for entity_id in agg.entity_ids() {
                self.index_entity(entity_id, &session_id);
            }

            if agg.session.is_active {
                match self.tables.get(&agg.session.table_id) {
                    Some(slot) => slot.lock().active_session = Some(agg.session.clone()),
                    None => tracing::warn!(
                        session_id = %session_id,
                        table_id = %agg.session.table_id,
                        "Active session references an unknown table"
                    ),
                }
            }
            self.sessions.insert(session_id, Arc::new(Mutex::new(agg)));
        }

        tracing::info!(
            tables = self.tables.len(),
            sessions = self.sessions.len(),
            "Session store recovered"
        );
    }
}

fn replace_participant(agg: &mut SessionAggregate, participant: Participant) {
    if let Some(slot) = agg.participants.iter_mut().find(|p| p.id == participant.id) {
        *slot = participant;
    }
}
