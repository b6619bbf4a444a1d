//! redb-based storage for the session core - 会话 redb 存储
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `dining_tables` | `table_id` | `DiningTable` | Table registry |
//! | `sessions` | `session_id` | `Session` | Session history |
//! | `participants` | `participant_id` | `Participant` | Diners |
//! | `orders` | `order_id` | `Order` | Orders with their lines |
//! | `waiter_calls` | `call_id` | `WaiterCall` | Calls |
//! | `events` | `(session_id, sequence)` | `SessionEvent` | Per-session event log |
//! | `location_events` | `(location_id, timestamp, event_id)` | `SessionEvent` | Location replay |
//! | `session_members` | `(session_id, entity_id)` | kind | Entities of a session |
//! | `entity_owners` | `entity_id` | `session_id` | Participant / order / line / call lookup |
//! | `live_sessions` | `session_id` | `()` | Sessions restored on startup |
//!
//! Values are JSON. A [`CommitBatch`] is written in a single write
//! transaction, so records, events and indexes land together or not at all.
//!
//! A session is live while it is active or while any of its orders is not
//! terminal. Liveness is recomputed inside the commit for every session a
//! batch touches.

use super::{
    CommitBatch, PersistedSession, PersistedState, Record, SessionPersistence, StorageResult,
};
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use shared::models::{Order, Participant, Session, WaiterCall};
use shared::SessionEvent;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

const DINING_TABLES: TableDefinition<&str, &[u8]> = TableDefinition::new("dining_tables");
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const PARTICIPANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("participants");
const ORDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const WAITER_CALLS: TableDefinition<&str, &[u8]> = TableDefinition::new("waiter_calls");
const EVENTS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("events");
const LOCATION_EVENTS: TableDefinition<(&str, i64, &str), &[u8]> =
    TableDefinition::new("location_events");
const SESSION_MEMBERS: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("session_members");
const ENTITY_OWNERS: TableDefinition<&str, &str> = TableDefinition::new("entity_owners");
const LIVE_SESSIONS: TableDefinition<&str, ()> = TableDefinition::new("live_sessions");

/// `session_members` kinds
const PARTICIPANT_MEMBER: &str = "participant";
const ORDER_MEMBER: &str = "order";
const CALL_MEMBER: &str = "call";

/// Session storage backed by redb
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}

impl RedbStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits are durable once `commit()` returns, which is what lets
    /// the core publish events right after a successful commit.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DINING_TABLES)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(PARTICIPANTS)?;
            let _ = write_txn.open_table(ORDERS)?;
            let _ = write_txn.open_table(WAITER_CALLS)?;
            let _ = write_txn.open_table(EVENTS)?;
            let _ = write_txn.open_table(LOCATION_EVENTS)?;
            let _ = write_txn.open_table(SESSION_MEMBERS)?;
            let _ = write_txn.open_table(ENTITY_OWNERS)?;
            let _ = write_txn.open_table(LIVE_SESSIONS)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn read_all<T: DeserializeOwned>(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> StorageResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(definition)?;
        let mut values = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            values.push(serde_json::from_slice(value.value())?);
        }
        Ok(values)
    }

    fn read_value<T: DeserializeOwned>(
        txn: &ReadTransaction,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let table = txn.open_table(definition)?;
        match table.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn read_session(
        txn: &ReadTransaction,
        session_id: &str,
    ) -> StorageResult<Option<PersistedSession>> {
        let Some(session) = Self::read_value::<Session>(txn, SESSIONS, session_id)? else {
            return Ok(None);
        };

        let mut participants: Vec<Participant> = Vec::new();
        let mut orders: Vec<Order> = Vec::new();
        let mut calls: Vec<WaiterCall> = Vec::new();
        let members = txn.open_table(SESSION_MEMBERS)?;
        for entry in members.range((session_id, "")..)? {
            let (key, kind) = entry?;
            let (owner, entity_id) = key.value();
            if owner != session_id {
                break;
            }
            match kind.value() {
                PARTICIPANT_MEMBER => participants.extend(Self::read_value::<Participant>(
                    txn,
                    PARTICIPANTS,
                    entity_id,
                )?),
                ORDER_MEMBER => {
                    orders.extend(Self::read_value::<Order>(txn, ORDERS, entity_id)?)
                }
                CALL_MEMBER => {
                    calls.extend(Self::read_value::<WaiterCall>(txn, WAITER_CALLS, entity_id)?)
                }
                other => tracing::warn!(session_id, kind = other, "Unknown session member kind"),
            }
        }
        participants.sort_by_key(|p| p.joined_at);
        orders.sort_by_key(|o| o.created_at);
        calls.sort_by_key(|c| c.created_at);

        let events = txn.open_table(EVENTS)?;
        let last_sequence = match events
            .range((session_id, 0)..=(session_id, u64::MAX))?
            .next_back()
        {
            Some(entry) => entry?.0.value().1,
            None => 0,
        };

        Ok(Some(PersistedSession {
            session,
            participants,
            orders,
            calls,
            last_sequence,
        }))
    }
}

impl SessionPersistence for RedbStorage {
    fn commit(&self, batch: &CommitBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        {
            let mut tables = txn.open_table(DINING_TABLES)?;
            let mut sessions = txn.open_table(SESSIONS)?;
            let mut participants = txn.open_table(PARTICIPANTS)?;
            let mut orders = txn.open_table(ORDERS)?;
            let mut calls = txn.open_table(WAITER_CALLS)?;
            let mut events = txn.open_table(EVENTS)?;
            let mut location_events = txn.open_table(LOCATION_EVENTS)?;
            let mut members = txn.open_table(SESSION_MEMBERS)?;
            let mut owners = txn.open_table(ENTITY_OWNERS)?;
            let mut live = txn.open_table(LIVE_SESSIONS)?;

            // Sessions whose liveness may have changed
            let mut touched: BTreeSet<&str> = BTreeSet::new();

            for record in &batch.records {
                match record {
                    Record::Table(t) => {
                        let value = serde_json::to_vec(t)?;
                        tables.insert(t.id.as_str(), value.as_slice())?;
                    }
                    Record::Session(s) => {
                        let value = serde_json::to_vec(s)?;
                        sessions.insert(s.id.as_str(), value.as_slice())?;
                        touched.insert(s.id.as_str());
                    }
                    Record::Participant(p) => {
                        let value = serde_json::to_vec(p)?;
                        participants.insert(p.id.as_str(), value.as_slice())?;
                        members.insert((p.session_id.as_str(), p.id.as_str()), PARTICIPANT_MEMBER)?;
                        owners.insert(p.id.as_str(), p.session_id.as_str())?;
                    }
                    Record::Order(o) => {
                        let value = serde_json::to_vec(o)?;
                        orders.insert(o.id.as_str(), value.as_slice())?;
                        members.insert((o.session_id.as_str(), o.id.as_str()), ORDER_MEMBER)?;
                        owners.insert(o.id.as_str(), o.session_id.as_str())?;
                        for line in &o.lines {
                            owners.insert(line.id.as_str(), o.session_id.as_str())?;
                        }
                        touched.insert(o.session_id.as_str());
                    }
                    Record::WaiterCall(c) => {
                        let value = serde_json::to_vec(c)?;
                        calls.insert(c.id.as_str(), value.as_slice())?;
                        members.insert((c.session_id.as_str(), c.id.as_str()), CALL_MEMBER)?;
                        owners.insert(c.id.as_str(), c.session_id.as_str())?;
                    }
                }
            }

            for event in &batch.events {
                let value = serde_json::to_vec(event)?;
                events.insert((event.session_id.as_str(), event.sequence), value.as_slice())?;
                location_events.insert(
                    (
                        event.location_id.as_str(),
                        event.timestamp,
                        event.event_id.as_str(),
                    ),
                    value.as_slice(),
                )?;
            }

            for session_id in touched {
                let session: Session = match sessions.get(session_id)? {
                    Some(value) => serde_json::from_slice(value.value())?,
                    None => continue,
                };

                let mut open_orders = false;
                if !session.is_active {
                    for entry in members.range((session_id, "")..)? {
                        let (key, kind) = entry?;
                        let (owner, entity_id) = key.value();
                        if owner != session_id {
                            break;
                        }
                        if kind.value() != ORDER_MEMBER {
                            continue;
                        }
                        if let Some(value) = orders.get(entity_id)? {
                            let order: Order = serde_json::from_slice(value.value())?;
                            if !order.status.is_terminal() {
                                open_orders = true;
                                break;
                            }
                        }
                    }
                }

                if session.is_active || open_orders {
                    live.insert(session_id, ())?;
                } else {
                    live.remove(session_id)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn events_since(
        &self,
        session_id: &str,
        after_sequence: u64,
    ) -> StorageResult<Vec<SessionEvent>> {
        let Some(start) = after_sequence.checked_add(1) else {
            return Ok(vec![]);
        };
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS)?;

        let mut events = Vec::new();
        for result in table.range((session_id, start)..=(session_id, u64::MAX))? {
            let (_key, value) = result?;
            let event: SessionEvent = serde_json::from_slice(value.value())?;
            events.push(event);
        }
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    fn location_events_since(
        &self,
        location_id: &str,
        since_timestamp: i64,
    ) -> StorageResult<Vec<SessionEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOCATION_EVENTS)?;

        let mut events: Vec<SessionEvent> = Vec::new();
        for result in table.range((location_id, since_timestamp, "")..)? {
            let (key, value) = result?;
            if key.value().0 != location_id {
                break;
            }
            events.push(serde_json::from_slice(value.value())?);
        }
        // Same-millisecond events of one session come back in sequence order
        events.sort_by(|a, b| {
            (a.timestamp, &a.session_id, a.sequence).cmp(&(b.timestamp, &b.session_id, b.sequence))
        });
        Ok(events)
    }

    fn load_session(&self, session_id: &str) -> StorageResult<Option<PersistedSession>> {
        let read_txn = self.db.begin_read()?;
        Self::read_session(&read_txn, session_id)
    }

    fn owner_session(&self, entity_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITY_OWNERS)?;
        Ok(table.get(entity_id)?.map(|owner| owner.value().to_string()))
    }

    fn load(&self) -> StorageResult<PersistedState> {
        let tables = self.read_all(DINING_TABLES)?;

        let read_txn = self.db.begin_read()?;
        let live = read_txn.open_table(LIVE_SESSIONS)?;
        let mut live_ids = Vec::new();
        for result in live.iter()? {
            let (key, _) = result?;
            live_ids.push(key.value().to_string());
        }

        let mut sessions = Vec::with_capacity(live_ids.len());
        for session_id in &live_ids {
            match Self::read_session(&read_txn, session_id)? {
                Some(session) => sessions.push(session),
                None => tracing::warn!(session_id = %session_id, "Live session has no record"),
            }
        }

        tracing::debug!(
            tables = tables.len(),
            sessions = sessions.len(),
            "Loaded persisted session state"
        );
        Ok(PersistedState { tables, sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::{DiningTable, OrderLine, OrderStatus, Session};
    use shared::{EventPayload, SessionEventType};

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            table_id: "t1".to_string(),
            location_id: "loc".to_string(),
            started_at: 1,
            ended_at: None,
            is_active: true,
        }
    }

    fn event(session_id: &str, sequence: u64) -> SessionEvent {
        SessionEvent {
            event_id: shared::util::new_id(),
            sequence,
            session_id: session_id.to_string(),
            table_id: "t1".to_string(),
            location_id: "loc".to_string(),
            timestamp: sequence as i64,
            event_type: SessionEventType::SessionOpened,
            payload: EventPayload::Session {
                session: session(session_id),
            },
        }
    }

    fn closed(id: &str) -> Session {
        let mut session = session(id);
        session.is_active = false;
        session.ended_at = Some(10);
        session
    }

    fn order(id: &str, session_id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
            session_id: session_id.to_string(),
            participant_id: "p1".to_string(),
            status,
            note: None,
            lines: vec![OrderLine {
                id: format!("{id}-line"),
                order_id: id.to_string(),
                item_id: "burger".to_string(),
                name: "Burger".to_string(),
                quantity: 1,
                unit_price: Decimal::new(1000, 2),
                customizations: vec![],
                line_total: Decimal::new(1000, 2),
                note: None,
            }],
            subtotal: Decimal::new(1000, 2),
            tax: Decimal::ZERO,
            total: Decimal::new(1000, 2),
            cancel_reason: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_commit_and_load() {
        let storage = RedbStorage::open_in_memory().unwrap();
        let batch = CommitBatch {
            records: vec![
                Record::Table(DiningTable::new("t1", "loc", 5, 4)),
                Record::Session(session("s1")),
            ],
            events: vec![event("s1", 1), event("s1", 2)],
        };
        storage.commit(&batch).unwrap();

        let state = storage.load().unwrap();
        assert_eq!(state.tables.len(), 1);
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].session, session("s1"));
        assert_eq!(state.sessions[0].last_sequence, 2);
    }

    #[test]
    fn test_events_since_is_scoped_and_ordered() {
        let storage = RedbStorage::open_in_memory().unwrap();
        storage
            .commit(&CommitBatch {
                records: vec![],
                events: vec![event("s1", 3), event("s2", 1), event("s1", 1), event("s1", 2)],
            })
            .unwrap();

        let events = storage.events_since("s1", 1).unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
        assert!(events.iter().all(|e| e.session_id == "s1"));
        assert!(storage.events_since("s1", u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_later_version_overwrites() {
        let storage = RedbStorage::open_in_memory().unwrap();
        storage
            .commit(&CommitBatch {
                records: vec![Record::Session(session("s1"))],
                events: vec![],
            })
            .unwrap();
        storage
            .commit(&CommitBatch {
                records: vec![Record::Session(closed("s1"))],
                events: vec![],
            })
            .unwrap();

        let reloaded = storage.load_session("s1").unwrap().unwrap();
        assert_eq!(reloaded.session, closed("s1"));
    }

    #[test]
    fn test_settled_sessions_are_not_loaded() {
        let storage = RedbStorage::open_in_memory().unwrap();
        storage
            .commit(&CommitBatch {
                records: vec![
                    Record::Session(session("s1")),
                    Record::Order(order("o1", "s1", OrderStatus::Preparing)),
                    Record::Session(session("s2")),
                    Record::Order(order("o2", "s2", OrderStatus::Delivered)),
                ],
                events: vec![],
            })
            .unwrap();
        storage
            .commit(&CommitBatch {
                records: vec![Record::Session(closed("s1")), Record::Session(closed("s2"))],
                events: vec![],
            })
            .unwrap();

        // s1 still has an order in the kitchen
        let state = storage.load().unwrap();
        let ids: Vec<&str> = state.sessions.iter().map(|s| s.session.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);
        assert_eq!(state.sessions[0].orders.len(), 1);

        storage
            .commit(&CommitBatch {
                records: vec![Record::Order(order("o1", "s1", OrderStatus::Delivered))],
                events: vec![],
            })
            .unwrap();
        assert!(storage.load().unwrap().sessions.is_empty());
        assert!(storage.load_session("s1").unwrap().is_some());
    }

    #[test]
    fn test_owner_session_covers_lines() {
        let storage = RedbStorage::open_in_memory().unwrap();
        storage
            .commit(&CommitBatch {
                records: vec![
                    Record::Session(session("s1")),
                    Record::Order(order("o1", "s1", OrderStatus::Pending)),
                ],
                events: vec![],
            })
            .unwrap();

        assert_eq!(storage.owner_session("o1").unwrap().as_deref(), Some("s1"));
        assert_eq!(storage.owner_session("o1-line").unwrap().as_deref(), Some("s1"));
        assert_eq!(storage.owner_session("missing").unwrap(), None);
    }

    #[test]
    fn test_location_events_since() {
        let storage = RedbStorage::open_in_memory().unwrap();
        let mut elsewhere = event("s3", 5);
        elsewhere.location_id = "loc-2".to_string();
        storage
            .commit(&CommitBatch {
                records: vec![],
                events: vec![event("s1", 1), event("s2", 2), event("s1", 3), elsewhere],
            })
            .unwrap();

        let events = storage.location_events_since("loc", 2).unwrap();
        let keys: Vec<(&str, u64)> = events
            .iter()
            .map(|e| (e.session_id.as_str(), e.sequence))
            .collect();
        assert_eq!(keys, vec![("s2", 2), ("s1", 3)]);
        assert!(storage.location_events_since("loc-3", 0).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.redb");
        {
            let storage = RedbStorage::open(&path).unwrap();
            storage
                .commit(&CommitBatch {
                    records: vec![Record::Table(DiningTable::new("t9", "loc", 9, 2))],
                    events: vec![],
                })
                .unwrap();
        }
        let storage = RedbStorage::open(&path).unwrap();
        let state = storage.load().unwrap();
        assert_eq!(state.tables[0].id, "t9");
    }
}
