//! Persistence collaborator - 持久化
//!
//! 事件必须在提交成功之后才能广播。
//!
//! The core only requires that a change is durably committed before its
//! events are published. [`SessionPersistence`] is that contract;
//! [`RedbStorage`] is the embedded implementation used on the edge node.

mod redb_storage;

pub use redb_storage::RedbStorage;

use shared::models::{DiningTable, Order, Participant, Session, WaiterCall};
use shared::SessionEvent;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One entity version to write
#[derive(Debug, Clone)]
pub enum Record {
    Table(DiningTable),
    Session(Session),
    Participant(Participant),
    Order(Order),
    WaiterCall(WaiterCall),
}

/// Records and the events they produce, written atomically
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub records: Vec<Record>,
    pub events: Vec<SessionEvent>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.events.is_empty()
    }
}

/// One session with everything that belongs to it
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    pub session: Session,
    pub participants: Vec<Participant>,
    pub orders: Vec<Order>,
    pub calls: Vec<WaiterCall>,
    /// Highest committed event sequence (0 if none)
    pub last_sequence: u64,
}

/// What a restarted core needs back in memory
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub tables: Vec<DiningTable>,
    /// Live sessions only: active, or closed with orders still moving
    pub sessions: Vec<PersistedSession>,
}

/// Durable storage for tables, sessions, participants, orders, calls and
/// session events
pub trait SessionPersistence: Send + Sync {
    /// Atomically write a batch; nothing is written on error
    fn commit(&self, batch: &CommitBatch) -> StorageResult<()>;

    /// Committed events of a session with `sequence > after_sequence`, in order
    fn events_since(&self, session_id: &str, after_sequence: u64)
    -> StorageResult<Vec<SessionEvent>>;

    /// Committed events at a location with `timestamp >= since_timestamp`,
    /// oldest first and in sequence order within each session
    fn location_events_since(
        &self,
        location_id: &str,
        since_timestamp: i64,
    ) -> StorageResult<Vec<SessionEvent>>;

    /// One session and its entities, live or not
    fn load_session(&self, session_id: &str) -> StorageResult<Option<PersistedSession>>;

    /// Session owning a participant, order, order line or waiter call
    fn owner_session(&self, entity_id: &str) -> StorageResult<Option<String>>;

    /// Tables and live sessions
    fn load(&self) -> StorageResult<PersistedState>;
}

impl std::fmt::Debug for dyn SessionPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<SessionPersistence>")
    }
}
