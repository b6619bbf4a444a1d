//! Per-session aggregate
//!
//! Everything belonging to one session lives behind a single mutex: the
//! session record, its participants, its orders and its waiter calls.
//! Each family has one writer. Membership is written by the store, the
//! order book by the aggregator, the call book by the call coordinator.

use crate::calls::CallBook;
use crate::core::{SessionError, SessionResult};
use crate::orders::OrderBook;
use crate::storage::PersistedSession;
use shared::models::{Participant, Session};

#[derive(Debug, Clone)]
pub struct SessionAggregate {
    pub(crate) session: Session,
    pub(crate) participants: Vec<Participant>,
    pub(crate) orders: OrderBook,
    pub(crate) calls: CallBook,
    /// Sequence of the last committed event
    pub(crate) last_sequence: u64,
}

impl SessionAggregate {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            participants: Vec::new(),
            orders: OrderBook::default(),
            calls: CallBook::default(),
            last_sequence: 0,
        }
    }

    /// Rebuild from what storage holds for one session
    pub(crate) fn restore(persisted: PersistedSession) -> Self {
        Self {
            session: persisted.session,
            participants: persisted.participants,
            orders: OrderBook::from_orders(persisted.orders),
            calls: CallBook::from_calls(persisted.calls),
            last_sequence: persisted.last_sequence,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn calls(&self) -> &CallBook {
        &self.calls
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn ensure_active(&self) -> SessionResult<()> {
        if self.session.is_active {
            Ok(())
        } else {
            Err(SessionError::SessionClosed(self.session.id.clone()))
        }
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    /// A participant of this session who has not left
    pub fn present_participant(&self, participant_id: &str) -> SessionResult<&Participant> {
        let participant =
            self.participant(participant_id)
                .ok_or_else(|| SessionError::ParticipantNotInSession {
                    participant_id: participant_id.to_string(),
                    session_id: self.session.id.clone(),
                })?;
        if !participant.is_present() {
            return Err(SessionError::ParticipantLeft(participant_id.to_string()));
        }
        Ok(participant)
    }

    pub fn present_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_present()).count()
    }

    /// Whether a display name is used by anyone who ever sat at this session,
    /// optionally ignoring one participant
    pub fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        let key = super::names::name_key(name);
        self.participants
            .iter()
            .filter(|p| Some(p.id.as_str()) != except)
            .any(|p| super::names::name_key(&p.display_name) == key)
    }

    /// Closed, and every order has reached a terminal state
    ///
    /// No operation can change a settled session any more.
    pub fn is_settled(&self) -> bool {
        !self.session.is_active && self.orders.iter().all(|o| o.status.is_terminal())
    }

    /// Participant, order, line and call ids owned by this session
    pub(crate) fn entity_ids(&self) -> impl Iterator<Item = &str> {
        let participants = self.participants.iter().map(|p| p.id.as_str());
        let orders = self.orders.iter().flat_map(|o| {
            std::iter::once(o.id.as_str()).chain(o.lines.iter().map(|l| l.id.as_str()))
        });
        let calls = self.calls.iter().map(|c| c.id.as_str());
        participants.chain(orders).chain(calls)
    }
}
