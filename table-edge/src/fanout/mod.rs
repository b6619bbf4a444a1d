//! Event Fanout Hub - 事件扇出
//!
//! Delivers committed session events to every device subscribed to a
//! session, a table, or a location audience.
//!
//! ```text
//! SessionStore::commit (under the session lock)
//!        │
//!        └── FanoutHub::publish
//!               ├── broadcast ──► Session(id)                 (everything)
//!               ├── broadcast ──► Table(id)                   (everything)
//!               ├── broadcast ──► Location { All }            (all but cart edits)
//!               ├── broadcast ──► Location { Staff }          (orders + waiter calls)
//!               └── broadcast ──► Location { Kitchen }        (confirmed + status changes)
//! ```
//!
//! Publishing happens while the session's mutation boundary is held, so a
//! session's events enter every channel in commit order. Channels are
//! created on first subscribe and removed when the last subscriber drops.
//!
//! ## 落后处理
//!
//! - 通道满时订阅者收到 `Lagged`，不会静默丢事件
//! - 会话 / 桌台订阅用 `replay` 按序号补齐
//! - 门店订阅用 `replay_location` 按时间补齐，由水位线去重

mod subscription;

pub use subscription::{Subscription, SubscriptionError};

use crate::storage::{SessionPersistence, StorageResult};
use dashmap::DashMap;
use shared::{SessionEvent, SessionEventType};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Location-wide subscriber group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    All,
    Staff,
    Kitchen,
}

impl Audience {
    fn wants(&self, event_type: SessionEventType) -> bool {
        match self {
            // Cart edits stay at the table
            Audience::All => event_type != SessionEventType::OrderUpdated,
            Audience::Staff => {
                event_type.is_call_event()
                    || matches!(
                        event_type,
                        SessionEventType::OrderConfirmed | SessionEventType::OrderStatusChanged
                    )
            }
            Audience::Kitchen => matches!(
                event_type,
                SessionEventType::OrderConfirmed | SessionEventType::OrderStatusChanged
            ),
        }
    }
}

/// Subscription key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Session(String),
    Table(String),
    Location {
        location_id: String,
        audience: Audience,
    },
}

impl Topic {
    pub fn location(location_id: impl Into<String>, audience: Audience) -> Self {
        Topic::Location {
            location_id: location_id.into(),
            audience,
        }
    }

    /// Whether an event is routed to this topic
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            Topic::Session(id) => *id == event.session_id,
            Topic::Table(id) => *id == event.table_id,
            Topic::Location {
                location_id,
                audience,
            } => *location_id == event.location_id && audience.wants(event.event_type),
        }
    }
}

/// Every topic an event is delivered to
pub fn topics_for(event: &SessionEvent) -> Vec<Topic> {
    let mut topics = vec![
        Topic::Session(event.session_id.clone()),
        Topic::Table(event.table_id.clone()),
    ];
    for audience in [Audience::All, Audience::Staff, Audience::Kitchen] {
        if audience.wants(event.event_type) {
            topics.push(Topic::location(event.location_id.clone(), audience));
        }
    }
    topics
}

pub(crate) type ChannelMap = DashMap<Topic, broadcast::Sender<Arc<SessionEvent>>>;

/// Publish/subscribe router keyed by [`Topic`]
pub struct FanoutHub {
    channels: Arc<ChannelMap>,
    capacity: usize,
    persistence: Arc<dyn SessionPersistence>,
}

impl std::fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutHub")
            .field("channels", &self.channels.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl FanoutHub {
    pub fn new(capacity: usize, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            persistence,
        }
    }

    /// Deliver a committed event to every matching topic
    ///
    /// Must only be called after the event's batch has been committed.
    pub fn publish(&self, event: SessionEvent) {
        let event = Arc::new(event);
        let mut delivered = 0usize;
        for topic in topics_for(&event) {
            if let Some(tx) = self.channels.get(&topic) {
                // Err only means every receiver is gone; the guard on drop cleans up
                if tx.send(Arc::clone(&event)).is_ok() {
                    delivered += 1;
                }
            }
        }
        tracing::debug!(
            session_id = %event.session_id,
            sequence = event.sequence,
            event_type = %event.event_type,
            topics = delivered,
            "Event published"
        );
    }

    /// Subscribe to a topic; dropping the handle unsubscribes
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let rx = self
            .channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        tracing::debug!(topic = ?topic, "Subscribed");
        Subscription::new(topic, rx, Arc::clone(&self.channels))
    }

    /// Committed events of a session after `after_sequence`, for catch-up
    pub fn replay(&self, session_id: &str, after_sequence: u64) -> StorageResult<Vec<SessionEvent>> {
        self.persistence.events_since(session_id, after_sequence)
    }

    /// Committed events at a location from `since_timestamp` on, for a
    /// lagging location subscriber
    ///
    /// Pass [`Subscription::resume_from`] and feed the result through
    /// [`Subscription::catch_up`], which filters by audience and drops what
    /// was already delivered.
    pub fn replay_location(
        &self,
        location_id: &str,
        since_timestamp: i64,
    ) -> StorageResult<Vec<SessionEvent>> {
        self.persistence
            .location_events_since(location_id, since_timestamp)
    }

    /// Number of live topic channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorage;
    use shared::models::Session;
    use shared::EventPayload;

    fn hub() -> FanoutHub {
        FanoutHub::new(16, Arc::new(RedbStorage::open_in_memory().unwrap()))
    }

    fn event(sequence: u64, event_type: SessionEventType) -> SessionEvent {
        SessionEvent {
            event_id: format!("e{sequence}"),
            sequence,
            session_id: "s1".to_string(),
            table_id: "t1".to_string(),
            location_id: "loc".to_string(),
            timestamp: 0,
            event_type,
            payload: EventPayload::Session {
                session: Session {
                    id: "s1".to_string(),
                    table_id: "t1".to_string(),
                    location_id: "loc".to_string(),
                    started_at: 0,
                    ended_at: None,
                    is_active: true,
                },
            },
        }
    }

    #[test]
    fn test_routing_by_audience() {
        let joined = topics_for(&event(1, SessionEventType::ParticipantJoined));
        assert!(joined.contains(&Topic::location("loc", Audience::All)));
        assert!(!joined.contains(&Topic::location("loc", Audience::Staff)));

        let cart = topics_for(&event(2, SessionEventType::OrderUpdated));
        assert_eq!(
            cart,
            vec![Topic::Session("s1".to_string()), Topic::Table("t1".to_string())]
        );

        let confirmed = topics_for(&event(3, SessionEventType::OrderConfirmed));
        assert!(confirmed.contains(&Topic::location("loc", Audience::Kitchen)));
        assert!(confirmed.contains(&Topic::location("loc", Audience::Staff)));

        let call = topics_for(&event(4, SessionEventType::WaiterCallCreated));
        assert!(call.contains(&Topic::location("loc", Audience::Staff)));
        assert!(!call.contains(&Topic::location("loc", Audience::Kitchen)));
    }

    #[test]
    fn test_other_location_not_matched() {
        let topic = Topic::location("elsewhere", Audience::All);
        assert!(!topic.matches(&event(1, SessionEventType::SessionOpened)));
    }

    #[test]
    fn test_drop_unsubscribes_and_removes_channel() {
        let hub = hub();
        let topic = Topic::Table("t1".to_string());
        let first = hub.subscribe(topic.clone());
        let second = hub.subscribe(topic.clone());
        assert_eq!(hub.subscriber_count(&topic), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(&topic), 1);
        assert_eq!(hub.channel_count(), 1);

        drop(second);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = hub();
        hub.publish(event(1, SessionEventType::SessionOpened));
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_kitchen_only_sees_kitchen_events() {
        let hub = hub();
        let mut kitchen = hub.subscribe(Topic::location("loc", Audience::Kitchen));

        hub.publish(event(1, SessionEventType::ParticipantJoined));
        hub.publish(event(2, SessionEventType::OrderUpdated));
        hub.publish(event(3, SessionEventType::OrderConfirmed));

        let received = kitchen.recv().await.unwrap();
        assert_eq!(received.sequence, 3);
        assert!(kitchen.try_recv().unwrap().is_none());
    }
}
