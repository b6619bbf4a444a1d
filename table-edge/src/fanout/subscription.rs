//! Scoped subscriptions
//!
//! A [`Subscription`] owns one broadcast receiver. Dropping it releases the
//! receiver and removes the topic channel once nobody listens anymore, so a
//! disconnected device never leaves a dangling listener behind.
//!
//! 订阅落后（lagged）时：
//! - 单会话 / 单桌：`FanoutHub::replay(session_id, watermark)`
//! - 门店订阅：`FanoutHub::replay_location(location_id, resume_from())`
//!
//! 两种重放结果都交给 [`Subscription::catch_up`] 去重。

use super::{ChannelMap, Topic};
use shared::SessionEvent;
use shared::util::now_millis;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Look-back on location replay; event timestamps are taken before commit,
/// so two sessions can publish slightly out of timestamp order
const REPLAY_SLACK_MS: i64 = 1_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The receiver fell behind; `n` events were dropped and must be replayed
    #[error("Subscriber lagged, {0} events skipped")]
    Lagged(u64),

    #[error("Subscription closed")]
    Closed,
}

/// RAII subscription handle
pub struct Subscription {
    topic: Topic,
    rx: Option<broadcast::Receiver<Arc<SessionEvent>>>,
    channels: Arc<ChannelMap>,
    /// Highest sequence seen per session
    watermarks: HashMap<String, u64>,
    /// Newest accepted timestamp, or the creation time
    last_timestamp: i64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("watermarks", &self.watermarks)
            .field("last_timestamp", &self.last_timestamp)
            .finish()
    }
}

impl Subscription {
    pub(super) fn new(
        topic: Topic,
        rx: broadcast::Receiver<Arc<SessionEvent>>,
        channels: Arc<ChannelMap>,
    ) -> Self {
        Self {
            topic,
            rx: Some(rx),
            channels,
            watermarks: HashMap::new(),
            last_timestamp: now_millis(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Highest sequence already delivered for a session (0 if none)
    pub fn watermark(&self, session_id: &str) -> u64 {
        self.watermarks.get(session_id).copied().unwrap_or(0)
    }

    /// Timestamp to pass to `replay_location` after a lag
    pub fn resume_from(&self) -> i64 {
        self.last_timestamp.saturating_sub(REPLAY_SLACK_MS)
    }

    /// Record an event as delivered
    ///
    /// Returns `false` for an event at or below the session's watermark,
    /// i.e. a redelivery that must not be applied again.
    pub fn accept(&mut self, event: &SessionEvent) -> bool {
        let watermark = self.watermarks.entry(event.session_id.clone()).or_insert(0);
        if event.sequence <= *watermark {
            tracing::debug!(
                session_id = %event.session_id,
                sequence = event.sequence,
                "Duplicate event dropped"
            );
            return false;
        }
        *watermark = event.sequence;
        self.last_timestamp = self.last_timestamp.max(event.timestamp);
        true
    }

    /// Wait for the next new event
    pub async fn recv(&mut self) -> Result<Arc<SessionEvent>, SubscriptionError> {
        loop {
            let rx = self.rx.as_mut().ok_or(SubscriptionError::Closed)?;
            match rx.recv().await {
                Ok(event) => {
                    if self.accept(&event) {
                        return Ok(event);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::error!(topic = ?self.topic, skipped = n, "Subscriber lagged");
                    return Err(SubscriptionError::Lagged(n));
                }
                Err(RecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }

    /// Next new event if one is already queued
    pub fn try_recv(&mut self) -> Result<Option<Arc<SessionEvent>>, SubscriptionError> {
        loop {
            let rx = self.rx.as_mut().ok_or(SubscriptionError::Closed)?;
            match rx.try_recv() {
                Ok(event) => {
                    if self.accept(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(n)) => {
                    tracing::error!(topic = ?self.topic, skipped = n, "Subscriber lagged");
                    return Err(SubscriptionError::Lagged(n));
                }
                Err(TryRecvError::Closed) => return Err(SubscriptionError::Closed),
            }
        }
    }

    /// Filter replayed events down to the ones this subscription has not seen
    pub fn catch_up(&mut self, replayed: Vec<SessionEvent>) -> Vec<SessionEvent> {
        let topic = self.topic.clone();
        replayed
            .into_iter()
            .filter(|event| topic.matches(event) && self.accept(event))
            .collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Release the receiver before checking the count
        drop(self.rx.take());
        let removed = self
            .channels
            .remove_if(&self.topic, |_, tx| tx.receiver_count() == 0);
        if removed.is_some() {
            tracing::debug!(topic = ?self.topic, "Topic channel removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::FanoutHub;
    use super::*;
    use crate::storage::RedbStorage;
    use shared::models::Session;
    use shared::{EventPayload, SessionEventType};

    fn event(sequence: u64) -> SessionEvent {
        event_in("s1", sequence)
    }

    fn event_in(session_id: &str, sequence: u64) -> SessionEvent {
        SessionEvent {
            event_id: format!("{session_id}-e{sequence}"),
            sequence,
            session_id: session_id.to_string(),
            table_id: "t1".to_string(),
            location_id: "loc".to_string(),
            timestamp: 0,
            event_type: SessionEventType::ParticipantJoined,
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

    fn hub(capacity: usize) -> FanoutHub {
        FanoutHub::new(capacity, Arc::new(RedbStorage::open_in_memory().unwrap()))
    }

    #[test]
    fn test_redelivery_is_noop() {
        let hub = hub(16);
        let mut sub = hub.subscribe(Topic::Session("s1".to_string()));

        hub.publish(event(1));
        hub.publish(event(1));
        hub.publish(event(2));

        assert_eq!(sub.try_recv().unwrap().unwrap().sequence, 1);
        assert_eq!(sub.try_recv().unwrap().unwrap().sequence, 2);
        assert!(sub.try_recv().unwrap().is_none());
        assert_eq!(sub.watermark("s1"), 2);
    }

    #[test]
    fn test_lagged_is_reported() {
        let hub = hub(2);
        let mut sub = hub.subscribe(Topic::Table("t1".to_string()));
        for seq in 1..=5 {
            hub.publish(event(seq));
        }
        assert!(matches!(sub.try_recv(), Err(SubscriptionError::Lagged(_))));
        // The receiver resumes at the oldest retained event
        assert!(sub.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_catch_up_skips_seen_events() {
        let hub = hub(16);
        let mut sub = hub.subscribe(Topic::Session("s1".to_string()));
        hub.publish(event(1));
        hub.publish(event(2));
        sub.try_recv().unwrap();
        sub.try_recv().unwrap();

        let fresh = sub.catch_up(vec![event(1), event(2), event(3)]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].sequence, 3);
    }

    #[test]
    fn test_catch_up_drops_other_topics() {
        let hub = hub(16);
        let mut sub = hub.subscribe(Topic::Session("s1".to_string()));

        let fresh = sub.catch_up(vec![event_in("s2", 1), event(1), event_in("s2", 2)]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].session_id, "s1");
        // Nothing from s2 was recorded either
        assert_eq!(sub.watermark("s2"), 0);
    }

    #[test]
    fn test_resume_from_follows_accepted_events() {
        let hub = hub(16);
        let mut sub = hub.subscribe(Topic::Session("s1".to_string()));
        let created = sub.resume_from();

        let mut late = event(1);
        late.timestamp = created + 60_000;
        assert!(sub.accept(&late));
        assert_eq!(sub.resume_from(), late.timestamp - REPLAY_SLACK_MS);

        // An older event never moves it back
        assert!(sub.accept(&event(2)));
        assert_eq!(sub.resume_from(), late.timestamp - REPLAY_SLACK_MS);
    }
}
