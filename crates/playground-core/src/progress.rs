//! Per-session publish/subscribe channel for progress events.
//!
//! Best-effort fan-out: no history, no replay, no acknowledgement. A topic
//! exists only while its session is registered; closing it drops every
//! subscriber handle so their streams end.

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    event::ProgressEvent,
    traits::{SessionId, SubscriberId},
};

/// Handle events are delivered to.
pub type SubscriberHandle = mpsc::UnboundedSender<ProgressEvent>;

#[derive(Default)]
struct Topic {
    subscribers: HashMap<SubscriberId, SubscriberHandle>,
}

/// A subscription created by [`ProgressChannel::subscribe_stream`].
pub struct Subscription {
    /// `None` if the session was not active when joining.
    pub id: Option<SubscriberId>,
    /// Events in publish order. Ends when the session's topic closes.
    pub stream: UnboundedReceiverStream<ProgressEvent>,
}

/// Progress channel keyed by session id.
///
/// Topics live in a sharded map so unrelated sessions never wait on each other.
#[derive(Default)]
pub struct ProgressChannel {
    topics: DashMap<SessionId, Topic>,
}

impl ProgressChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the topic for a newly registered session.
    pub fn open(&self, session_id: SessionId) {
        self.topics.entry(session_id).or_default();
    }

    /// Discard a session's topic and every subscriber on it.
    ///
    /// Returns the number of subscribers that were still joined.
    pub fn close(&self, session_id: SessionId) -> usize {
        self.topics
            .remove(&session_id)
            .map_or(0, |(_, topic)| topic.subscribers.len())
    }

    /// Register a subscriber handle.
    ///
    /// Returns `None` and drops the handle if the session is not active; such
    /// a subscriber observes nothing further.
    pub fn subscribe(
        &self,
        session_id: SessionId,
        handle: SubscriberHandle,
    ) -> Option<SubscriberId> {
        let Some(mut topic) = self.topics.get_mut(&session_id) else {
            tracing::debug!(session_id = %session_id, "Subscribe to inactive session");
            return None;
        };
        let subscriber_id = Uuid::new_v4();
        topic.subscribers.insert(subscriber_id, handle);
        Some(subscriber_id)
    }

    /// Subscribe and get the events as a stream.
    #[must_use]
    pub fn subscribe_stream(&self, session_id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(session_id, tx);
        Subscription {
            id,
            stream: UnboundedReceiverStream::new(rx),
        }
    }

    /// Remove a subscriber. Unknown sessions or subscribers are a no-op.
    pub fn unsubscribe(&self, session_id: SessionId, subscriber_id: SubscriberId) {
        if let Some(mut topic) = self.topics.get_mut(&session_id) {
            topic.subscribers.remove(&subscriber_id);
        }
    }

    /// Deliver an event to every current subscriber of a session.
    ///
    /// Subscribers whose receiving side is gone are pruned. Returns the number
    /// of subscribers the event reached.
    pub fn publish(&self, session_id: SessionId, event: &ProgressEvent) -> usize {
        let Some(mut topic) = self.topics.get_mut(&session_id) else {
            return 0;
        };
        topic
            .subscribers
            .retain(|_, handle| handle.send(event.clone()).is_ok());
        topic.subscribers.len()
    }

    /// Whether a subscriber is still registered on an open topic.
    #[must_use]
    pub fn is_subscribed(&self, session_id: SessionId, subscriber_id: SubscriberId) -> bool {
        self.topics
            .get(&session_id)
            .is_some_and(|topic| topic.subscribers.contains_key(&subscriber_id))
    }

    /// Number of subscribers currently joined to a session.
    #[must_use]
    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.topics
            .get(&session_id)
            .map_or(0, |topic| topic.subscribers.len())
    }

    /// Number of open topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::event::EpochMetrics;

    fn progress(epoch: u32) -> ProgressEvent {
        ProgressEvent::progress(epoch, 3, EpochMetrics::default())
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let channel = ProgressChannel::new();
        let id = Uuid::new_v4();
        channel.open(id);

        let a = channel.subscribe_stream(id);
        let b = channel.subscribe_stream(id);
        assert!(a.id.is_some());
        assert_eq!(channel.subscriber_count(id), 2);

        for epoch in 1..=3 {
            assert_eq!(channel.publish(id, &progress(epoch)), 2);
        }
        assert_eq!(channel.close(id), 2);

        let expected = vec![progress(1), progress(2), progress(3)];
        assert_eq!(a.stream.collect::<Vec<_>>().await, expected);
        assert_eq!(b.stream.collect::<Vec<_>>().await, expected);
    }

    #[tokio::test]
    async fn test_late_join_sees_nothing() {
        let channel = ProgressChannel::new();
        let id = Uuid::new_v4();
        channel.open(id);
        channel.publish(id, &progress(1));
        channel.close(id);

        let late = channel.subscribe_stream(id);
        assert!(late.id.is_none());
        assert!(late.stream.collect::<Vec<_>>().await.is_empty());
        assert_eq!(channel.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_joining_midway_misses_earlier_events() {
        let channel = ProgressChannel::new();
        let id = Uuid::new_v4();
        channel.open(id);
        channel.publish(id, &progress(1));

        let sub = channel.subscribe_stream(id);
        channel.publish(id, &progress(2));
        channel.close(id);

        assert_eq!(sub.stream.collect::<Vec<_>>().await, vec![progress(2)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let channel = ProgressChannel::new();
        let id = Uuid::new_v4();
        channel.open(id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = channel.subscribe(id, tx).unwrap();
        assert!(channel.is_subscribed(id, sub));
        channel.unsubscribe(id, sub);
        channel.unsubscribe(id, sub);
        assert!(!channel.is_subscribed(id, sub));
        channel.unsubscribe(Uuid::new_v4(), sub);

        assert_eq!(channel.publish(id, &progress(1)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let channel = ProgressChannel::new();
        let id = Uuid::new_v4();
        channel.open(id);

        let (tx, rx) = mpsc::unbounded_channel();
        channel.subscribe(id, tx);
        let (keep_tx, _keep_rx) = mpsc::unbounded_channel();
        channel.subscribe(id, keep_tx);
        drop(rx);

        assert_eq!(channel.publish(id, &progress(1)), 1);
        assert_eq!(channel.subscriber_count(id), 1);
    }

    #[test]
    fn test_publish_to_unknown_session() {
        let channel = ProgressChannel::new();
        assert_eq!(channel.publish(Uuid::new_v4(), &progress(1)), 0);
        assert_eq!(channel.close(Uuid::new_v4()), 0);
    }
}
