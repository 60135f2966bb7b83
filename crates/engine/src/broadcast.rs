//! Pub/sub hub for dashboard clients.
//!
//! Channels are plain names (`events`, `alerts`, `sessions`,
//! `session:<id>`); a subscription ending in `*` matches every channel
//! sharing the prefix. Broadcast snapshots the subscriber table under the
//! lock and sends outside it; a send failure drops the subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

pub type SubscriberId = u64;

struct Subscriber {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
}

/// Whether a subscription pattern covers a concrete channel name.
fn channel_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster::default()
    }

    /// Register a subscriber with an initial channel set. Returns its id
    /// and the receiving end of its message stream.
    pub fn subscribe(
        &self,
        channels: impl IntoIterator<Item = String>,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(
            id,
            Subscriber {
                channels: channels.into_iter().collect(),
                tx,
            },
        );
        (id, rx)
    }

    /// Add channels to an existing subscriber.
    pub fn add_channels(&self, id: SubscriberId, channels: impl IntoIterator<Item = String>) {
        if let Some(subscriber) = self.subscribers.lock().get_mut(&id) {
            subscriber.channels.extend(channels);
        }
    }

    /// Remove channels from an existing subscriber.
    pub fn remove_channels<'a>(
        &self,
        id: SubscriberId,
        channels: impl IntoIterator<Item = &'a str>,
    ) {
        if let Some(subscriber) = self.subscribers.lock().get_mut(&id) {
            for channel in channels {
                subscriber.channels.remove(channel);
            }
        }
    }

    /// Drop a subscriber entirely.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Send a message to every subscriber whose channel set covers
    /// `channel`. Subscribers whose stream is gone are removed; there is no
    /// retry.
    pub fn broadcast(&self, channel: &str, message: &Value) {
        let targets: Vec<(SubscriberId, mpsc::UnboundedSender<Value>)> = {
            let subscribers = self.subscribers.lock();
            subscribers
                .iter()
                .filter(|(_, s)| s.channels.iter().any(|p| channel_matches(p, channel)))
                .map(|(id, s)| (*id, s.tx.clone()))
                .collect()
        };

        let mut dead: Vec<SubscriberId> = Vec::new();
        for (id, tx) in targets {
            if tx.send(message.clone()).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in dead {
                subscribers.remove(&id);
                tracing::debug!(subscriber = id, "dropped dead pub/sub subscriber");
            }
        }
    }
}

/// Standard server → client message envelope.
pub fn envelope(kind: &str, data: Value) -> Value {
    serde_json::json!({
        "type": kind,
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_matching() {
        assert!(channel_matches("events", "events"));
        assert!(!channel_matches("events", "alerts"));
        assert!(channel_matches("session:*", "session:abc"));
        assert!(channel_matches("*", "anything"));
        assert!(!channel_matches("session:*", "events"));
    }

    #[tokio::test]
    async fn broadcast_reaches_matching_subscribers_only() {
        let hub = Broadcaster::new();
        let (_id_events, mut rx_events) = hub.subscribe(vec!["events".to_string()]);
        let (_id_wild, mut rx_wild) = hub.subscribe(vec!["session:*".to_string()]);

        hub.broadcast("session:s1", &serde_json::json!({"n": 1}));
        assert_eq!(rx_wild.recv().await.unwrap()["n"], 1);
        assert!(rx_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscribers_are_dropped_on_send() {
        let hub = Broadcaster::new();
        let (_id, rx) = hub.subscribe(vec!["events".to_string()]);
        drop(rx);
        assert_eq!(hub.subscriber_count(), 1);

        hub.broadcast("events", &serde_json::json!({}));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn channel_membership_can_change() {
        let hub = Broadcaster::new();
        let (id, mut rx) = hub.subscribe(vec!["events".to_string()]);

        hub.remove_channels(id, ["events"]);
        hub.broadcast("events", &serde_json::json!({"n": 1}));
        assert!(rx.try_recv().is_err());

        hub.add_channels(id, vec!["alerts".to_string()]);
        hub.broadcast("alerts", &serde_json::json!({"n": 2}));
        assert_eq!(rx.recv().await.unwrap()["n"], 2);
    }
}
