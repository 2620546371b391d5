use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

/// Non-blocking fan-out keyed by session id: one [`broadcast::Sender`]
/// per session, created lazily on first subscribe or publish.
///
/// Slow subscribers lag and miss messages rather than stalling the
/// data plane — `broadcast`'s bounded ring does this for free, which is
/// exactly the "drop on full" behavior the item/debug hubs need.
pub struct Hub<T: Clone> {
    channels: RwLock<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> Hub<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<T> {
        let existing = self.channels.read().get(session_id).map(|tx| tx.subscribe());
        if let Some(rx) = existing {
            return rx;
        }
        let mut channels = self.channels.write();
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Fan out to all current subscribers of a session. A no-op if
    /// nobody is subscribed (send simply fails silently).
    pub fn publish(&self, session_id: &str, value: T) {
        let channels = self.channels.read();
        if let Some(tx) = channels.get(session_id) {
            let _ = tx.send(value);
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.channels.write().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_value() {
        let hub: Hub<i32> = Hub::new(8);
        let mut rx = hub.subscribe("s1");
        hub.publish("s1", 42);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub: Hub<i32> = Hub::new(8);
        hub.publish("s1", 1); // must not panic
    }

    #[tokio::test]
    async fn subscriber_registered_after_an_event_misses_it() {
        let hub: Hub<i32> = Hub::new(8);
        hub.publish("s1", 1);
        let mut rx = hub.subscribe("s1");
        hub.publish("s1", 2);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }
}
