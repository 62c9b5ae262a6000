//! # Snapshot Broadcast Hub
//!
//! The fan-out layer between the single upstream consume loop and any
//! number of downstream subscribers.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize once, share everywhere**: every publish serializes the
//!     live state a single time and hands each subscriber an `Arc` of the
//!     same immutable string. Fan-out cost is one channel send per
//!     subscriber, never one serialization per subscriber.
//!
//! 2.  **The consume loop never waits**: per-subscriber channels are
//!     bounded and fed with `try_send`. A subscriber that stops draining
//!     its queue is dropped rather than allowed to stall frame
//!     processing for everyone else.
//!
//! 3.  **Late joiners see the world immediately**: the hub retains the
//!     latest snapshot and delivers it on registration, so a subscriber
//!     that connects mid-session never starts from an empty state.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

/// Per-subscriber queue depth. A subscriber this far behind the feed is
/// considered dead weight and gets dropped on the next publish.
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Internal representation of one registered downstream consumer.
struct SubscriberHandle {
    /// Identifier used for registry operations and log lines.
    id: String,
    /// Bounded sending half of the subscriber's snapshot queue.
    sender: mpsc::Sender<Arc<str>>,
}

/// Registry of subscribers plus the retained latest snapshot.
///
/// The hub never touches the live state itself; it only receives
/// immutable references at publish time, keeping the single-writer
/// discipline with the connection manager intact.
pub struct BroadcastHub {
    subscribers: Mutex<Vec<SubscriberHandle>>,
    latest: Mutex<Option<Arc<str>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            latest: Mutex::new(None),
        }
    }

    /// Registers a new subscriber and returns the receiving half of its
    /// snapshot queue. The current snapshot, if any, is queued right
    /// away.
    pub fn add_client(&self, id: &str) -> mpsc::Receiver<Arc<str>> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);

        let latest = self.latest.lock().expect("hub lock poisoned").clone();
        if let Some(snapshot) = latest {
            let _ = sender.try_send(snapshot);
        }

        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.push(SubscriberHandle {
            id: id.to_string(),
            sender,
        });
        log::info!("subscriber '{}' registered ({} total)", id, subscribers.len());

        receiver
    }

    /// Removes a specific subscriber by its ID.
    pub fn remove_client(&self, id: &str) {
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.retain(|subscriber| subscriber.id != id);
        log::info!("subscriber '{}' removed ({} total)", id, subscribers.len());
    }

    /// Serializes the state once and fans the identical snapshot out to
    /// every subscriber. Subscribers whose queue is full or whose
    /// receiver is gone are dropped in the same pass.
    pub fn publish(&self, state: &Value) {
        let serialized = match serde_json::to_string(state) {
            Ok(serialized) => serialized,
            Err(err) => {
                log::error!("failed to serialize snapshot: {}", err);
                return;
            }
        };
        let snapshot: Arc<str> = serialized.into();

        *self.latest.lock().expect("hub lock poisoned") = Some(snapshot.clone());

        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.retain(|subscriber| {
            match subscriber.sender.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("subscriber '{}' backed up; dropping it", subscriber.id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::info!("subscriber '{}' disconnected; dropping it", subscriber.id);
                    false
                }
            }
        });
    }

    /// Forgets the retained snapshot. Called when the upstream session
    /// it belonged to is closed for good, not on reconnects.
    pub fn clear(&self) {
        *self.latest.lock().expect("hub lock poisoned") = None;
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("hub lock poisoned").len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn every_subscriber_gets_the_same_snapshot() {
        let hub = BroadcastHub::new();
        let mut first = hub.add_client("first");
        let mut second = hub.add_client("second");

        hub.publish(&json!({"TrackStatus": {"Status": "1"}}));

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn late_subscriber_receives_the_current_snapshot_on_join() {
        let hub = BroadcastHub::new();
        hub.publish(&json!({"SessionInfo": {"Name": "Race"}}));

        let mut late = hub.add_client("late");
        let snapshot = late.recv().await.unwrap();
        assert!(snapshot.contains("SessionInfo"));
    }

    #[tokio::test]
    async fn subscriber_before_first_publish_gets_nothing_up_front() {
        let hub = BroadcastHub::new();
        let mut early = hub.add_client("early");

        assert!(early.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_dropped_on_publish() {
        let hub = BroadcastHub::new();
        let receiver = hub.add_client("gone");
        drop(receiver);

        hub.publish(&json!({}));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn backed_up_subscriber_is_dropped_instead_of_blocking() {
        let hub = BroadcastHub::new();
        let _receiver = hub.add_client("slow");

        // Never drained: once the bounded queue is full the subscriber
        // must be evicted, and publish must keep returning promptly.
        for _ in 0..=SUBSCRIBER_QUEUE_DEPTH {
            hub.publish(&json!({"LapCount": {"CurrentLap": 1}}));
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn clear_forgets_the_retained_snapshot() {
        let hub = BroadcastHub::new();
        hub.publish(&json!({"SessionInfo": {}}));
        hub.clear();

        let mut fresh = hub.add_client("fresh");
        assert!(fresh.try_recv().is_err());
    }
}
