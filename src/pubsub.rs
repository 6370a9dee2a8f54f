//! Publish/subscribe transport interface.
//!
//! The runtime publishes monitor values, stream data, and transition log
//! records onto named topics and never waits on the transport: publication is
//! fire-and-forget, and a slow or absent subscriber must not block the
//! publishing call site. Topics follow the fixed scheme
//! `{type}/{id}/{streamOrMonitorName}` and `{type}/{id}/logs`.
//!
//! [`MemoryPubSub`] is the in-process reference hub: bounded per-subscriber
//! queues, non-blocking `try_send` publication, and a counter for messages it
//! had to drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde_json::Value;

/// A message carried on a topic.
///
/// The framing is decided by the write side: structured streams and monitors
/// publish [`Message::Object`], binary streams publish [`Message::Binary`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Structured JSON payload.
    Object(Value),
    /// Raw binary payload.
    Binary(Vec<u8>),
}

impl Message {
    /// Returns the structured payload, if this is an object message.
    #[must_use]
    pub const fn as_object(&self) -> Option<&Value> {
        match self {
            Self::Object(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    /// Returns the binary payload, if this is a binary message.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Object(_) => None,
        }
    }
}

/// Transport contract consumed by the runtime.
///
/// Implementations are shared from arbitrary call sites and must be
/// individually safe for concurrent use.
pub trait PubSub: Send + Sync {
    /// Fire-and-forget publish. Must never block the caller; delivery to
    /// slow or disconnected subscribers is at the transport's discretion.
    fn publish(&self, topic: &str, message: Message);

    /// Subscribe to a topic. The receiver observes every message published
    /// after this call, subject to the transport's queueing policy.
    fn subscribe(&self, topic: &str) -> Receiver<Message>;
}

/// In-memory hub configuration.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Per-subscriber queue capacity before messages are dropped.
    pub subscriber_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
        }
    }
}

/// In-memory topic hub backed by bounded channels.
///
/// Publication uses non-blocking `try_send`; messages that would block on a
/// full queue are dropped and counted, and disconnected subscribers are
/// pruned on the next publish to their topic.
#[derive(Debug)]
pub struct MemoryPubSub {
    cfg: PubSubConfig,
    topics: RwLock<HashMap<String, Vec<Sender<Message>>>>,
    dropped: AtomicU64,
}

impl MemoryPubSub {
    /// Creates a hub with the given configuration.
    #[must_use]
    pub fn new(cfg: PubSubConfig) -> Self {
        Self {
            cfg,
            topics: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Messages dropped because a subscriber queue was full or gone.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscribers across all topics.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new(PubSubConfig::default())
    }
}

impl PubSub for MemoryPubSub {
    fn publish(&self, topic: &str, message: Message) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let Some(subscribers) = topics.get_mut(topic) else {
            return;
        };

        subscribers.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        });

        if subscribers.is_empty() {
            topics.remove(topic);
        }
    }

    fn subscribe(&self, topic: &str) -> Receiver<Message> {
        let (tx, rx) = bounded(self.cfg.subscriber_capacity.max(1));
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = MemoryPubSub::default();
        let a = hub.subscribe("lamp/1/state");
        let b = hub.subscribe("lamp/1/state");

        hub.publish("lamp/1/state", Message::Object(json!("on")));

        assert_eq!(a.try_recv().unwrap(), Message::Object(json!("on")));
        assert_eq!(b.try_recv().unwrap(), Message::Object(json!("on")));
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = MemoryPubSub::default();
        hub.publish("lamp/1/state", Message::Object(json!("on")));
        assert_eq!(hub.dropped_messages(), 0);
    }

    #[test]
    fn topics_are_isolated() {
        let hub = MemoryPubSub::default();
        let state = hub.subscribe("lamp/1/state");
        let logs = hub.subscribe("lamp/1/logs");

        hub.publish("lamp/1/logs", Message::Object(json!({ "transition": "turn-on" })));

        assert!(state.try_recv().is_err());
        assert!(logs.try_recv().is_ok());
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let hub = MemoryPubSub::new(PubSubConfig {
            subscriber_capacity: 1,
        });
        let rx = hub.subscribe("sensor/1/data");

        hub.publish("sensor/1/data", Message::Object(json!(1)));
        hub.publish("sensor/1/data", Message::Object(json!(2)));

        assert_eq!(hub.dropped_messages(), 1);
        assert_eq!(rx.try_recv().unwrap(), Message::Object(json!(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let hub = MemoryPubSub::default();
        let rx = hub.subscribe("sensor/1/data");
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);
        hub.publish("sensor/1/data", Message::Binary(vec![1, 2, 3]));

        assert_eq!(hub.dropped_messages(), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn message_accessors_match_framing() {
        let object = Message::Object(json!({ "k": 1 }));
        assert!(object.as_object().is_some());
        assert!(object.as_binary().is_none());

        let binary = Message::Binary(vec![0xff]);
        assert_eq!(binary.as_binary(), Some(&[0xff][..]));
        assert!(binary.as_object().is_none());
    }
}
