//! Write-side device streams and read-side consumer streams.
//!
//! Every named channel on a device has a write side created at generation
//! time ([`DeviceStream`]) and an on-demand read side ([`ConsumerStream`])
//! built fresh for each consumer. The framing (structured object envelopes
//! or raw binary) is fixed per stream at creation and both sides are
//! constrained to it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DeviceError, DeviceResult};
use crate::pubsub::{Message, PubSub};

/// Framing for a named stream, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// Structured values wrapped in a [`StreamMessage`] envelope.
    Object,
    /// Raw bytes published as-is.
    Binary,
}

impl StreamMode {
    /// Wire name of the framing.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Binary => "binary",
        }
    }
}

/// Envelope wrapped around every structured stream write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The written value.
    pub data: Value,
}

impl StreamMessage {
    /// Wraps a value in the outbound envelope for a topic, stamped now.
    #[must_use]
    pub fn format(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            timestamp: Utc::now().timestamp_millis(),
            data,
        }
    }
}

/// Write side of a named device channel.
///
/// Handles are cheap to clone. The enabled flag is shared across clones, so
/// `enable_stream`/`disable_stream` on the device affect every handle;
/// disabled streams drop writes silently.
#[derive(Clone)]
pub struct DeviceStream {
    name: String,
    topic: String,
    mode: StreamMode,
    enabled: Arc<AtomicBool>,
    pubsub: Arc<dyn PubSub>,
}

impl DeviceStream {
    pub(crate) fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        mode: StreamMode,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            mode,
            enabled: Arc::new(AtomicBool::new(true)),
            pubsub,
        }
    }

    /// Name the stream was declared under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic this stream publishes on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Framing this stream was created with.
    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Whether writes are currently forwarded to the transport.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Publish a structured value, wrapped in the stream envelope.
    ///
    /// Errors when the stream was created with binary framing. Disabled
    /// streams drop the write and report success.
    pub fn write(&self, data: Value) -> DeviceResult<()> {
        if self.mode != StreamMode::Object {
            return Err(DeviceError::StreamMode {
                name: self.name.clone(),
                expected: StreamMode::Binary.as_str(),
            });
        }
        if !self.is_enabled() {
            return Ok(());
        }

        let envelope = json!({
            "topic": self.topic,
            "timestamp": Utc::now().timestamp_millis(),
            "data": data,
        });
        self.pubsub.publish(&self.topic, Message::Object(envelope));
        Ok(())
    }

    /// Publish raw bytes.
    ///
    /// Errors when the stream was created with object framing. Disabled
    /// streams drop the write and report success.
    pub fn write_bytes(&self, data: Vec<u8>) -> DeviceResult<()> {
        if self.mode != StreamMode::Binary {
            return Err(DeviceError::StreamMode {
                name: self.name.clone(),
                expected: StreamMode::Object.as_str(),
            });
        }
        if !self.is_enabled() {
            return Ok(());
        }

        self.pubsub.publish(&self.topic, Message::Binary(data));
        Ok(())
    }
}

impl fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStream")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("mode", &self.mode)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Read side of a named device channel, scoped to one topic.
///
/// Constructed fresh on each access and never cached: a consumer observes
/// only messages published after it subscribed. Messages whose framing does
/// not match the underlying write side are skipped.
#[derive(Debug)]
pub struct ConsumerStream {
    topic: String,
    mode: StreamMode,
    rx: Receiver<Message>,
}

impl ConsumerStream {
    pub(crate) fn new(topic: impl Into<String>, mode: StreamMode, rx: Receiver<Message>) -> Self {
        Self {
            topic: topic.into(),
            mode,
            rx,
        }
    }

    /// Topic this consumer is subscribed to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Framing of the underlying write side.
    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    fn accepts(&self, message: &Message) -> bool {
        match self.mode {
            StreamMode::Object => matches!(message, Message::Object(_)),
            StreamMode::Binary => matches!(message, Message::Binary(_)),
        }
    }

    /// Receive the next message (blocking).
    pub fn recv(&self) -> DeviceResult<Message> {
        loop {
            let message = self.rx.recv().map_err(|_| DeviceError::Disconnected {
                path: self.topic.clone(),
            })?;
            if self.accepts(&message) {
                return Ok(message);
            }
        }
    }

    /// Receive the next message without blocking, `None` when the queue is
    /// empty.
    pub fn try_recv(&self) -> DeviceResult<Option<Message>> {
        loop {
            match self.rx.try_recv() {
                Ok(message) if self.accepts(&message) => return Ok(Some(message)),
                Ok(_) => {}
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(DeviceError::Disconnected {
                        path: self.topic.clone(),
                    })
                }
            }
        }
    }

    /// Receive the next message with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> DeviceResult<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(message) if self.accepts(&message) => return Ok(message),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DeviceError::Timeout {
                        duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::Disconnected {
                        path: self.topic.clone(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryPubSub;
    use serde_json::json;

    fn object_stream(hub: &Arc<MemoryPubSub>) -> DeviceStream {
        DeviceStream::new(
            "intensity",
            "photocell/1/intensity",
            StreamMode::Object,
            Arc::clone(hub) as Arc<dyn PubSub>,
        )
    }

    #[test]
    fn format_wraps_value_with_topic_and_timestamp() {
        let msg = StreamMessage::format("photocell/1/intensity", json!(12));
        assert_eq!(msg.topic, "photocell/1/intensity");
        assert_eq!(msg.data, json!(12));
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn object_write_publishes_envelope() {
        let hub = Arc::new(MemoryPubSub::default());
        let stream = object_stream(&hub);
        let rx = hub.subscribe("photocell/1/intensity");

        stream.write(json!(42)).unwrap();

        let Message::Object(envelope) = rx.try_recv().unwrap() else {
            panic!("expected object framing");
        };
        assert_eq!(envelope["topic"], json!("photocell/1/intensity"));
        assert_eq!(envelope["data"], json!(42));
        assert!(envelope["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn disabled_stream_drops_writes_silently() {
        let hub = Arc::new(MemoryPubSub::default());
        let stream = object_stream(&hub);
        let rx = hub.subscribe("photocell/1/intensity");

        stream.set_enabled(false);
        stream.write(json!(1)).unwrap();
        assert!(rx.try_recv().is_err());

        stream.set_enabled(true);
        stream.write(json!(2)).unwrap();
        let Message::Object(envelope) = rx.try_recv().unwrap() else {
            panic!("expected object framing");
        };
        assert_eq!(envelope["data"], json!(2));
    }

    #[test]
    fn enabled_flag_is_shared_across_clones() {
        let hub = Arc::new(MemoryPubSub::default());
        let stream = object_stream(&hub);
        let clone = stream.clone();

        clone.set_enabled(false);
        assert!(!stream.is_enabled());
    }

    #[test]
    fn framing_mismatch_is_an_error() {
        let hub = Arc::new(MemoryPubSub::default());
        let object = object_stream(&hub);
        let err = object.write_bytes(vec![1]).unwrap_err();
        assert!(matches!(err, DeviceError::StreamMode { .. }));

        let binary = DeviceStream::new(
            "frames",
            "camera/1/frames",
            StreamMode::Binary,
            Arc::clone(&hub) as Arc<dyn PubSub>,
        );
        let err = binary.write(json!(1)).unwrap_err();
        assert!(matches!(err, DeviceError::StreamMode { .. }));
    }

    #[test]
    fn binary_write_publishes_raw_bytes() {
        let hub = Arc::new(MemoryPubSub::default());
        let stream = DeviceStream::new(
            "frames",
            "camera/1/frames",
            StreamMode::Binary,
            Arc::clone(&hub) as Arc<dyn PubSub>,
        );
        let rx = hub.subscribe("camera/1/frames");

        stream.write_bytes(vec![0xde, 0xad]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Message::Binary(vec![0xde, 0xad]));
    }

    #[test]
    fn consumer_skips_mismatched_framing() {
        let hub = Arc::new(MemoryPubSub::default());
        let rx = hub.subscribe("camera/1/frames");
        let consumer = ConsumerStream::new("camera/1/frames", StreamMode::Binary, rx);

        hub.publish("camera/1/frames", Message::Object(json!("noise")));
        hub.publish("camera/1/frames", Message::Binary(vec![7]));

        assert_eq!(
            consumer.try_recv().unwrap(),
            Some(Message::Binary(vec![7]))
        );
        assert_eq!(consumer.try_recv().unwrap(), None);
    }

    #[test]
    fn consumer_recv_timeout_expires() {
        let hub = Arc::new(MemoryPubSub::default());
        let rx = hub.subscribe("lamp/1/state");
        let consumer = ConsumerStream::new("lamp/1/state", StreamMode::Object, rx);

        let err = consumer.recv_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, DeviceError::Timeout { .. }));
    }
}
