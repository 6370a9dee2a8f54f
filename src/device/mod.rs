//! Device instances: generation, monitors, streams, properties, and
//! lifecycle.
//!
//! A [`Device`] is a cheap-clone handle over shared runtime state. Transition
//! handlers, remote hooks, and event listeners all receive handles and may
//! call back into the device; no internal lock is ever held across those
//! invocations, so reentrant calls cannot deadlock and overlapping calls are
//! not serialized beyond data-race safety.

mod machine;
mod remote;

pub use machine::{Callback, Complete, DESTROYED_STATE};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::descriptor::{
    Descriptor, DestroyHook, FetchHook, MonitorOptions, TransitionSpec, UpdateHook,
};
use crate::error::{DeviceError, DeviceResult};
use crate::logging::{DeviceLog, LogLevel};
use crate::pubsub::PubSub;
use crate::registry::DeviceRegistry;
use crate::streams::{ConsumerStream, DeviceStream, StreamMode};

pub(crate) const STATE_STREAM: &str = "state";
pub(crate) const LOGS_STREAM: &str = "logs";

/// Globally unique device identifier, assigned at generation and immutable
/// for the instance's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Creates a new random device id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// External collaborators wired into every generated device.
#[derive(Clone)]
pub struct DeviceContext {
    /// Transport every stream, monitor, and log record publishes through.
    pub pubsub: Arc<dyn PubSub>,
    /// Registry used by `save` and the default update hook.
    pub registry: Arc<dyn DeviceRegistry>,
    /// Sink for structured log records.
    pub log: Arc<dyn DeviceLog>,
}

impl DeviceContext {
    /// Bundles the three collaborators.
    #[must_use]
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        registry: Arc<dyn DeviceRegistry>,
        log: Arc<dyn DeviceLog>,
    ) -> Self {
        Self {
            pubsub,
            registry,
            log,
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext").finish_non_exhaustive()
    }
}

type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// In-process notification hub. Listener invocation happens outside the
/// registration lock, so listeners may register others or call back into the
/// device.
#[derive(Default)]
struct Emitter {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl Emitter {
    fn on(&self, event: &str, listener: Listener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    fn emit(&self, event: &str, args: &[Value]) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            guard.get(event).cloned().unwrap_or_default()
        };
        for listener in listeners {
            listener(args);
        }
    }
}

struct DeviceInner {
    device_type: String,
    name: Option<String>,
    state: Option<String>,
    allowed: HashMap<String, Vec<String>>,
    transitions: BTreeMap<String, TransitionSpec>,
    monitors: Vec<String>,
    monitor_values: HashMap<String, Value>,
    properties: Map<String, Value>,
    streams: HashMap<String, DeviceStream>,
    fetch_hook: Option<FetchHook>,
    update_hook: Option<UpdateHook>,
    destroy_hook: Option<DestroyHook>,
}

struct DeviceShared {
    id: DeviceId,
    pubsub: Arc<dyn PubSub>,
    registry: Arc<dyn DeviceRegistry>,
    log: Arc<dyn DeviceLog>,
    emitter: Emitter,
    inner: Mutex<DeviceInner>,
}

/// Handle to a live device instance.
///
/// Cloning is cheap and every clone refers to the same instance. The handle
/// is the sole way to reach instance state: monitors, the free-form property
/// bag, and `state` are written through explicit setters that publish onto
/// their backing streams.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Generates a live device from a descriptor, wiring state, transitions,
    /// monitors, streams, and remote hooks. Intended to run exactly once per
    /// instance; the descriptor is consumed.
    #[must_use]
    pub fn generate(descriptor: Descriptor, context: DeviceContext) -> Self {
        let Descriptor {
            device_type,
            name,
            initial_state,
            transitions,
            allowed,
            monitors,
            monitor_options,
            streams,
            remote_fetch,
            remote_update,
            remote_destroy,
        } = descriptor;

        let has_transitions = !transitions.is_empty();
        let inner = DeviceInner {
            device_type,
            name,
            state: initial_state,
            allowed,
            transitions,
            monitors: Vec::new(),
            monitor_values: HashMap::new(),
            properties: Map::new(),
            streams: HashMap::new(),
            fetch_hook: remote_fetch,
            update_hook: remote_update,
            destroy_hook: remote_destroy,
        };

        let device = Self {
            shared: Arc::new(DeviceShared {
                id: DeviceId::new(),
                pubsub: context.pubsub,
                registry: context.registry,
                log: context.log,
                emitter: Emitter::default(),
                inner: Mutex::new(inner),
            }),
        };

        // The reserved state stream exists iff the type declares transitions.
        if has_transitions {
            device.create_stream(STATE_STREAM, StreamMode::Object);
        }

        for monitor in monitors {
            let options = monitor_options.get(&monitor).copied().unwrap_or_default();
            device.init_monitor(&monitor, options);
        }

        for (stream_name, spec) in streams {
            let mode = if spec.options.binary {
                StreamMode::Binary
            } else {
                StreamMode::Object
            };
            let stream = device.create_stream(&stream_name, mode);
            if spec.options.disable {
                stream.set_enabled(false);
            }
            (spec.setup)(&device, stream);
        }

        device
    }

    fn inner(&self) -> MutexGuard<'_, DeviceInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_stream(&self, name: &str, mode: StreamMode) -> DeviceStream {
        let topic = self.topic(name);
        let stream = DeviceStream::new(name, topic, mode, Arc::clone(&self.shared.pubsub));
        self.inner().streams.insert(name.to_string(), stream.clone());
        stream
    }

    fn init_monitor(&self, name: &str, options: MonitorOptions) {
        let stream = self.create_stream(name, StreamMode::Object);
        if options.disable {
            stream.set_enabled(false);
        }

        let mut inner = self.inner();
        let initial = inner.properties.remove(name).unwrap_or(Value::Null);
        inner.monitor_values.insert(name.to_string(), initial);
        inner.monitors.push(name.to_string());
    }

    /// Topic for one of this device's named channels.
    pub(crate) fn topic(&self, name: &str) -> String {
        format!("{}/{}/{}", self.inner().device_type, self.shared.id, name)
    }

    pub(crate) fn logger(&self) -> &Arc<dyn DeviceLog> {
        &self.shared.log
    }

    pub(crate) fn transport(&self) -> &Arc<dyn PubSub> {
        &self.shared.pubsub
    }

    /// The instance's unique identifier.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.shared.id
    }

    /// The device type tag.
    #[must_use]
    pub fn device_type(&self) -> String {
        self.inner().device_type.clone()
    }

    /// The descriptive name, if one was set.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner().name.clone()
    }

    /// The current FSM state, if the type declares one.
    #[must_use]
    pub fn state(&self) -> Option<String> {
        self.inner().state.clone()
    }

    /// Sets the current state and publishes it on the reserved state stream
    /// (when the type declares transitions).
    pub fn set_state(&self, state: impl Into<String>) {
        let state = state.into();
        let stream = {
            let mut inner = self.inner();
            inner.state = Some(state.clone());
            inner.streams.get(STATE_STREAM).cloned()
        };
        if let Some(stream) = stream {
            let _ = stream.write(Value::String(state));
        }
    }

    /// Assigns a free-form property on the instance.
    ///
    /// Plain properties are not observable; use monitors for values whose
    /// writes must be published.
    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.inner().properties.insert(key.into(), value);
    }

    /// Reads a free-form property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner().properties.get(key).cloned()
    }

    /// Removes a free-form property, returning its last value.
    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.inner().properties.remove(key)
    }

    /// Assigns a monitor, storing the value and publishing it on the
    /// monitor's stream.
    pub fn set_monitor(&self, name: &str, value: Value) -> DeviceResult<()> {
        let stream = {
            let mut inner = self.inner();
            if !inner.monitor_values.contains_key(name) {
                return Err(DeviceError::UnknownMonitor {
                    name: name.to_string(),
                });
            }
            inner.monitor_values.insert(name.to_string(), value.clone());
            inner.streams.get(name).cloned()
        };
        if let Some(stream) = stream {
            stream.write(value)?;
        }
        Ok(())
    }

    /// Reads a monitor's current value.
    #[must_use]
    pub fn monitor(&self, name: &str) -> Option<Value> {
        self.inner().monitor_values.get(name).cloned()
    }

    /// Declared monitor names, in declaration order.
    #[must_use]
    pub fn monitors(&self) -> Vec<String> {
        self.inner().monitors.clone()
    }

    /// The default property snapshot: type, name, every non-underscore
    /// property, and every monitor's current value. Identity and stream
    /// bookkeeping are excluded.
    #[must_use]
    pub fn raw_properties(&self) -> Map<String, Value> {
        let inner = self.inner();
        let mut properties = Map::new();

        properties.insert("type".to_string(), Value::String(inner.device_type.clone()));
        if let Some(name) = &inner.name {
            properties.insert("name".to_string(), Value::String(name.clone()));
        }

        for (key, value) in &inner.properties {
            if !key.starts_with('_') {
                properties.insert(key.clone(), value.clone());
            }
        }

        for monitor in &inner.monitors {
            if let Some(value) = inner.monitor_values.get(monitor) {
                properties.insert(monitor.clone(), value.clone());
            }
        }

        properties
    }

    /// The externally visible property snapshot.
    ///
    /// Runs the active fetch hook (default [`Self::raw_properties`]), strips
    /// leading-underscore keys from its result, then force-overwrites `id`,
    /// `type`, `name`, and, when defined, `state` with the instance's
    /// authoritative values. Identity can never be hidden or spoofed by a
    /// custom hook.
    #[must_use]
    pub fn properties(&self) -> Map<String, Value> {
        let fetch = self.inner().fetch_hook.clone();
        let mut properties = match fetch {
            Some(hook) => hook(self),
            None => self.raw_properties(),
        };

        properties.retain(|key, _| !key.starts_with('_'));
        properties.insert("id".to_string(), Value::String(self.shared.id.to_string()));

        let inner = self.inner();
        properties.insert("type".to_string(), Value::String(inner.device_type.clone()));
        properties.insert(
            "name".to_string(),
            inner.name.clone().map_or(Value::Null, Value::String),
        );
        if let Some(state) = &inner.state {
            properties.insert("state".to_string(), Value::String(state.clone()));
        }

        properties
    }

    /// Persists the device through the registry.
    pub fn save(&self) -> DeviceResult<()> {
        self.shared.registry.save(self)?;
        Ok(())
    }

    /// Builds a fresh read-only consumer for a named stream.
    ///
    /// Constructed on every call, never cached; the consumer observes only
    /// messages published after this point and shares the write side's
    /// framing.
    pub fn create_read_stream(&self, name: &str) -> DeviceResult<ConsumerStream> {
        let (topic, mode) = {
            let inner = self.inner();
            let stream = inner
                .streams
                .get(name)
                .ok_or_else(|| DeviceError::UnknownStream {
                    name: name.to_string(),
                })?;
            (stream.topic().to_string(), stream.mode())
        };
        let rx = self.shared.pubsub.subscribe(&topic);
        Ok(ConsumerStream::new(topic, mode, rx))
    }

    /// Resumes forwarding writes on a named stream.
    pub fn enable_stream(&self, name: &str) -> DeviceResult<()> {
        self.set_stream_enabled(name, true)
    }

    /// Stops forwarding writes on a named stream; writes are silently
    /// dropped until re-enabled.
    pub fn disable_stream(&self, name: &str) -> DeviceResult<()> {
        self.set_stream_enabled(name, false)
    }

    fn set_stream_enabled(&self, name: &str, enabled: bool) -> DeviceResult<()> {
        let inner = self.inner();
        let stream = inner
            .streams
            .get(name)
            .ok_or_else(|| DeviceError::UnknownStream {
                name: name.to_string(),
            })?;
        stream.set_enabled(enabled);
        Ok(())
    }

    /// Registers an in-process listener for a named notification.
    ///
    /// Successful transitions emit an event named after the transition,
    /// carrying the completion arguments; destruction emits `destroy`.
    pub fn on<F>(&self, event: &str, listener: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.shared.emitter.on(event, Arc::new(listener));
    }

    pub(crate) fn emit(&self, event: &str, args: &[Value]) {
        self.shared.emitter.emit(event, args);
    }

    fn log_subject(&self) -> String {
        let inner = self.inner();
        let base = inner
            .name
            .clone()
            .unwrap_or_else(|| inner.device_type.clone());
        if base.is_empty() {
            "device-log".to_string()
        } else {
            format!("{base}-log")
        }
    }

    /// Emits a plain log record through the device log sink.
    pub fn log(&self, message: &str, data: Option<&Value>) {
        self.shared
            .log
            .emit(LogLevel::Log, &self.log_subject(), message, data);
    }

    /// Emits an informational record through the device log sink.
    pub fn info(&self, message: &str, data: Option<&Value>) {
        self.shared
            .log
            .emit(LogLevel::Info, &self.log_subject(), message, data);
    }

    /// Emits a warning record through the device log sink.
    pub fn warn(&self, message: &str, data: Option<&Value>) {
        self.shared
            .log
            .emit(LogLevel::Warn, &self.log_subject(), message, data);
    }

    /// Emits an error record through the device log sink.
    pub fn error(&self, message: &str, data: Option<&Value>) {
        self.shared
            .log
            .emit(LogLevel::Error, &self.log_subject(), message, data);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("Device")
            .field("id", &self.shared.id)
            .field("type", &inner.device_type)
            .field("name", &inner.name)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}
