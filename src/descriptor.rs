//! Device type descriptors and their fluent builder.
//!
//! A [`Descriptor`] is the immutable specification of a device type: name,
//! type tag, initial state, the allowed-transition table, transition handlers
//! with their declared input fields, monitors, stream definitions, and
//! optional remote hook overrides. It is authored once per device type and
//! consumed exactly once by [`Device::generate`](crate::Device::generate).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::{Complete, Device};
use crate::error::DeviceResult;
use crate::streams::DeviceStream;

/// Transition handler bound to a device type.
///
/// Receives a handle to the device, the positional call arguments, and the
/// injected completion. The handler owns any side effects on state and
/// decides when, and whether, the transition completes.
pub type TransitionHandler = Arc<dyn Fn(&Device, Vec<Value>, Complete) + Send + Sync>;

/// Stream setup function, invoked once at generation time with the write
/// side of the declared stream.
pub type StreamSetup = Arc<dyn Fn(&Device, DeviceStream) + Send + Sync>;

/// Remote fetch hook: produces the externally visible property snapshot.
pub type FetchHook = Arc<dyn Fn(&Device) -> Map<String, Value> + Send + Sync>;

/// Remote update hook: applies a filtered key/value input to the device.
pub type UpdateHook = Arc<dyn Fn(&Device, Map<String, Value>, UpdateCallback) + Send + Sync>;

/// Remote destroy hook: performs cleanup, then signals whether the device
/// was destroyed.
pub type DestroyHook = Arc<dyn Fn(&Device, DestroyCallback) + Send + Sync>;

/// Completion channel for a remote update.
pub type UpdateCallback = Box<dyn FnOnce(DeviceResult<()>) + Send>;

/// Completion channel for a remote destroy, carrying the destroyed flag.
pub type DestroyCallback = Box<dyn FnOnce(DeviceResult<bool>) + Send>;

/// Declared input field of a transition.
///
/// Fields are paired positionally with call arguments in transition log
/// records and surfaced to API consumers through the available-transition
/// projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Free-form type tag for API consumers ("number", "string", ...).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Field {
    /// An untyped field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }

    /// A field with a type tag.
    #[must_use]
    pub fn typed(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
        }
    }
}

/// A declared transition: optional bound handler plus declared input fields.
#[derive(Clone)]
pub struct TransitionSpec {
    /// Handler invoked on dispatch; a declared transition without one fails
    /// with `UnimplementedTransition`.
    pub handler: Option<TransitionHandler>,
    /// Declared input fields, in positional order.
    pub fields: Vec<Field>,
}

impl fmt::Debug for TransitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionSpec")
            .field("handler", &self.handler.is_some())
            .field("fields", &self.fields)
            .finish()
    }
}

/// Serializable projection of a transition, embedded in log records and
/// returned by the available-transition query. Handlers are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSummary {
    /// Declared input fields, in positional order.
    pub fields: Vec<Field>,
}

/// Per-monitor creation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Create the monitor with its outbound stream disabled.
    pub disable: bool,
}

/// Per-stream creation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Use raw binary framing instead of structured objects.
    pub binary: bool,
    /// Create the stream disabled.
    pub disable: bool,
}

/// A declared stream: setup function plus fixed creation options.
#[derive(Clone)]
pub struct StreamSpec {
    /// Invoked once at generation with the write side of the stream.
    pub setup: StreamSetup,
    /// Framing and enablement options, fixed at creation.
    pub options: StreamOptions,
}

impl fmt::Debug for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSpec")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Immutable specification of a device type.
pub struct Descriptor {
    pub(crate) device_type: String,
    pub(crate) name: Option<String>,
    pub(crate) initial_state: Option<String>,
    pub(crate) transitions: BTreeMap<String, TransitionSpec>,
    pub(crate) allowed: HashMap<String, Vec<String>>,
    pub(crate) monitors: Vec<String>,
    pub(crate) monitor_options: HashMap<String, MonitorOptions>,
    pub(crate) streams: BTreeMap<String, StreamSpec>,
    pub(crate) remote_fetch: Option<FetchHook>,
    pub(crate) remote_update: Option<UpdateHook>,
    pub(crate) remote_destroy: Option<DestroyHook>,
}

impl Descriptor {
    /// Starts a builder for the given device type tag.
    #[must_use]
    pub fn builder(device_type: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            descriptor: Descriptor {
                device_type: device_type.into(),
                name: None,
                initial_state: None,
                transitions: BTreeMap::new(),
                allowed: HashMap::new(),
                monitors: Vec::new(),
                monitor_options: HashMap::new(),
                streams: BTreeMap::new(),
                remote_fetch: None,
                remote_update: None,
                remote_destroy: None,
            },
        }
    }

    /// The device type tag.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// The descriptive name, if one was set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The initial state, if one was set.
    #[must_use]
    pub fn initial_state(&self) -> Option<&str> {
        self.initial_state.as_deref()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("device_type", &self.device_type)
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("transitions", &self.transitions)
            .field("allowed", &self.allowed)
            .field("monitors", &self.monitors)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Descriptor`].
#[derive(Debug)]
pub struct DescriptorBuilder {
    descriptor: Descriptor,
}

impl DescriptorBuilder {
    /// Sets the descriptive device name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = Some(name.into());
        self
    }

    /// Sets the initial state.
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.descriptor.initial_state = Some(state.into());
        self
    }

    /// Declares which transitions are legal while in `state`.
    #[must_use]
    pub fn when<I, S>(mut self, state: impl Into<String>, allow: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor
            .allowed
            .insert(state.into(), allow.into_iter().map(Into::into).collect());
        self
    }

    /// Maps a transition name to a handler with no declared fields.
    #[must_use]
    pub fn map<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Device, Vec<Value>, Complete) + Send + Sync + 'static,
    {
        self.map_fields(name, handler, Vec::new())
    }

    /// Maps a transition name to a handler with declared input fields.
    #[must_use]
    pub fn map_fields<F>(mut self, name: impl Into<String>, handler: F, fields: Vec<Field>) -> Self
    where
        F: Fn(&Device, Vec<Value>, Complete) + Send + Sync + 'static,
    {
        self.descriptor.transitions.insert(
            name.into(),
            TransitionSpec {
                handler: Some(Arc::new(handler)),
                fields,
            },
        );
        self
    }

    /// Declares a transition with no handler bound. Dispatching it fails
    /// with `UnimplementedTransition` until a handler is mapped.
    #[must_use]
    pub fn declare(mut self, name: impl Into<String>, fields: Vec<Field>) -> Self {
        self.descriptor.transitions.insert(
            name.into(),
            TransitionSpec {
                handler: None,
                fields,
            },
        );
        self
    }

    /// Declares an observable monitor property.
    #[must_use]
    pub fn monitor(self, name: impl Into<String>) -> Self {
        self.monitor_with(name, MonitorOptions::default())
    }

    /// Declares a monitor with creation options.
    #[must_use]
    pub fn monitor_with(mut self, name: impl Into<String>, options: MonitorOptions) -> Self {
        let name = name.into();
        self.descriptor.monitor_options.insert(name.clone(), options);
        self.descriptor.monitors.push(name);
        self
    }

    /// Declares a named stream with default (object-framed) options.
    #[must_use]
    pub fn stream<F>(self, name: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&Device, DeviceStream) + Send + Sync + 'static,
    {
        self.stream_with(name, setup, StreamOptions::default())
    }

    /// Declares a named stream with explicit options.
    #[must_use]
    pub fn stream_with<F>(
        mut self,
        name: impl Into<String>,
        setup: F,
        options: StreamOptions,
    ) -> Self
    where
        F: Fn(&Device, DeviceStream) + Send + Sync + 'static,
    {
        self.descriptor.streams.insert(
            name.into(),
            StreamSpec {
                setup: Arc::new(setup),
                options,
            },
        );
        self
    }

    /// Overrides the remote fetch hook.
    #[must_use]
    pub fn remote_fetch<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Device) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.descriptor.remote_fetch = Some(Arc::new(hook));
        self
    }

    /// Overrides the remote update hook. The hook receives input already
    /// stripped of reserved and underscore-prefixed keys.
    #[must_use]
    pub fn remote_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Device, Map<String, Value>, UpdateCallback) + Send + Sync + 'static,
    {
        self.descriptor.remote_update = Some(Arc::new(hook));
        self
    }

    /// Overrides the remote destroy hook.
    #[must_use]
    pub fn remote_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Device, DestroyCallback) + Send + Sync + 'static,
    {
        self.descriptor.remote_destroy = Some(Arc::new(hook));
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> Descriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_accumulates_machine_shape() {
        let descriptor = Descriptor::builder("photocell")
            .name("hallway sensor")
            .state("ready")
            .when("ready", ["sample"])
            .map("sample", |_, _, complete| complete.done())
            .monitor("intensity")
            .build();

        assert_eq!(descriptor.device_type(), "photocell");
        assert_eq!(descriptor.name(), Some("hallway sensor"));
        assert_eq!(descriptor.initial_state(), Some("ready"));
        assert_eq!(descriptor.allowed["ready"], vec!["sample".to_string()]);
        assert!(descriptor.transitions["sample"].handler.is_some());
        assert_eq!(descriptor.monitors, vec!["intensity".to_string()]);
    }

    #[test]
    fn declare_leaves_handler_unbound() {
        let descriptor = Descriptor::builder("lamp")
            .declare("calibrate", vec![Field::new("offset")])
            .build();

        let spec = &descriptor.transitions["calibrate"];
        assert!(spec.handler.is_none());
        assert_eq!(spec.fields.len(), 1);
    }

    #[test]
    fn monitor_options_are_recorded_per_name() {
        let descriptor = Descriptor::builder("lamp")
            .monitor("brightness")
            .monitor_with("hue", MonitorOptions { disable: true })
            .build();

        assert_eq!(descriptor.monitors.len(), 2);
        assert!(!descriptor.monitor_options["brightness"].disable);
        assert!(descriptor.monitor_options["hue"].disable);
    }

    #[test]
    fn field_serializes_type_tag_under_type_key() {
        let field = Field::typed("brightness", "number");
        assert_eq!(
            serde_json::to_value(&field).unwrap(),
            json!({ "name": "brightness", "type": "number" })
        );

        let untyped = Field::new("raw");
        assert_eq!(serde_json::to_value(&untyped).unwrap(), json!({ "name": "raw" }));
    }

    #[test]
    fn transition_summary_round_trips() {
        let summary = TransitionSummary {
            fields: vec![Field::typed("level", "number")],
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value, json!({ "fields": [{ "name": "level", "type": "number" }] }));
        let back: TransitionSummary = serde_json::from_value(value).unwrap();
        assert_eq!(back, summary);
    }
}
