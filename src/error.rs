//! Error types for the device runtime.
//!
//! All errors are strongly typed using thiserror. Dispatch-level failures are
//! delivered through completion callbacks, never panicked, so the taxonomy
//! here is what API layers pattern match on.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::registry::RegistryError;

/// Status-coded error raised by transition handler logic for surfacing
/// through an API layer.
///
/// Carries a numeric status code (default 500) and an arbitrary object-typed
/// property bag attached to the failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionError {
    /// Numeric status code surfaced to API consumers.
    pub status: u16,
    /// Arbitrary properties describing the failure.
    pub properties: Map<String, Value>,
}

impl ActionError {
    /// Status used when a handler gives no explicit code.
    pub const DEFAULT_STATUS: u16 = 500;

    /// Creates an action error with the given status and no properties.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            properties: Map::new(),
        }
    }

    /// Attaches a property bag.
    #[must_use]
    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    /// Builds an action error from a dynamic payload.
    ///
    /// The payload must be a JSON object. Anything else is a construction
    /// error: a programmer mistake, not a runtime condition.
    pub fn from_payload(status: u16, payload: Value) -> Result<Self, DeviceError> {
        match payload {
            Value::Object(properties) => Ok(Self { status, properties }),
            other => Err(DeviceError::Construction {
                reason: format!("action error properties must be an object, got {other:?}"),
            }),
        }
    }
}

impl Default for ActionError {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STATUS)
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action failed with status {}", self.status)
    }
}

impl std::error::Error for ActionError {}

/// Top-level error type for the device runtime.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Transition attempted after the device was destroyed.
    #[error("Machine destroyed. Cannot use transition {transition}")]
    MachineDestroyed {
        /// Name the caller attempted to dispatch.
        transition: String,
    },

    /// Transition name is not in the transition table.
    #[error("Machine cannot use transition {transition} not defined")]
    UndeclaredTransition {
        /// Name the caller attempted to dispatch.
        transition: String,
    },

    /// Transition is declared but has no handler bound.
    #[error("Machine does not implement transition {transition}")]
    UnimplementedTransition {
        /// Name the caller attempted to dispatch.
        transition: String,
    },

    /// Transition exists but is not allowed from the current state.
    #[error("Machine cannot use transition {transition} while in {state}")]
    IllegalTransition {
        /// Name the caller attempted to dispatch.
        transition: String,
        /// State the machine was in at dispatch time.
        state: String,
    },

    /// The handler signaled failure through its completion callback.
    #[error("Transition handler failed: {message}")]
    Handler {
        /// Handler-supplied failure description.
        message: String,
    },

    /// Status-coded failure raised by handler logic.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Invalid arguments to error construction.
    #[error("Invalid error construction: {reason}")]
    Construction {
        /// What made the construction invalid.
        reason: String,
    },

    /// Named stream does not exist on this device.
    #[error("Stream does not exist: {name}")]
    UnknownStream {
        /// Requested stream name.
        name: String,
    },

    /// Named monitor does not exist on this device.
    #[error("Monitor does not exist: {name}")]
    UnknownMonitor {
        /// Requested monitor name.
        name: String,
    },

    /// Write framing does not match the stream's declared framing.
    #[error("Stream {name} requires {expected} framing")]
    StreamMode {
        /// Stream the write was attempted on.
        name: String,
        /// Framing the stream was created with.
        expected: &'static str,
    },

    /// A channel endpoint disconnected.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// Which channel disconnected.
        path: String,
    },

    /// A blocking receive timed out.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// How long the caller waited.
        duration_ms: u64,
    },

    /// Registry failure while persisting the device.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl DeviceError {
    /// Creates an opaque handler failure.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Returns true if this error came from a dispatch precondition.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(
            self,
            Self::MachineDestroyed { .. }
                | Self::UndeclaredTransition { .. }
                | Self::UnimplementedTransition { .. }
                | Self::IllegalTransition { .. }
        )
    }

    /// Status code an API layer should surface for this error.
    ///
    /// Action errors carry their own code; everything else defaults to 500.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Action(err) => err.status,
            _ => ActionError::DEFAULT_STATUS,
        }
    }
}

/// Result type alias for device runtime operations.
pub type DeviceResult<T> = Result<T, DeviceError>;
