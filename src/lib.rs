//! # zetta-device - IoT device runtime core
//!
//! Every physical or virtual device is modeled as an object with a declared
//! finite-state machine, named transitions guarded by the current state,
//! observable properties ("monitors"), named data streams, and a pluggable
//! contract for remote inspection, mutation, and destruction.
//!
//! ## Core Concepts
//!
//! - **Descriptor**: immutable specification of a device type, authored once
//! - **Device**: a live instance generated from a descriptor
//! - **Transition**: a named, guarded operation that may change state
//! - **Monitor**: an observable property whose every write is published
//! - **Stream**: a transport-backed channel for arbitrary ongoing data
//! - **Remote hooks**: fetch/update/destroy contract for external API layers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use zetta_device::{Descriptor, Device, DeviceContext, MemoryPubSub, MemoryRegistry, TracingLog};
//!
//! let descriptor = Descriptor::builder("lamp")
//!     .state("off")
//!     .when("off", ["turn-on"])
//!     .when("on", ["turn-off"])
//!     .map("turn-on", |device, _args, complete| {
//!         device.set_state("on");
//!         complete.done();
//!     })
//!     .map("turn-off", |device, _args, complete| {
//!         device.set_state("off");
//!         complete.done();
//!     })
//!     .monitor("brightness")
//!     .build();
//!
//! let context = DeviceContext::new(
//!     Arc::new(MemoryPubSub::default()),
//!     Arc::new(MemoryRegistry::new()),
//!     Arc::new(TracingLog),
//! );
//! let device = Device::generate(descriptor, context);
//!
//! device.call("turn-on", vec![], None);
//! device.set_monitor("brightness", json!(80))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod descriptor;
pub mod device;
pub mod error;
pub mod logging;
pub mod pubsub;
pub mod registry;
pub mod streams;

// Re-export primary types at crate root for convenience
pub use descriptor::{
    Descriptor, DescriptorBuilder, DestroyCallback, DestroyHook, FetchHook, Field, MonitorOptions,
    StreamOptions, StreamSetup, TransitionHandler, TransitionSpec, TransitionSummary,
    UpdateCallback, UpdateHook,
};
pub use device::{Callback, Complete, Device, DeviceContext, DeviceId, DESTROYED_STATE};
pub use error::{ActionError, DeviceError, DeviceResult};
pub use logging::{DeviceLog, LogEntry, LogLevel, MemoryLog, TracingLog};
pub use pubsub::{MemoryPubSub, Message, PubSub, PubSubConfig};
pub use registry::{DeviceRegistry, MemoryRegistry, RegistryError};
pub use streams::{ConsumerStream, DeviceStream, StreamMessage, StreamMode};
