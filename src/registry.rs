//! Device registry interface.
//!
//! The registry is an external collaborator; the runtime only needs `save`,
//! used by the default remote update hook and the explicit save operation on
//! every device. A thread-safe in-memory implementation backs tests and
//! embedded use.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::device::{Device, DeviceId};

/// Errors surfaced by registry backends.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Backend failure.
    #[error("Registry backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Registry serialization error: {0}")]
    Serialization(String),
}

/// Persistence contract used by [`Device::save`] and the default update hook.
///
/// Implementations are shared from arbitrary call sites and must be
/// individually safe for concurrent use; the runtime never locks around them.
pub trait DeviceRegistry: Send + Sync {
    /// Persist the device's current projected properties.
    fn save(&self, device: &Device) -> Result<(), RegistryError>;
}

/// Thread-safe in-memory registry.
///
/// Stores the projected property snapshot keyed by device id. Intended for
/// tests and embedded single-process use.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: RwLock<HashMap<DeviceId, Map<String, Value>>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last saved snapshot for a device, if any.
    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<Map<String, Value>> {
        self.records.read().ok()?.get(&id).cloned()
    }

    /// Number of saved devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map(|g| g.len()).unwrap_or(0)
    }

    /// True when nothing has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn save(&self, device: &Device) -> Result<(), RegistryError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RegistryError::Backend("poisoned lock: registry".to_string()))?;
        records.insert(device.id(), device.properties());
        Ok(())
    }
}
