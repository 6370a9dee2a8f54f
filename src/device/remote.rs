//! Remote contract: fetch, update, and destroy hooks plus their
//! caller-facing entry points.
//!
//! Each operation is a pluggable function value on the instance, defaulted
//! at generation and replaceable exactly once by a descriptor override. The
//! entry points here are what an external API layer invokes; input filtering
//! runs in the entry point so it applies regardless of which hook is active.

use serde_json::{Map, Value};

use crate::descriptor::{DestroyCallback, UpdateCallback};
use crate::error::DeviceResult;

use super::{machine::DESTROYED_STATE, Device};

/// Keys remote updates may never assign or delete.
pub(crate) const RESERVED_KEYS: &[&str] = &["id", "type", "state", "streams"];

/// Log event emitted after every successful remote update.
const PROPERTIES_UPDATE_EVENT: &str = "zetta-properties-update";

/// Internal notification fired when the device is destroyed.
const DESTROY_EVENT: &str = "destroy";

fn is_update_filtered(key: &str) -> bool {
    key.starts_with('_') || RESERVED_KEYS.contains(&key)
}

impl Device {
    /// Caller-facing remote update entry point.
    ///
    /// Strips reserved and underscore-prefixed keys from the untrusted
    /// input, delegates to whichever update hook is active, and on success
    /// publishes a `zetta-properties-update` log event (with no
    /// transition-specific input payload) before completing.
    pub fn update(&self, mut input: Map<String, Value>, done: UpdateCallback) {
        input.retain(|key, _| !is_update_filtered(key));

        let hook = self.inner().update_hook.clone();
        let device = self.clone();
        let finish: UpdateCallback = Box::new(move |result: DeviceResult<()>| match result {
            Ok(()) => {
                device.send_log_event(PROPERTIES_UPDATE_EVENT, Vec::new());
                done(Ok(()));
            }
            Err(err) => done(Err(err)),
        });

        match hook {
            Some(hook) => hook(self, input, finish),
            None => self.default_remote_update(input, finish),
        }
    }

    /// Default update hook: full-replace merge semantics.
    ///
    /// Keys matching monitor names are rejected; every remaining input key
    /// is assigned onto the instance; every existing non-reserved property
    /// absent from the input is deleted (the descriptive name included);
    /// then the device is persisted through the registry.
    fn default_remote_update(&self, input: Map<String, Value>, done: UpdateCallback) {
        {
            let mut inner = self.inner();
            let monitors = inner.monitors.clone();

            for (key, value) in &input {
                if monitors.iter().any(|m| m == key) {
                    continue;
                }
                if key == "name" {
                    inner.name = value.as_str().map(ToString::to_string);
                } else {
                    inner.properties.insert(key.clone(), value.clone());
                }
            }

            let stale: Vec<String> = inner
                .properties
                .keys()
                .filter(|key| {
                    !input.contains_key(*key)
                        && !monitors.contains(key)
                        && !RESERVED_KEYS.contains(&key.as_str())
                })
                .cloned()
                .collect();
            for key in stale {
                inner.properties.remove(&key);
            }

            if !input.contains_key("name") {
                inner.name = None;
            }
        }

        done(self.save());
    }

    /// Destroy entry point.
    ///
    /// Runs the active destroy hook (default: signal success immediately
    /// with a destroyed flag of true). A true flag publishes the terminal
    /// state, fires the internal `destroy` notification, and leaves the
    /// machine rejecting every further transition.
    pub fn destroy(&self, done: DestroyCallback) {
        let hook = self.inner().destroy_hook.clone();
        let device = self.clone();
        let finish: DestroyCallback = Box::new(move |result: DeviceResult<bool>| match result {
            Ok(true) => {
                device.mark_destroyed();
                done(Ok(true));
            }
            other => done(other),
        });

        match hook {
            Some(hook) => hook(self, finish),
            None => finish(Ok(true)),
        }
    }

    fn mark_destroyed(&self) {
        self.set_state(DESTROYED_STATE);
        self.emit(DESTROY_EVENT, &[]);
    }
}
