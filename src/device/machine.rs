//! Transition dispatch: precondition checks, handler invocation, and
//! completion finalization.
//!
//! Dispatch never blocks on a handler. `call` validates the transition
//! against the current state, invokes the handler, and returns; finalization
//! happens purely through the injected [`Complete`], which the handler may
//! fire at any later point, or never. There is no timeout and no
//! cancellation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde_json::{json, Value};

use crate::descriptor::{TransitionHandler, TransitionSummary};
use crate::error::{DeviceError, DeviceResult};
use crate::logging::LogLevel;
use crate::pubsub::Message;

use super::{Device, LOGS_STREAM};

/// Terminal state entered after a successful destroy. Every subsequent
/// dispatch fails with `MachineDestroyed`; no allowed-set ever references
/// this state, so nothing is available from it.
pub const DESTROYED_STATE: &str = "zetta-device-destroy";

/// Completion callback for a dispatched transition.
///
/// Receives the handler's completion arguments on success, or the dispatch
/// or handler error on failure.
pub type Callback = Box<dyn FnOnce(DeviceResult<Vec<Value>>) + Send>;

/// Single-shot finisher injected into every transition handler.
///
/// [`Complete::succeed`] emits the internal event, publishes the structured
/// log record, and forwards the completion to the original caller, in that
/// order. [`Complete::fail`] short-circuits straight to the caller with no
/// event and no record. Dropping a `Complete` leaves the transition
/// unfinished, which the dispatcher permits: a handler may complete from any
/// later point in time, including never.
pub struct Complete {
    device: Device,
    transition: String,
    args: Vec<Value>,
    done: Callback,
}

impl Complete {
    /// Finishes the transition successfully with completion arguments.
    pub fn succeed(self, results: Vec<Value>) {
        let Self {
            device,
            transition,
            args,
            done,
        } = self;
        device.finish_transition(&transition, &args, &results);
        done(Ok(results));
    }

    /// Finishes the transition successfully with no completion arguments.
    pub fn done(self) {
        self.succeed(Vec::new());
    }

    /// Fails the transition. No event is emitted and no record published;
    /// the error goes straight to the caller's completion.
    pub fn fail(self, err: DeviceError) {
        (self.done)(Err(err));
    }

    /// Resolves from a result in one step.
    pub fn resolve(self, result: DeviceResult<Vec<Value>>) {
        match result {
            Ok(results) => self.succeed(results),
            Err(err) => self.fail(err),
        }
    }
}

impl fmt::Debug for Complete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Complete")
            .field("transition", &self.transition)
            .finish_non_exhaustive()
    }
}

enum Dispatch {
    Fail(DeviceError),
    Run(TransitionHandler),
}

impl Device {
    /// Dispatches a named transition with positional arguments.
    ///
    /// With `done: None`, a default completion is substituted that logs
    /// failures through the device log sink and swallows successes. All
    /// dispatch failures travel through the completion; this method never
    /// panics on a bad transition name.
    ///
    /// Preconditions, in order: the machine is not destroyed, the transition
    /// is declared, it has a bound handler, and it is allowed from the
    /// current state. On success the handler runs on the calling thread with
    /// a device handle, the arguments, and an injected [`Complete`]; the
    /// handler owns all further side effects, including the state change.
    pub fn call(&self, transition: &str, args: Vec<Value>, done: Option<Callback>) {
        let done = done.unwrap_or_else(|| self.default_completion(transition));

        let dispatch = {
            let inner = self.inner();
            if inner.state.as_deref() == Some(DESTROYED_STATE) {
                Dispatch::Fail(DeviceError::MachineDestroyed {
                    transition: transition.to_string(),
                })
            } else {
                match inner.transitions.get(transition) {
                    None => Dispatch::Fail(DeviceError::UndeclaredTransition {
                        transition: transition.to_string(),
                    }),
                    Some(spec) => match spec.handler.clone() {
                        None => Dispatch::Fail(DeviceError::UnimplementedTransition {
                            transition: transition.to_string(),
                        }),
                        Some(handler) => {
                            let state = inner.state.clone().unwrap_or_default();
                            let legal = inner
                                .state
                                .as_ref()
                                .and_then(|s| inner.allowed.get(s))
                                .is_some_and(|allow| allow.iter().any(|t| t == transition));
                            if legal {
                                Dispatch::Run(handler)
                            } else {
                                Dispatch::Fail(DeviceError::IllegalTransition {
                                    transition: transition.to_string(),
                                    state,
                                })
                            }
                        }
                    },
                }
            }
        };

        match dispatch {
            Dispatch::Fail(err) => done(Err(err)),
            Dispatch::Run(handler) => {
                let complete = Complete {
                    device: self.clone(),
                    transition: transition.to_string(),
                    args: args.clone(),
                    done,
                };
                handler(self, args, complete);
            }
        }
    }

    fn default_completion(&self, transition: &str) -> Callback {
        let device = self.clone();
        let transition = transition.to_string();
        Box::new(move |result| {
            if let Err(err) = result {
                let message = format!(
                    "Error calling {} transition {} ({})",
                    device.device_type(),
                    transition,
                    err
                );
                device.logger().emit(LogLevel::Log, "device", &message, None);
            }
        })
    }

    /// Whether the transition is legal from the current state, independent
    /// of whether it exists. A state with no allowed-set makes every
    /// transition unavailable.
    #[must_use]
    pub fn available(&self, transition: &str) -> bool {
        let inner = self.inner();
        inner
            .state
            .as_ref()
            .and_then(|state| inner.allowed.get(state))
            .is_some_and(|allow| allow.iter().any(|t| t == transition))
    }

    /// The subset of the transition table legal in the current state,
    /// projected without handlers. Embedded in every transition log record.
    #[must_use]
    pub fn transitions_available(&self) -> BTreeMap<String, TransitionSummary> {
        let inner = self.inner();
        let Some(allow) = inner.state.as_ref().and_then(|state| inner.allowed.get(state)) else {
            return BTreeMap::new();
        };

        inner
            .transitions
            .iter()
            .filter(|(name, _)| allow.iter().any(|t| t == *name))
            .map(|(name, spec)| {
                (
                    name.clone(),
                    TransitionSummary {
                        fields: spec.fields.clone(),
                    },
                )
            })
            .collect()
    }

    /// Finalizes a successful transition: internal event first, then the
    /// published log record, so both are observable before the caller's
    /// completion runs.
    pub(crate) fn finish_transition(&self, transition: &str, args: &[Value], results: &[Value]) {
        self.emit(transition, results);

        let input = self.input_fields(transition, args);
        let record = self.send_log_event(transition, input);

        let message = format!("{} transition {}", self.device_type(), transition);
        self.logger()
            .emit(LogLevel::Log, "device", &message, Some(&record));
    }

    /// Builds the structured log record and publishes it on the device's
    /// logs topic. Returns the record for forwarding to the log sink.
    pub(crate) fn send_log_event(&self, transition: &str, input: Vec<Value>) -> Value {
        let topic = self.topic(LOGS_STREAM);
        let record = json!({
            "topic": topic,
            "timestamp": Utc::now().timestamp_millis(),
            "transition": transition,
            "input": input,
            "properties": self.properties(),
            "transitions": self.transitions_available(),
        });
        self.transport().publish(&topic, Message::Object(record.clone()));
        record
    }

    /// Pairs the transition's declared fields positionally with the original
    /// call arguments. Missing arguments pair with null.
    fn input_fields(&self, transition: &str, args: &[Value]) -> Vec<Value> {
        let inner = self.inner();
        let Some(spec) = inner.transitions.get(transition) else {
            return Vec::new();
        };
        spec.fields
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                json!({
                    "name": field.name,
                    "value": args.get(idx).cloned().unwrap_or(Value::Null),
                })
            })
            .collect()
    }
}
