//! Delivery of bus events into script callbacks
//!
//! The bus never calls into scripts on its own. Pump commands drain whatever a
//! socket has queued and hand each event to [`CallbackBridge::deliver`], which
//! looks up the callback registered for that socket and invokes it through the
//! host's [`ScriptEngine`] on the calling thread.

use std::collections::HashMap;

use skein_bus::StopHandle;
use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};
use crate::lifecycle::{Owner, ScriptId};
use crate::resource::ResourceId;

/// Failure reported by the scripting engine while running a callback
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("no function named {0}")]
    UnknownHandler(String),

    #[error("script {0} is not loaded")]
    ScriptUnavailable(ScriptId),

    #[error("{0}")]
    Failed(String),
}

/// The script function a callback resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub owner: ScriptId,
    pub handler: String,
}

/// Argument record passed to a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRequest {
    /// A message arrived on a subscribed topic
    Topic { topic: String, payload: Vec<u8> },
    /// A request arrived at an advertised service; the response is sent back to the caller
    Service { service: String, payload: Vec<u8> },
}

/// Value a callback returns; ignored for topic messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackResponse {
    pub payload: Vec<u8>,
}

impl CallbackResponse {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Lets callback code end the blocking spin that delivered it
#[derive(Debug, Clone, Default)]
pub struct SpinControl {
    stop: StopHandle,
}

impl SpinControl {
    pub fn new(stop: StopHandle) -> Self {
        Self { stop }
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_stop_requested()
    }
}

/// The host's way of running a script function
///
/// Called synchronously from within a plugin command, so implementations must
/// not issue plugin commands themselves.
pub trait ScriptEngine {
    fn invoke(
        &mut self,
        target: &CallbackTarget,
        request: CallbackRequest,
        control: &SpinControl,
    ) -> Result<CallbackResponse, ScriptError>;
}

impl<E: ScriptEngine + ?Sized> ScriptEngine for Box<E> {
    fn invoke(
        &mut self,
        target: &CallbackTarget,
        request: CallbackRequest,
        control: &SpinControl,
    ) -> Result<CallbackResponse, ScriptError> {
        (**self).invoke(target, request, control)
    }
}

struct Registration {
    owner: Owner,
    handler: String,
}

/// Socket identity -> callback registration table
#[derive(Default)]
pub struct CallbackBridge {
    registrations: HashMap<ResourceId, Registration>,
}

impl CallbackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ResourceId, owner: Owner, handler: impl Into<String>) {
        let handler = handler.into();
        debug!(target: "bridge", "Registered {} for {:?} of {}", handler, id, owner);
        self.registrations.insert(id, Registration { owner, handler });
    }

    pub fn unregister(&mut self, id: ResourceId) -> bool {
        self.registrations.remove(&id).is_some()
    }

    /// Drop every registration made by `owner`
    pub fn unregister_owner(&mut self, owner: Owner) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|_, registration| registration.owner != owner);
        before - self.registrations.len()
    }

    pub fn handler_of(&self, id: ResourceId) -> Option<&str> {
        self.registrations.get(&id).map(|r| r.handler.as_str())
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Run the callback registered for `id`
    ///
    /// Returns the response payload for service requests and `None` for topic
    /// messages. Events for a socket with no registration are dropped.
    pub fn deliver<E: ScriptEngine + ?Sized>(
        &self,
        id: ResourceId,
        request: CallbackRequest,
        engine: &mut E,
        control: &SpinControl,
    ) -> PluginResult<Option<Vec<u8>>> {
        let Some(registration) = self.registrations.get(&id) else {
            warn!(target: "bridge", "Dropping event for {:?}, no callback registered", id);
            return Ok(None);
        };

        let target = CallbackTarget {
            owner: registration.owner.script,
            handler: registration.handler.clone(),
        };
        let is_service = matches!(request, CallbackRequest::Service { .. });

        debug!(target: "bridge", "Invoking {} in {}", target.handler, target.owner);
        let response = engine
            .invoke(&target, request, control)
            .map_err(|source| PluginError::Callback {
                handler: target.handler.clone(),
                source,
            })?;

        Ok(is_service.then_some(response.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Identity;
    use crate::resource::ResourceKind;

    #[derive(Default)]
    struct Echo {
        calls: Vec<(CallbackTarget, CallbackRequest)>,
    }

    impl ScriptEngine for Echo {
        fn invoke(
            &mut self,
            target: &CallbackTarget,
            request: CallbackRequest,
            control: &SpinControl,
        ) -> Result<CallbackResponse, ScriptError> {
            self.calls.push((target.clone(), request.clone()));
            match request {
                CallbackRequest::Topic { .. } => {
                    control.request_stop();
                    Ok(CallbackResponse::new("ignored"))
                }
                CallbackRequest::Service { payload, .. } if payload == b"fail" => {
                    Err(ScriptError::Failed("boom".to_string()))
                }
                CallbackRequest::Service { payload, .. } => {
                    let mut reply = payload;
                    reply.reverse();
                    Ok(CallbackResponse::new(reply))
                }
            }
        }
    }

    fn id(kind: ResourceKind, slot: u32) -> ResourceId {
        ResourceId {
            kind,
            identity: Identity::new(slot, 0),
        }
    }

    #[test]
    fn test_topic_delivery_reaches_registered_handler() {
        let mut bridge = CallbackBridge::new();
        let sub = id(ResourceKind::Subscriber, 0);
        bridge.register(sub, Owner::new(ScriptId(3), 1), "on_chatter");

        let mut engine = Echo::default();
        let control = SpinControl::default();
        let request = CallbackRequest::Topic {
            topic: "chatter".to_string(),
            payload: b"hi".to_vec(),
        };
        let out = bridge.deliver(sub, request.clone(), &mut engine, &control).unwrap();

        assert_eq!(out, None);
        assert!(control.is_stop_requested());
        assert_eq!(
            engine.calls,
            vec![(
                CallbackTarget {
                    owner: ScriptId(3),
                    handler: "on_chatter".to_string()
                },
                request
            )]
        );
    }

    #[test]
    fn test_service_delivery_returns_response() {
        let mut bridge = CallbackBridge::new();
        let srv = id(ResourceKind::ServiceServer, 2);
        bridge.register(srv, Owner::new(ScriptId(1), 0), "reverse");

        let request = CallbackRequest::Service {
            service: "rev".to_string(),
            payload: b"abc".to_vec(),
        };
        let out = bridge
            .deliver(srv, request, &mut Echo::default(), &SpinControl::default())
            .unwrap();
        assert_eq!(out, Some(b"cba".to_vec()));
    }

    #[test]
    fn test_unregistered_event_is_dropped() {
        let mut bridge = CallbackBridge::new();
        let sub = id(ResourceKind::Subscriber, 0);
        bridge.register(sub, Owner::new(ScriptId(1), 0), "cb");
        assert!(bridge.unregister(sub));
        assert!(!bridge.unregister(sub));

        let mut engine = Echo::default();
        let request = CallbackRequest::Topic {
            topic: "t".to_string(),
            payload: Vec::new(),
        };
        let out = bridge.deliver(sub, request, &mut engine, &SpinControl::default()).unwrap();
        assert_eq!(out, None);
        assert!(engine.calls.is_empty());
    }

    #[test]
    fn test_engine_failure_names_the_handler() {
        let mut bridge = CallbackBridge::new();
        let srv = id(ResourceKind::ServiceServer, 0);
        bridge.register(srv, Owner::new(ScriptId(1), 0), "explode");

        let request = CallbackRequest::Service {
            service: "s".to_string(),
            payload: b"fail".to_vec(),
        };
        let err = bridge
            .deliver(srv, request, &mut Echo::default(), &SpinControl::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::Callback { ref handler, .. } if handler == "explode"));
        assert_eq!(err.to_string(), "callback explode failed: boom");
    }

    #[test]
    fn test_unregister_owner_keeps_other_owners() {
        let mut bridge = CallbackBridge::new();
        let a = Owner::new(ScriptId(1), 0);
        let b = Owner::new(ScriptId(2), 0);
        bridge.register(id(ResourceKind::Subscriber, 0), a, "x");
        bridge.register(id(ResourceKind::Subscriber, 1), b, "y");
        bridge.register(id(ResourceKind::ServiceServer, 0), a, "z");

        assert_eq!(bridge.unregister_owner(a), 2);
        assert_eq!(bridge.len(), 1);
        assert_eq!(bridge.handler_of(id(ResourceKind::Subscriber, 1)), Some("y"));
    }
}
