//! Pumping: moving queued bus events into script callbacks
//!
//! Events are only ever delivered from here, on the thread running the
//! command, so callbacks never race with other commands.

use std::thread;

use skein_bus::Responder;
use tracing::{debug, error, info, warn};

use super::Plugin;
use crate::bridge::{CallbackRequest, ScriptEngine, SpinControl};
use crate::commands::Reply;
use crate::error::{PluginError, PluginResult};
use crate::resolver::{resolve_socket, sockets_of, SocketRef};
use crate::resource::ResourceId;

/// An event drained from a socket, waiting for its callback
enum Inbound {
    Message {
        id: ResourceId,
        topic: String,
        payload: Vec<u8>,
    },
    Request {
        id: ResourceId,
        service: String,
        payload: Vec<u8>,
        responder: Responder,
    },
}

/// Take everything `socket` has queued
fn gather(socket: SocketRef<'_>) -> PluginResult<Vec<Inbound>> {
    let inbound = match socket {
        SocketRef::Subscriber(id, subscriber) => {
            let topic = subscriber.topic().to_string();
            subscriber
                .drain()?
                .into_iter()
                .map(|payload| Inbound::Message {
                    id,
                    topic: topic.clone(),
                    payload,
                })
                .collect()
        }
        SocketRef::ServiceServer(id, server) => {
            let service = server.service().to_string();
            server
                .drain()?
                .into_iter()
                .map(|request| Inbound::Request {
                    id,
                    service: service.clone(),
                    payload: request.payload,
                    responder: request.responder,
                })
                .collect()
        }
        // Publishers and clients have nothing to deliver
        SocketRef::Publisher(..) | SocketRef::ServiceClient(..) => Vec::new(),
    };
    Ok(inbound)
}

impl<E: ScriptEngine> Plugin<E> {
    /// Pump the node until a callback requests a stop
    ///
    /// Only requests made while this spin runs count; one left over from an
    /// earlier `spinOnce` or `socketSpinOnce` is discarded.
    pub(super) fn spin(&mut self, handle: &str) -> PluginResult<Reply> {
        let stop = self.registries.nodes.get(handle)?.stop_handle();
        stop.reset();
        let interval = self.config.spin_interval();
        info!(target: "plugin", "Spinning {} every {:?}", handle, interval);

        let result = loop {
            if let Err(e) = self.pump_node(handle) {
                break Err(e);
            }
            if stop.is_stop_requested() {
                break Ok(Reply::Done);
            }
            thread::sleep(interval);
        };

        stop.reset();
        info!(target: "plugin", "Stopped spinning {}", handle);
        result
    }

    pub(super) fn spin_once(&mut self, handle: &str) -> PluginResult<Reply> {
        self.pump_node(handle)?;
        Ok(Reply::Done)
    }

    /// Deliver whatever one socket has queued
    pub(super) fn socket_spin_once(&mut self, handle: &str) -> PluginResult<Reply> {
        let socket = resolve_socket(&mut self.registries, handle)?;
        let node = socket.node_id();
        let inbound = gather(socket)?;

        let control = self
            .registries
            .stop_handle_of(node)
            .map(SpinControl::new)
            .unwrap_or_default();
        self.dispatch(inbound, &control)?;
        Ok(Reply::Done)
    }

    /// One pass over every initialized socket on the node
    fn pump_node(&mut self, handle: &str) -> PluginResult<()> {
        let node = self.registries.nodes.get_mut(handle)?;
        node.spin_once()?;
        let (id, control) = (node.id(), SpinControl::new(node.stop_handle()));

        let mut inbound = Vec::new();
        for mut socket in sockets_of(&mut self.registries, id) {
            if socket.as_socket().is_initialized() {
                inbound.extend(gather(socket)?);
            }
        }
        self.dispatch(inbound, &control)
    }

    /// Hand each event to its callback
    ///
    /// Every event is delivered even if an earlier callback failed; the first
    /// failure is returned once the batch is done. A request whose callback
    /// failed or is not registered gets no reply, which its caller sees as
    /// a transport error.
    fn dispatch(&mut self, inbound: Vec<Inbound>, control: &SpinControl) -> PluginResult<()> {
        if !inbound.is_empty() {
            debug!(target: "plugin", "Delivering {} event(s)", inbound.len());
        }

        let mut first_error: Option<PluginError> = None;
        for event in inbound {
            let outcome = match event {
                Inbound::Message { id, topic, payload } => self
                    .bridge
                    .deliver(id, CallbackRequest::Topic { topic, payload }, &mut self.engine, control)
                    .map(|_| ()),
                Inbound::Request {
                    id,
                    service,
                    payload,
                    responder,
                } => {
                    let request = CallbackRequest::Service {
                        service: service.clone(),
                        payload,
                    };
                    self.bridge
                        .deliver(id, request, &mut self.engine, control)
                        .map(|reply| {
                            if let Some(reply) = reply {
                                if let Err(e) = responder.respond(&reply) {
                                    warn!(target: "plugin", "Reply on {} not delivered: {}", service, e);
                                }
                            }
                        })
                }
            };

            if let Err(e) = outcome {
                error!(target: "plugin", "{}", e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
