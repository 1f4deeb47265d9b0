use std::time::Duration;

use skein_bus::{
    Node, NodeState, Publisher, ServiceClient, ServiceServer, Socket, SocketOptions, Subscriber,
};
use tracing::{debug, info, warn};

use super::Plugin;
use crate::bridge::{CallbackBridge, ScriptEngine};
use crate::commands::Reply;
use crate::error::{PluginError, PluginResult};
use crate::lifecycle::ScriptId;
use crate::options::SocketOption;
use crate::registry::Registry;
use crate::resolver::{resolve_socket, sockets_of};
use crate::resource::Resource;

/// Give a fresh socket the configured defaults and join it to the bus if its
/// node already has
fn prepare<S: Socket>(socket: &mut S, defaults: &SocketOptions, node: &Node) -> PluginResult<()> {
    *socket.options_mut() = defaults.clone();
    if node.state() == NodeState::Ready {
        socket.init()?;
    }
    Ok(())
}

/// Remove a socket, tear it down and forget its callback
fn destroy_socket<T: Resource>(
    registry: &mut Registry<T>,
    bridge: &mut CallbackBridge,
    handle: &str,
) -> PluginResult<Reply> {
    let id = registry.resolve(handle)?;
    registry.remove(handle)?.release();
    bridge.unregister(id);
    debug!(target: "plugin", "Destroyed {} {}", T::KIND, handle);
    Ok(Reply::Done)
}

impl<E: ScriptEngine> Plugin<E> {
    pub(super) fn create_node(&mut self, script: ScriptId, name: &str) -> PluginResult<Reply> {
        let owner = self.contexts.current(script);
        let node = Node::new(&self.broker, name)?;
        let handle = self.registries.nodes.add(node, owner);
        Ok(Reply::Handle(handle))
    }

    /// Join the bus, then bring up every socket already created on the node
    ///
    /// A socket that fails to come up does not hold back the others; the node
    /// stays up and the first failure is returned once all were tried.
    pub(super) fn init_node(&mut self, handle: &str) -> PluginResult<Reply> {
        let node = self.registries.nodes.get_mut(handle)?;
        node.init()?;
        let (id, name) = (node.id(), node.name().to_string());

        let mut first_error: Option<PluginError> = None;
        for socket in sockets_of(&mut self.registries, id) {
            let socket = socket.into_socket();
            if socket.is_initialized() {
                continue;
            }
            if let Err(e) = socket.init() {
                warn!(target: "plugin", "{} {} on {} not initialized: {}", socket.kind(), socket.name(), handle, e);
                first_error.get_or_insert(e.into());
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        info!(target: "plugin", "Node {} is up as '{}'", handle, name);
        Ok(Reply::Name(name))
    }

    /// Leave the bus; sockets on the node are cleaned up first
    pub(super) fn cleanup_node(&mut self, handle: &str) -> PluginResult<Reply> {
        let id = self.registries.nodes.get(handle)?.id();
        for socket in sockets_of(&mut self.registries, id) {
            socket.into_socket().cleanup();
        }
        self.registries.nodes.get_mut(handle)?.cleanup();
        Ok(Reply::Done)
    }

    /// Destroy the node along with every socket created on it
    pub(super) fn destroy_node(&mut self, handle: &str) -> PluginResult<Reply> {
        let id = self.registries.nodes.get(handle)?.id();
        for socket in self.registries.release_sockets_of(id) {
            self.bridge.unregister(socket);
        }
        self.registries.nodes.remove(handle)?.release();
        debug!(target: "plugin", "Destroyed node {}", handle);
        Ok(Reply::Done)
    }

    pub(super) fn create_publisher(
        &mut self,
        script: ScriptId,
        node: &str,
        topic: &str,
    ) -> PluginResult<Reply> {
        let owner = self.contexts.current(script);
        let node = self.registries.nodes.get(node)?;
        let mut publisher = Publisher::new(node, topic);
        prepare(&mut publisher, &self.config.socket, node)?;
        Ok(Reply::Handle(self.registries.publishers.add(publisher, owner)))
    }

    pub(super) fn publish(&mut self, handle: &str, payload: &[u8]) -> PluginResult<Reply> {
        self.registries.publishers.get_mut(handle)?.publish(payload)?;
        Ok(Reply::Done)
    }

    pub(super) fn destroy_publisher(&mut self, handle: &str) -> PluginResult<Reply> {
        destroy_socket(&mut self.registries.publishers, &mut self.bridge, handle)
    }

    pub(super) fn create_subscriber(
        &mut self,
        script: ScriptId,
        node: &str,
        topic: &str,
        callback: String,
    ) -> PluginResult<Reply> {
        let owner = self.contexts.current(script);
        let node = self.registries.nodes.get(node)?;
        let mut subscriber = Subscriber::new(node, topic);
        prepare(&mut subscriber, &self.config.socket, node)?;

        let handle = self.registries.subscribers.add(subscriber, owner);
        let id = self.registries.subscribers.resolve(&handle)?;
        self.bridge.register(id, owner, callback);
        Ok(Reply::Handle(handle))
    }

    pub(super) fn destroy_subscriber(&mut self, handle: &str) -> PluginResult<Reply> {
        destroy_socket(&mut self.registries.subscribers, &mut self.bridge, handle)
    }

    pub(super) fn create_service_client(
        &mut self,
        script: ScriptId,
        node: &str,
        service: &str,
    ) -> PluginResult<Reply> {
        let owner = self.contexts.current(script);
        let node = self.registries.nodes.get(node)?;
        let mut client = ServiceClient::new(node, service);
        prepare(&mut client, &self.config.socket, node)?;
        Ok(Reply::Handle(self.registries.service_clients.add(client, owner)))
    }

    pub(super) fn call(&mut self, handle: &str, payload: &[u8]) -> PluginResult<Reply> {
        let reply = self.registries.service_clients.get_mut(handle)?.call(payload)?;
        Ok(Reply::Payload(reply))
    }

    pub(super) fn destroy_service_client(&mut self, handle: &str) -> PluginResult<Reply> {
        destroy_socket(&mut self.registries.service_clients, &mut self.bridge, handle)
    }

    pub(super) fn create_service_server(
        &mut self,
        script: ScriptId,
        node: &str,
        service: &str,
        callback: String,
    ) -> PluginResult<Reply> {
        let owner = self.contexts.current(script);
        let node = self.registries.nodes.get(node)?;
        let mut server = ServiceServer::new(node, service);
        prepare(&mut server, &self.config.socket, node)?;

        let handle = self.registries.service_servers.add(server, owner);
        let id = self.registries.service_servers.resolve(&handle)?;
        self.bridge.register(id, owner, callback);
        Ok(Reply::Handle(handle))
    }

    pub(super) fn destroy_service_server(&mut self, handle: &str) -> PluginResult<Reply> {
        destroy_socket(&mut self.registries.service_servers, &mut self.bridge, handle)
    }

    pub(super) fn socket_init(&mut self, handle: &str) -> PluginResult<Reply> {
        resolve_socket(&mut self.registries, handle)?.into_socket().init()?;
        Ok(Reply::Done)
    }

    pub(super) fn socket_cleanup(&mut self, handle: &str) -> PluginResult<Reply> {
        resolve_socket(&mut self.registries, handle)?.into_socket().cleanup();
        Ok(Reply::Done)
    }

    pub(super) fn socket_poll(&mut self, handle: &str, timeout_ms: u64) -> PluginResult<Reply> {
        let socket = resolve_socket(&mut self.registries, handle)?.into_socket();
        let ready = socket.poll(Duration::from_millis(timeout_ms))?;
        Ok(Reply::Ready(ready))
    }

    pub(super) fn socket_read(&mut self, handle: &str) -> PluginResult<Reply> {
        let payload = resolve_socket(&mut self.registries, handle)?.into_socket().read()?;
        Ok(Reply::Payload(payload))
    }

    pub(super) fn socket_write(&mut self, handle: &str, payload: &[u8]) -> PluginResult<Reply> {
        resolve_socket(&mut self.registries, handle)?.into_socket().write(payload)?;
        Ok(Reply::Done)
    }

    /// The handle is checked before the option name
    pub(super) fn set_socket_option(
        &mut self,
        handle: &str,
        option: &str,
        value: i64,
    ) -> PluginResult<Reply> {
        let socket = resolve_socket(&mut self.registries, handle)?.into_socket();
        let option = SocketOption::parse(option)?;
        option.apply(socket.options_mut(), value);
        debug!(target: "plugin", "Set {} = {} on {}", option.as_ref(), value, handle);
        Ok(Reply::Done)
    }

    pub(super) fn set_compression(
        &mut self,
        handle: &str,
        algorithm: &str,
        level: i32,
    ) -> PluginResult<Reply> {
        resolve_socket(&mut self.registries, handle)?
            .into_socket()
            .set_compression(algorithm, level)?;
        Ok(Reply::Done)
    }
}
