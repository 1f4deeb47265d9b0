use skein_bus::{NodeId, Publisher, ServiceClient, ServiceServer, Socket, Subscriber};

use crate::error::{PluginError, PluginResult};
use crate::registry::Registries;
use crate::resource::{ResourceId, ResourceKind};

/// A socket found by handle without knowing its kind up front
pub enum SocketRef<'a> {
    Publisher(ResourceId, &'a mut Publisher),
    Subscriber(ResourceId, &'a mut Subscriber),
    ServiceClient(ResourceId, &'a mut ServiceClient),
    ServiceServer(ResourceId, &'a mut ServiceServer),
}

impl<'a> SocketRef<'a> {
    pub fn kind(&self) -> ResourceKind {
        self.id().kind
    }

    pub fn id(&self) -> ResourceId {
        match self {
            SocketRef::Publisher(id, _)
            | SocketRef::Subscriber(id, _)
            | SocketRef::ServiceClient(id, _)
            | SocketRef::ServiceServer(id, _) => *id,
        }
    }

    /// Node the socket was created on
    pub fn node_id(&self) -> NodeId {
        match self {
            SocketRef::Publisher(_, socket) => socket.node_id(),
            SocketRef::Subscriber(_, socket) => socket.node_id(),
            SocketRef::ServiceClient(_, socket) => socket.node_id(),
            SocketRef::ServiceServer(_, socket) => socket.node_id(),
        }
    }

    pub fn as_socket(&mut self) -> &mut dyn Socket {
        match self {
            SocketRef::Publisher(_, socket) => &mut **socket,
            SocketRef::Subscriber(_, socket) => &mut **socket,
            SocketRef::ServiceClient(_, socket) => &mut **socket,
            SocketRef::ServiceServer(_, socket) => &mut **socket,
        }
    }

    pub fn into_socket(self) -> &'a mut dyn Socket {
        match self {
            SocketRef::Publisher(_, socket) => socket,
            SocketRef::Subscriber(_, socket) => socket,
            SocketRef::ServiceClient(_, socket) => socket,
            SocketRef::ServiceServer(_, socket) => socket,
        }
    }
}

/// Find the socket `handle` names, trying publishers, subscribers, clients
/// and servers in that order
///
/// Node handles never resolve here.
pub fn resolve_socket<'a>(registries: &'a mut Registries, handle: &str) -> PluginResult<SocketRef<'a>> {
    if let Ok((id, socket)) = registries.publishers.lookup_mut(handle) {
        return Ok(SocketRef::Publisher(id, socket));
    }
    if let Ok((id, socket)) = registries.subscribers.lookup_mut(handle) {
        return Ok(SocketRef::Subscriber(id, socket));
    }
    if let Ok((id, socket)) = registries.service_clients.lookup_mut(handle) {
        return Ok(SocketRef::ServiceClient(id, socket));
    }
    if let Ok((id, socket)) = registries.service_servers.lookup_mut(handle) {
        return Ok(SocketRef::ServiceServer(id, socket));
    }
    Err(PluginError::InvalidHandle(handle.to_string()))
}

/// Every socket created on `node`, grouped by kind and oldest first within a kind
pub fn sockets_of(registries: &mut Registries, node: NodeId) -> Vec<SocketRef<'_>> {
    let mut sockets = Vec::new();
    sockets.extend(
        registries
            .publishers
            .iter_mut()
            .into_iter()
            .filter(|(_, socket)| socket.node_id() == node)
            .map(|(id, socket)| SocketRef::Publisher(id, socket)),
    );
    sockets.extend(
        registries
            .subscribers
            .iter_mut()
            .into_iter()
            .filter(|(_, socket)| socket.node_id() == node)
            .map(|(id, socket)| SocketRef::Subscriber(id, socket)),
    );
    sockets.extend(
        registries
            .service_clients
            .iter_mut()
            .into_iter()
            .filter(|(_, socket)| socket.node_id() == node)
            .map(|(id, socket)| SocketRef::ServiceClient(id, socket)),
    );
    sockets.extend(
        registries
            .service_servers
            .iter_mut()
            .into_iter()
            .filter(|(_, socket)| socket.node_id() == node)
            .map(|(id, socket)| SocketRef::ServiceServer(id, socket)),
    );
    sockets
}
