use serde::{Deserialize, Serialize};
use skein_bus::{Node, Publisher, ServiceClient, ServiceServer, Socket, Subscriber};
use strum_macros::{Display, EnumIter};

use crate::handle::Identity;

/// The five kinds of object a script can hold a handle to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
pub enum ResourceKind {
    Node,
    Publisher,
    Subscriber,
    ServiceClient,
    ServiceServer,
}

impl ResourceKind {
    /// Tag embedded in every handle of this kind
    pub const fn tag(self) -> &'static str {
        match self {
            ResourceKind::Node => "skein.node",
            ResourceKind::Publisher => "skein.pub",
            ResourceKind::Subscriber => "skein.sub",
            ResourceKind::ServiceClient => "skein.cli",
            ResourceKind::ServiceServer => "skein.srv",
        }
    }
}

/// Fully qualified identity of a live resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub identity: Identity,
}

/// Something a registry can hold
pub trait Resource {
    const KIND: ResourceKind;

    /// Undo whatever the bus set up for this object; called once, right before it is dropped
    fn release(&mut self);
}

impl Resource for Node {
    const KIND: ResourceKind = ResourceKind::Node;

    fn release(&mut self) {
        self.cleanup();
    }
}

impl Resource for Publisher {
    const KIND: ResourceKind = ResourceKind::Publisher;

    fn release(&mut self) {
        Socket::cleanup(self);
    }
}

impl Resource for Subscriber {
    const KIND: ResourceKind = ResourceKind::Subscriber;

    fn release(&mut self) {
        Socket::cleanup(self);
    }
}

impl Resource for ServiceClient {
    const KIND: ResourceKind = ResourceKind::ServiceClient;

    fn release(&mut self) {
        Socket::cleanup(self);
    }
}

impl Resource for ServiceServer {
    const KIND: ResourceKind = ResourceKind::ServiceServer;

    fn release(&mut self) {
        Socket::cleanup(self);
    }
}
