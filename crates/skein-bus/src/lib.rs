/// In-process pub/sub and RPC bus
///
/// This crate provides the messaging objects the skein plugin exposes to scripts:
/// nodes, publishers, subscribers, service clients and service servers. All of them
/// share a [`Broker`], the in-memory fabric that routes topic messages and service
/// requests between nodes.
///
/// Nothing in this crate calls back into user code. Incoming messages and requests
/// are queued and only handed out when the owner drains them, so a single-threaded
/// host decides exactly when events are processed.
pub mod broker;
pub mod compression;
pub mod error;
pub mod node;
pub mod options;
pub mod publisher;
pub mod service;
pub mod socket;
pub mod subscriber;

pub use broker::Broker;
pub use compression::{Compression, Frame};
pub use error::{BusError, BusResult};
pub use node::{Node, NodeId, NodeState, StopHandle};
pub use options::SocketOptions;
pub use publisher::Publisher;
pub use service::{PendingRequest, Responder, ServiceClient, ServiceServer};
pub use socket::{Socket, SocketKind};
pub use subscriber::Subscriber;
