use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::broker::Broker;
use crate::compression::Compression;
use crate::error::BusResult;
use crate::node::NodeId;
use crate::options::SocketOptions;

/// The four socket flavours a node can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Publisher,
    Subscriber,
    ServiceClient,
    ServiceServer,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketKind::Publisher => "publisher",
            SocketKind::Subscriber => "subscriber",
            SocketKind::ServiceClient => "service client",
            SocketKind::ServiceServer => "service server",
        };
        f.write_str(name)
    }
}

/// Operations shared by every socket kind
///
/// `read` and `write` are the raw, callback-free way of moving payloads: a
/// subscriber reads messages, a publisher writes them, a client writes a
/// request and reads its reply, and a server reads a request and writes its reply.
pub trait Socket {
    fn kind(&self) -> SocketKind;

    /// Topic or service name
    fn name(&self) -> &str;

    /// Node this socket was created on
    fn node_id(&self) -> NodeId;

    fn is_initialized(&self) -> bool;

    fn init(&mut self) -> BusResult<()>;

    fn cleanup(&mut self);

    /// Wait up to `timeout` for something to read
    fn poll(&mut self, timeout: Duration) -> BusResult<bool>;

    fn read(&mut self) -> BusResult<Vec<u8>>;

    fn write(&mut self, payload: &[u8]) -> BusResult<()>;

    fn options(&self) -> &SocketOptions;

    fn options_mut(&mut self) -> &mut SocketOptions;

    fn set_compression(&mut self, algorithm: &str, level: i32) -> BusResult<()> {
        let compression = Compression::from_name(algorithm)?;
        let options = self.options_mut();
        options.compression = compression;
        options.compression_level = level;
        Ok(())
    }
}

/// What a socket inherits from the node it is created on
#[derive(Clone)]
pub(crate) struct SocketContext {
    pub node_id: NodeId,
    pub broker: Broker,
    pub runtime: Arc<Runtime>,
}
