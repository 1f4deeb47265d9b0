use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::broker::Broker;
use crate::error::{BusError, BusResult};
use crate::socket::SocketContext;

/// Unique identifier for a node on its broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Ready,
    Terminated,
}

/// Cooperative stop flag for a blocking spin
///
/// Clones share the flag, so callback code holding one can end the spin of the
/// node it came from.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A participant on the bus; sockets are created on a node
pub struct Node {
    id: NodeId,
    requested_name: String,
    name: Option<String>,
    state: NodeState,
    broker: Broker,
    runtime: Arc<Runtime>,
    stop: StopHandle,
    spin_count: u64,
}

impl Node {
    pub fn new(broker: &Broker, name: impl Into<String>) -> BusResult<Self> {
        // Timed waits (read/write timeouts) run on a private single-threaded runtime
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(BusError::Runtime)?;

        Ok(Self {
            id: NodeId(broker.next_id()),
            requested_name: name.into(),
            name: None,
            state: NodeState::Created,
            broker: broker.clone(),
            runtime: Arc::new(runtime),
            stop: StopHandle::default(),
            spin_count: 0,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The resolved name once initialized, the requested name before that
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.requested_name)
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Number of completed `spin_once` calls
    pub fn spin_count(&self) -> u64 {
        self.spin_count
    }

    /// Join the bus, claiming a unique name
    pub fn init(&mut self) -> BusResult<()> {
        if self.state == NodeState::Ready {
            return Err(BusError::AlreadyInitialized(self.to_string()));
        }
        let name = self.broker.claim_node_name(&self.requested_name);
        info!(target: "bus", "Node {} initialized as {}", self.id, name);
        self.name = Some(name);
        self.state = NodeState::Ready;
        Ok(())
    }

    pub fn spin_once(&mut self) -> BusResult<()> {
        if self.state != NodeState::Ready {
            return Err(BusError::NotInitialized(self.to_string()));
        }
        self.spin_count += 1;
        Ok(())
    }

    /// Leave the bus; the claimed name becomes available again
    pub fn cleanup(&mut self) {
        if self.state == NodeState::Ready {
            if let Some(name) = &self.name {
                self.broker.release_node_name(name);
            }
            debug!(target: "bus", "Node {} cleaned up", self);
        }
        self.state = NodeState::Terminated;
    }

    pub(crate) fn socket_context(&self) -> SocketContext {
        SocketContext {
            node_id: self.id,
            broker: self.broker.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node '{}'", self.name())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cleanup();
    }
}
