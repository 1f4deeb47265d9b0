use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::compression::Frame;
use crate::error::{BusError, BusResult};
use crate::node::{Node, NodeId};
use crate::options::SocketOptions;
use crate::socket::{Socket, SocketContext, SocketKind};

/// Receives messages published on a topic
///
/// Messages accumulate in the broker until [`Subscriber::drain`], `poll` or
/// `read` pulls them in.
pub struct Subscriber {
    ctx: SocketContext,
    topic: String,
    options: SocketOptions,
    receiver: Option<broadcast::Receiver<Frame>>,
    pending: VecDeque<Frame>,
}

impl Subscriber {
    pub fn new(node: &Node, topic: impl Into<String>) -> Self {
        Self {
            ctx: node.socket_context(),
            topic: topic.into(),
            options: SocketOptions::default(),
            receiver: None,
            pending: VecDeque::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Take every message received so far, oldest first
    pub fn drain(&mut self) -> BusResult<Vec<Vec<u8>>> {
        self.fill()?;
        self.pending.drain(..).map(|frame| frame.decode()).collect()
    }

    fn not_initialized(&self) -> BusError {
        BusError::NotInitialized(format!("subscriber on {}", self.topic))
    }

    /// Move everything the broker holds for us into the local queue
    fn fill(&mut self) -> BusResult<()> {
        let receiver = match self.receiver.as_mut() {
            Some(receiver) => receiver,
            None => return Err(self.not_initialized()),
        };

        loop {
            match receiver.try_recv() {
                Ok(frame) => self.pending.push_back(frame),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(target: "bus", "Subscriber on {} lagged, {} message(s) lost", self.topic, skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        self.trim();
        Ok(())
    }

    fn trim(&mut self) {
        let limit = if self.options.conflate {
            1
        } else {
            self.options.read_hwm
        };
        if limit > 0 && self.pending.len() > limit {
            let excess = self.pending.len() - limit;
            self.pending.drain(..excess);
            debug!(target: "bus", "Subscriber on {} discarded {} old message(s)", self.topic, excess);
        }
    }

    /// Block until one more frame arrives, or `timeout` elapses
    fn wait(&mut self, timeout: Option<Duration>) -> BusResult<bool> {
        let receiver = match self.receiver.as_mut() {
            Some(receiver) => receiver,
            None => return Err(self.not_initialized()),
        };

        let received = self.ctx.runtime.block_on(async {
            let next = next_frame(receiver);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, next).await.ok().flatten(),
                None => next.await,
            }
        });

        match received {
            Some(frame) => {
                self.pending.push_back(frame);
                self.trim();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

async fn next_frame(receiver: &mut broadcast::Receiver<Frame>) -> Option<Frame> {
    loop {
        match receiver.recv().await {
            Ok(frame) => return Some(frame),
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "bus", "Subscriber lagged, {} message(s) lost", skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

impl Socket for Subscriber {
    fn kind(&self) -> SocketKind {
        SocketKind::Subscriber
    }

    fn name(&self) -> &str {
        &self.topic
    }

    fn node_id(&self) -> NodeId {
        self.ctx.node_id
    }

    fn is_initialized(&self) -> bool {
        self.receiver.is_some()
    }

    fn init(&mut self) -> BusResult<()> {
        if self.receiver.is_some() {
            return Err(BusError::AlreadyInitialized(format!("subscriber on {}", self.topic)));
        }
        self.receiver = Some(self.ctx.broker.attach_subscriber(&self.topic));
        debug!(target: "bus", "Subscriber on {} initialized", self.topic);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.pending.clear();
        if self.receiver.take().is_some() {
            self.ctx.broker.detach_subscriber(&self.topic);
        }
    }

    fn poll(&mut self, timeout: Duration) -> BusResult<bool> {
        self.fill()?;
        if !self.pending.is_empty() {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.wait(Some(timeout))
    }

    fn read(&mut self) -> BusResult<Vec<u8>> {
        self.fill()?;
        if self.pending.is_empty() {
            let timeout = self.options.read_timeout();
            if !self.wait(timeout)? {
                return Err(BusError::Timeout(timeout.unwrap_or_default()));
            }
        }
        match self.pending.pop_front() {
            Some(frame) => frame.decode(),
            None => Err(BusError::Disconnected(self.topic.clone())),
        }
    }

    fn write(&mut self, _payload: &[u8]) -> BusResult<()> {
        Err(BusError::Unsupported {
            kind: SocketKind::Subscriber,
            op: "write",
        })
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SocketOptions {
        &mut self.options
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cleanup();
    }
}
