use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use crate::compression::Frame;
use crate::error::{BusError, BusResult};
use crate::node::{Node, NodeId};
use crate::options::SocketOptions;
use crate::socket::{Socket, SocketContext, SocketKind};

/// Sends messages on a topic
pub struct Publisher {
    ctx: SocketContext,
    topic: String,
    options: SocketOptions,
    sender: Option<broadcast::Sender<Frame>>,
    published: u64,
}

impl Publisher {
    pub fn new(node: &Node, topic: impl Into<String>) -> Self {
        Self {
            ctx: node.socket_context(),
            topic: topic.into(),
            options: SocketOptions::default(),
            sender: None,
            published: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of messages handed to the topic so far
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn publish(&mut self, payload: &[u8]) -> BusResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BusError::NotInitialized(format!("publisher on {}", self.topic)))?;

        if sender.receiver_count() == 0 {
            if self.options.immediate {
                return Err(BusError::NoPeer(self.topic.clone()));
            }
            debug!(target: "bus", "No subscribers on {}, message dropped", self.topic);
            return Ok(());
        }

        if self.options.write_hwm > 0 && sender.len() >= self.options.write_hwm {
            debug!(target: "bus", "Write high-water mark reached on {}, message dropped", self.topic);
            return Ok(());
        }

        let frame = Frame::encode(
            payload,
            self.options.compression,
            self.options.compression_level,
        )?;
        // Only fails when every receiver went away since the count above
        let _ = sender.send(frame);
        self.published += 1;
        Ok(())
    }
}

impl Socket for Publisher {
    fn kind(&self) -> SocketKind {
        SocketKind::Publisher
    }

    fn name(&self) -> &str {
        &self.topic
    }

    fn node_id(&self) -> NodeId {
        self.ctx.node_id
    }

    fn is_initialized(&self) -> bool {
        self.sender.is_some()
    }

    fn init(&mut self) -> BusResult<()> {
        if self.sender.is_some() {
            return Err(BusError::AlreadyInitialized(format!("publisher on {}", self.topic)));
        }
        self.sender = Some(self.ctx.broker.attach_publisher(&self.topic));
        debug!(target: "bus", "Publisher on {} initialized", self.topic);
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.sender.take().is_some() {
            self.ctx.broker.detach_publisher(&self.topic);
        }
    }

    fn poll(&mut self, _timeout: Duration) -> BusResult<bool> {
        Err(BusError::Unsupported {
            kind: SocketKind::Publisher,
            op: "poll",
        })
    }

    fn read(&mut self) -> BusResult<Vec<u8>> {
        Err(BusError::Unsupported {
            kind: SocketKind::Publisher,
            op: "read",
        })
    }

    fn write(&mut self, payload: &[u8]) -> BusResult<()> {
        self.publish(payload)
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SocketOptions {
        &mut self.options
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cleanup();
    }
}
