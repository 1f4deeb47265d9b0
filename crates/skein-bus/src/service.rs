use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::compression::{Compression, Frame};
use crate::error::{BusError, BusResult};
use crate::node::{Node, NodeId};
use crate::options::SocketOptions;
use crate::socket::{Socket, SocketContext, SocketKind};

/// How often a client re-checks for a server that has not advertised yet
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// A request in flight between a client and a server
pub(crate) struct ServiceRequest {
    frame: Frame,
    reply: oneshot::Sender<Frame>,
}

/// Sends the reply for one request
pub struct Responder {
    service: String,
    reply: oneshot::Sender<Frame>,
    compression: Compression,
    level: i32,
}

impl Responder {
    pub fn respond(self, payload: &[u8]) -> BusResult<()> {
        let frame = Frame::encode(payload, self.compression, self.level)?;
        self.reply
            .send(frame)
            .map_err(|_| BusError::Disconnected(self.service))
    }
}

/// A decoded request waiting for its reply
pub struct PendingRequest {
    pub payload: Vec<u8>,
    pub responder: Responder,
}

/// Sends requests to a service and waits for replies
pub struct ServiceClient {
    ctx: SocketContext,
    service: String,
    options: SocketOptions,
    initialized: bool,
    outstanding: Option<oneshot::Receiver<Frame>>,
    ready: Option<Frame>,
}

impl ServiceClient {
    pub fn new(node: &Node, service: impl Into<String>) -> Self {
        Self {
            ctx: node.socket_context(),
            service: service.into(),
            options: SocketOptions::default(),
            initialized: false,
            outstanding: None,
            ready: None,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Send a request and block until the reply arrives
    pub fn call(&mut self, payload: &[u8]) -> BusResult<Vec<u8>> {
        self.write(payload)?;
        self.read()
    }

    /// Find the server's request queue, waiting up to the write timeout for it
    fn connect(&self) -> BusResult<mpsc::Sender<ServiceRequest>> {
        if let Some(sender) = self.ctx.broker.service(&self.service) {
            return Ok(sender);
        }

        let timeout = self.options.write_timeout();
        if self.options.immediate || timeout == Some(Duration::ZERO) {
            return Err(BusError::NoService(self.service.clone()));
        }

        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(BusError::NoService(self.service.clone()));
            }
            std::thread::sleep(CONNECT_RETRY_INTERVAL);
            if let Some(sender) = self.ctx.broker.service(&self.service) {
                return Ok(sender);
            }
        }
    }

    /// Wait for the outstanding reply, keeping it in `ready`
    fn wait(&mut self, timeout: Option<Duration>) -> BusResult<bool> {
        if self.ready.is_some() {
            return Ok(true);
        }
        let Some(receiver) = self.outstanding.as_mut() else {
            return Err(BusError::NoRequestPending(self.service.clone()));
        };

        let received = self.ctx.runtime.block_on(async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, receiver).await.ok(),
                None => Some(receiver.await),
            }
        });

        match received {
            Some(Ok(frame)) => {
                self.outstanding = None;
                self.ready = Some(frame);
                Ok(true)
            }
            Some(Err(_)) => {
                self.outstanding = None;
                Err(BusError::NoReply(self.service.clone()))
            }
            None => Ok(false),
        }
    }
}

impl Socket for ServiceClient {
    fn kind(&self) -> SocketKind {
        SocketKind::ServiceClient
    }

    fn name(&self) -> &str {
        &self.service
    }

    fn node_id(&self) -> NodeId {
        self.ctx.node_id
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn init(&mut self) -> BusResult<()> {
        if self.initialized {
            return Err(BusError::AlreadyInitialized(format!("client of {}", self.service)));
        }
        self.initialized = true;
        debug!(target: "bus", "Service client of {} initialized", self.service);
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.outstanding.is_some() {
            let linger = self.options.linger();
            if linger != Some(Duration::ZERO) {
                // A late reply is simply discarded
                let _ = self.wait(linger);
            }
        }
        self.outstanding = None;
        self.ready = None;
        self.initialized = false;
    }

    fn poll(&mut self, timeout: Duration) -> BusResult<bool> {
        self.wait(Some(timeout))
    }

    fn read(&mut self) -> BusResult<Vec<u8>> {
        let timeout = self.options.read_timeout();
        if !self.wait(timeout)? {
            // The reply for a timed-out request must never be read as the next one
            self.outstanding = None;
            return Err(BusError::Timeout(timeout.unwrap_or_default()));
        }
        match self.ready.take() {
            Some(frame) => frame.decode(),
            None => Err(BusError::NoRequestPending(self.service.clone())),
        }
    }

    fn write(&mut self, payload: &[u8]) -> BusResult<()> {
        if !self.initialized {
            return Err(BusError::NotInitialized(format!("client of {}", self.service)));
        }
        let sender = self.connect()?;
        let frame = Frame::encode(
            payload,
            self.options.compression,
            self.options.compression_level,
        )?;
        let (reply, receiver) = oneshot::channel();
        let request = ServiceRequest { frame, reply };

        let timeout = self.options.write_timeout();
        let sent = self.ctx.runtime.block_on(async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, sender.send(request)).await.ok(),
                None => Some(sender.send(request).await),
            }
        });

        match sent {
            Some(Ok(())) => {
                self.ready = None;
                self.outstanding = Some(receiver);
                Ok(())
            }
            Some(Err(_)) => Err(BusError::Disconnected(self.service.clone())),
            None => Err(BusError::Timeout(timeout.unwrap_or_default())),
        }
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SocketOptions {
        &mut self.options
    }
}

/// Answers requests for one service
pub struct ServiceServer {
    ctx: SocketContext,
    id: u64,
    service: String,
    options: SocketOptions,
    receiver: Option<mpsc::Receiver<ServiceRequest>>,
    queued: VecDeque<ServiceRequest>,
    current: Option<Responder>,
}

impl ServiceServer {
    pub fn new(node: &Node, service: impl Into<String>) -> Self {
        let ctx = node.socket_context();
        Self {
            id: ctx.broker.next_id(),
            ctx,
            service: service.into(),
            options: SocketOptions::default(),
            receiver: None,
            queued: VecDeque::new(),
            current: None,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Take every request received so far, oldest first
    pub fn drain(&mut self) -> BusResult<Vec<PendingRequest>> {
        self.fill()?;
        let mut requests = Vec::with_capacity(self.queued.len());
        while let Some(request) = self.queued.pop_front() {
            match request.frame.decode() {
                Ok(payload) => requests.push(PendingRequest {
                    payload,
                    responder: self.responder(request.reply),
                }),
                // Dropping the reply sender tells the client no answer is coming
                Err(e) => warn!(target: "bus", "Undecodable request on {}: {}", self.service, e),
            }
        }
        Ok(requests)
    }

    fn responder(&self, reply: oneshot::Sender<Frame>) -> Responder {
        Responder {
            service: self.service.clone(),
            reply,
            compression: self.options.compression,
            level: self.options.compression_level,
        }
    }

    fn not_initialized(&self) -> BusError {
        BusError::NotInitialized(format!("server of {}", self.service))
    }

    fn fill(&mut self) -> BusResult<()> {
        let receiver = match self.receiver.as_mut() {
            Some(receiver) => receiver,
            None => return Err(self.not_initialized()),
        };
        loop {
            match receiver.try_recv() {
                Ok(request) => self.queued.push_back(request),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> BusResult<bool> {
        let receiver = match self.receiver.as_mut() {
            Some(receiver) => receiver,
            None => return Err(self.not_initialized()),
        };
        let received = self.ctx.runtime.block_on(async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, receiver.recv()).await.ok().flatten(),
                None => receiver.recv().await,
            }
        });
        match received {
            Some(request) => {
                self.queued.push_back(request);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Socket for ServiceServer {
    fn kind(&self) -> SocketKind {
        SocketKind::ServiceServer
    }

    fn name(&self) -> &str {
        &self.service
    }

    fn node_id(&self) -> NodeId {
        self.ctx.node_id
    }

    fn is_initialized(&self) -> bool {
        self.receiver.is_some()
    }

    fn init(&mut self) -> BusResult<()> {
        if self.receiver.is_some() {
            return Err(BusError::AlreadyInitialized(format!("server of {}", self.service)));
        }
        let receiver = self
            .ctx
            .broker
            .advertise(&self.service, self.id, self.options.backlog)?;
        self.receiver = Some(receiver);
        debug!(target: "bus", "Service server of {} initialized", self.service);
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.receiver.take().is_some() {
            self.ctx.broker.withdraw(&self.service, self.id);
        }
        // Dropping queued reply senders fails the waiting clients with NoReply
        self.queued.clear();
        self.current = None;
    }

    fn poll(&mut self, timeout: Duration) -> BusResult<bool> {
        self.fill()?;
        if !self.queued.is_empty() {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.wait(Some(timeout))
    }

    fn read(&mut self) -> BusResult<Vec<u8>> {
        self.fill()?;
        if self.queued.is_empty() {
            let timeout = self.options.read_timeout();
            if !self.wait(timeout)? {
                return Err(BusError::Timeout(timeout.unwrap_or_default()));
            }
        }
        let request = self
            .queued
            .pop_front()
            .ok_or_else(|| BusError::Disconnected(self.service.clone()))?;
        let payload = request.frame.decode()?;
        self.current = Some(self.responder(request.reply));
        Ok(payload)
    }

    fn write(&mut self, payload: &[u8]) -> BusResult<()> {
        match self.current.take() {
            Some(responder) => responder.respond(payload),
            None => Err(BusError::NoRequestPending(self.service.clone())),
        }
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut SocketOptions {
        &mut self.options
    }
}

impl Drop for ServiceServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
