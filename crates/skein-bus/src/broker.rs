// Shared in-memory fabric connecting nodes
//
// Topics fan out through a broadcast channel each and are dropped once no
// publisher or subscriber is attached; services queue requests on a bounded
// mpsc channel owned by the single server that advertised them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::compression::Frame;
use crate::error::{BusError, BusResult};
use crate::service::ServiceRequest;

/// Default number of messages a topic buffers for its slowest subscriber
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

struct Advertisement {
    server_id: u64,
    sender: mpsc::Sender<ServiceRequest>,
}

struct Topic {
    sender: broadcast::Sender<Frame>,
    publishers: usize,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    node_names: BTreeSet<String>,
    topics: HashMap<String, Topic>,
    services: HashMap<String, Advertisement>,
}

/// Handle to the fabric; clones share the same state
#[derive(Clone)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
    topic_capacity: usize,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_topic_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_topic_capacity(topic_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            topic_capacity: topic_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id unique across everything created on this broker
    pub(crate) fn next_id(&self) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        state.next_id
    }

    /// Claim a node name, appending `-N` until it is unique
    pub(crate) fn claim_node_name(&self, requested: &str) -> String {
        let mut state = self.lock();
        let mut name = requested.to_string();
        let mut suffix = 0;
        while state.node_names.contains(&name) {
            suffix += 1;
            name = format!("{}-{}", requested, suffix);
        }
        state.node_names.insert(name.clone());
        debug!(target: "bus", "Node name claimed: {}", name);
        name
    }

    pub(crate) fn release_node_name(&self, name: &str) {
        self.lock().node_names.remove(name);
    }

    fn topic_entry<'a>(&self, state: &'a mut BrokerState, topic: &str) -> &'a mut Topic {
        state.topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(target: "bus", "Topic opened: {}", topic);
            Topic {
                sender: broadcast::channel(self.topic_capacity).0,
                publishers: 0,
            }
        })
    }

    /// Sender side of a topic, creating the topic on first use
    ///
    /// Pair with [`Broker::detach_publisher`] once the sender is dropped.
    pub(crate) fn attach_publisher(&self, topic: &str) -> broadcast::Sender<Frame> {
        let mut state = self.lock();
        let entry = self.topic_entry(&mut state, topic);
        entry.publishers += 1;
        entry.sender.clone()
    }

    /// Receiver side of a topic, creating the topic on first use
    ///
    /// Pair with [`Broker::detach_subscriber`] once the receiver is dropped.
    pub(crate) fn attach_subscriber(&self, topic: &str) -> broadcast::Receiver<Frame> {
        let mut state = self.lock();
        self.topic_entry(&mut state, topic).sender.subscribe()
    }

    pub(crate) fn detach_publisher(&self, topic: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.topics.get_mut(topic) {
            entry.publishers = entry.publishers.saturating_sub(1);
        }
        Self::close_if_unused(&mut state, topic);
    }

    pub(crate) fn detach_subscriber(&self, topic: &str) {
        Self::close_if_unused(&mut self.lock(), topic);
    }

    fn close_if_unused(state: &mut BrokerState, topic: &str) {
        let unused = state
            .topics
            .get(topic)
            .is_some_and(|entry| entry.publishers == 0 && entry.sender.receiver_count() == 0);
        if unused {
            state.topics.remove(topic);
            debug!(target: "bus", "Topic closed: {}", topic);
        }
    }

    /// Names of all topics with at least one publisher or subscriber attached
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn advertise(
        &self,
        service: &str,
        server_id: u64,
        backlog: usize,
    ) -> BusResult<mpsc::Receiver<ServiceRequest>> {
        let mut state = self.lock();
        if state.services.contains_key(service) {
            return Err(BusError::ServiceTaken(service.to_string()));
        }
        let (sender, receiver) = mpsc::channel(backlog.max(1));
        state
            .services
            .insert(service.to_string(), Advertisement { server_id, sender });
        debug!(target: "bus", "Service advertised: {}", service);
        Ok(receiver)
    }

    /// Remove an advertisement, but only if `server_id` still owns it
    pub(crate) fn withdraw(&self, service: &str, server_id: u64) {
        let mut state = self.lock();
        if state
            .services
            .get(service)
            .is_some_and(|ad| ad.server_id == server_id)
        {
            state.services.remove(service);
            debug!(target: "bus", "Service withdrawn: {}", service);
        }
    }

    pub(crate) fn service(&self, service: &str) -> Option<mpsc::Sender<ServiceRequest>> {
        self.lock().services.get(service).map(|ad| ad.sender.clone())
    }

    /// Names of all initialized nodes
    pub fn node_names(&self) -> Vec<String> {
        self.lock().node_names.iter().cloned().collect()
    }

    /// Names of all currently advertised services
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of subscribers currently attached to a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.sender.receiver_count())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
