//! Owner contexts and the teardown sweep that runs when one ends

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::registry::Registries;
use crate::resource::ResourceId;

/// Host-assigned identifier of a script instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub i32);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script {}", self.0)
    }
}

/// A script id paired with the generation of its current context
///
/// Script ids are reused by the host once a script is reset, so the id alone
/// cannot tell an old context's resources from a new one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    pub script: ScriptId,
    pub generation: u32,
}

impl Owner {
    pub fn new(script: ScriptId, generation: u32) -> Self {
        Self { script, generation }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.script, self.generation)
    }
}

/// Tracks the live context generation of every script the plugin has seen
#[derive(Debug, Default)]
pub struct OwnerContexts {
    generations: HashMap<ScriptId, u32>,
}

impl OwnerContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner for a call made by `script` right now
    pub fn current(&mut self, script: ScriptId) -> Owner {
        let generation = *self.generations.entry(script).or_insert(0);
        Owner::new(script, generation)
    }

    /// Like [`OwnerContexts::current`] without recording the script
    pub fn peek(&self, script: ScriptId) -> Owner {
        Owner::new(script, self.generations.get(&script).copied().unwrap_or(0))
    }

    /// Close the current context of `script`, returning the owner that ended
    ///
    /// Later calls from the same script id belong to a fresh context.
    pub fn end(&mut self, script: ScriptId) -> Owner {
        let generation = self.generations.entry(script).or_insert(0);
        let ended = Owner::new(script, *generation);
        *generation = generation.wrapping_add(1);
        ended
    }
}

impl Registries {
    /// Release everything `owner` holds across all kinds
    ///
    /// Sockets go before nodes so nothing outlives the node it was created on.
    pub fn release_owner(&mut self, owner: Owner) -> Vec<ResourceId> {
        let mut released = self.service_servers.release_owner(owner);
        released.extend(self.service_clients.release_owner(owner));
        released.extend(self.subscribers.release_owner(owner));
        released.extend(self.publishers.release_owner(owner));
        released.extend(self.nodes.release_owner(owner));

        if released.is_empty() {
            debug!(target: "registry", "Nothing to release for {}", owner);
        } else {
            info!(target: "registry", "Released {} resource(s) of {}", released.len(), owner);
        }
        released
    }

    /// Release every resource of every owner, sockets first
    pub fn release_all(&mut self) -> Vec<ResourceId> {
        let mut released = self.service_servers.release_all();
        released.extend(self.service_clients.release_all());
        released.extend(self.subscribers.release_all());
        released.extend(self.publishers.release_all());
        released.extend(self.nodes.release_all());
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use skein_bus::{Broker, Node, Publisher, Socket, Subscriber};

    #[test]
    fn test_end_starts_a_new_generation() {
        let mut contexts = OwnerContexts::new();
        let first = contexts.current(ScriptId(5));
        assert_eq!(first, contexts.peek(ScriptId(5)));
        assert_eq!(contexts.end(ScriptId(5)), first);
        let second = contexts.current(ScriptId(5));
        assert_eq!(second.script, first.script);
        assert_ne!(second, first);
    }

    #[test]
    fn test_unknown_script_peeks_generation_zero() {
        let contexts = OwnerContexts::new();
        assert_eq!(contexts.peek(ScriptId(9)), Owner::new(ScriptId(9), 0));
    }

    #[test]
    fn test_release_owner_sweeps_sockets_before_nodes() {
        let broker = Broker::new();
        let mut registries = Registries::new();
        let owner = Owner::new(ScriptId(5), 0);
        let other = Owner::new(ScriptId(6), 0);

        let mut node = Node::new(&broker, "talker").unwrap();
        node.init().unwrap();
        let mut publisher = Publisher::new(&node, "chatter");
        publisher.init().unwrap();
        let mut subscriber = Subscriber::new(&node, "chatter");
        subscriber.init().unwrap();
        let kept = Node::new(&broker, "listener").unwrap();

        registries.nodes.add(node, owner);
        let publisher = registries.publishers.add(publisher, owner);
        registries.subscribers.add(subscriber, owner);
        let kept = registries.nodes.add(kept, other);
        assert_eq!(broker.subscriber_count("chatter"), 1);

        let released = registries.release_owner(owner);
        let kinds: Vec<_> = released.iter().map(|id| id.kind).collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::Subscriber, ResourceKind::Publisher, ResourceKind::Node]
        );
        assert_eq!(broker.subscriber_count("chatter"), 0);
        assert!(broker.node_names().is_empty());
        assert!(registries.publishers.get(&publisher).is_err());
        assert!(registries.nodes.get(&kept).is_ok());

        assert!(registries.release_owner(owner).is_empty());
        assert_eq!(registries.len(), 1);
    }
}
