//! Per-kind resource registries
//!
//! Each registry is a generational arena. A resource lives in a slot; the
//! handle encodes the slot index together with the slot's generation, which is
//! bumped every time the slot is vacated. A handle therefore stops resolving the
//! moment its resource is removed, even after the slot is reused.

use skein_bus::{Node, NodeId, Publisher, ServiceClient, ServiceServer, Socket, StopHandle, Subscriber};
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::handle::{self, Identity};
use crate::lifecycle::Owner;
use crate::resource::{Resource, ResourceId};

struct Entry<T> {
    resource: T,
    owner: Owner,
    handle: String,
    /// Creation sequence number, used for deterministic ordering
    created: u64,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Authoritative store of the live resources of one kind
pub struct Registry<T: Resource> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    next_created: u64,
    live: usize,
}

impl<T: Resource> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_created: 0,
            live: 0,
        }
    }

    /// Store a resource under `owner` and hand out its handle
    pub fn add(&mut self, resource: T, owner: Owner) -> String {
        let index = match self.free.pop() {
            Some(index) => index as usize,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };

        let slot = &mut self.slots[index];
        let identity = Identity::new(index as u32, slot.generation);
        let handle = handle::encode(T::KIND.tag(), identity.to_bits());
        slot.entry = Some(Entry {
            resource,
            owner,
            handle: handle.clone(),
            created: self.next_created,
        });
        self.next_created += 1;
        self.live += 1;

        debug!(target: "registry", "Added {} {} for {}", T::KIND, handle, owner);
        handle
    }

    /// Slot index of the live resource `token` refers to
    fn locate(&self, token: &str) -> PluginResult<usize> {
        let invalid = || PluginError::InvalidHandle(token.to_string());
        let identity = handle::decode(token, T::KIND.tag())
            .map(Identity::from_bits)
            .ok_or_else(invalid)?;
        let index = identity.slot as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == identity.generation && slot.entry.is_some() => {
                Ok(index)
            }
            _ => Err(invalid()),
        }
    }

    fn id_of(&self, index: usize) -> ResourceId {
        ResourceId {
            kind: T::KIND,
            identity: Identity::new(index as u32, self.slots[index].generation),
        }
    }

    pub fn get(&self, token: &str) -> PluginResult<&T> {
        let index = self.locate(token)?;
        self.slots[index]
            .entry
            .as_ref()
            .map(|entry| &entry.resource)
            .ok_or_else(|| PluginError::InvalidHandle(token.to_string()))
    }

    pub fn get_mut(&mut self, token: &str) -> PluginResult<&mut T> {
        self.lookup_mut(token).map(|(_, resource)| resource)
    }

    /// Like [`Registry::get_mut`], also returning the resource's identity
    pub fn lookup_mut(&mut self, token: &str) -> PluginResult<(ResourceId, &mut T)> {
        let index = self.locate(token)?;
        let id = self.id_of(index);
        self.slots[index]
            .entry
            .as_mut()
            .map(|entry| (id, &mut entry.resource))
            .ok_or_else(|| PluginError::InvalidHandle(token.to_string()))
    }

    pub fn resolve(&self, token: &str) -> PluginResult<ResourceId> {
        self.locate(token).map(|index| self.id_of(index))
    }

    pub fn owner_of(&self, token: &str) -> PluginResult<Owner> {
        let index = self.locate(token)?;
        self.slots[index]
            .entry
            .as_ref()
            .map(|entry| entry.owner)
            .ok_or_else(|| PluginError::InvalidHandle(token.to_string()))
    }

    /// Take a resource out of the registry; the caller tears it down
    pub fn remove(&mut self, token: &str) -> PluginResult<T> {
        let index = self.locate(token)?;
        let entry = self.vacate(index);
        debug!(target: "registry", "Removed {} {}", T::KIND, entry.handle);
        Ok(entry.resource)
    }

    fn vacate(&mut self, index: usize) -> Entry<T> {
        let slot = &mut self.slots[index];
        let entry = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        // A slot whose generation wrapped around is retired so no old handle can alias it
        if slot.generation != 0 {
            self.free.push(index as u32);
        }
        self.live -= 1;
        match entry {
            Some(entry) => entry,
            None => unreachable!("vacate called on an empty slot"),
        }
    }

    /// Slot indices of live entries matching `filter`, in creation order
    fn indices(&self, filter: impl Fn(&Entry<T>) -> bool) -> Vec<usize> {
        let mut found: Vec<(u64, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry
                    .as_ref()
                    .filter(|entry| filter(entry))
                    .map(|entry| (entry.created, index))
            })
            .collect();
        found.sort_unstable();
        found.into_iter().map(|(_, index)| index).collect()
    }

    /// Everything `owner` created that is still alive, oldest first
    pub fn find_by_owner(&self, owner: Owner) -> Vec<&T> {
        self.indices(|entry| entry.owner == owner)
            .into_iter()
            .filter_map(|index| self.slots[index].entry.as_ref())
            .map(|entry| &entry.resource)
            .collect()
    }

    pub fn handles_by_owner(&self, owner: Owner) -> Vec<String> {
        self.collect_handles(|entry| entry.owner == owner)
    }

    /// Every live handle, oldest first
    pub fn handles(&self) -> Vec<String> {
        self.collect_handles(|_| true)
    }

    fn collect_handles(&self, filter: impl Fn(&Entry<T>) -> bool) -> Vec<String> {
        self.indices(filter)
            .into_iter()
            .filter_map(|index| self.slots[index].entry.as_ref())
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Every live resource, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|entry| &entry.resource))
    }

    /// Mutable access to every live resource, oldest first
    pub fn iter_mut(&mut self) -> Vec<(ResourceId, &mut T)> {
        let mut live: Vec<(u64, ResourceId, &mut T)> = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                let id = ResourceId {
                    kind: T::KIND,
                    identity: Identity::new(index as u32, slot.generation),
                };
                slot.entry
                    .as_mut()
                    .map(|entry| (entry.created, id, &mut entry.resource))
            })
            .collect();
        live.sort_unstable_by_key(|(created, _, _)| *created);
        live.into_iter().map(|(_, id, resource)| (id, resource)).collect()
    }

    /// Remove and release everything `owner` created, newest first
    ///
    /// Returns the identities that were released; calling this again for the
    /// same owner releases nothing.
    pub fn release_owner(&mut self, owner: Owner) -> Vec<ResourceId> {
        let indices = self.indices(|entry| entry.owner == owner);
        self.release_indices(indices)
    }

    /// Remove and release every resource, newest first
    pub fn release_all(&mut self) -> Vec<ResourceId> {
        let indices = self.indices(|_| true);
        self.release_indices(indices)
    }

    /// Remove and release every resource matching `filter`, newest first
    pub fn release_where(&mut self, filter: impl Fn(&T) -> bool) -> Vec<ResourceId> {
        let indices = self.indices(|entry| filter(&entry.resource));
        self.release_indices(indices)
    }

    fn release_indices(&mut self, indices: Vec<usize>) -> Vec<ResourceId> {
        let mut released = Vec::with_capacity(indices.len());
        for index in indices.into_iter().rev() {
            let id = self.id_of(index);
            let mut entry = self.vacate(index);
            entry.resource.release();
            debug!(target: "registry", "Released {} {} of {}", T::KIND, entry.handle, entry.owner);
            released.push(id);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T: Resource> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One registry per resource kind, owned by a plugin instance
#[derive(Default)]
pub struct Registries {
    pub nodes: Registry<Node>,
    pub publishers: Registry<Publisher>,
    pub subscribers: Registry<Subscriber>,
    pub service_clients: Registry<ServiceClient>,
    pub service_servers: Registry<ServiceServer>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Stop flag of the node a socket was created on, if that node is still registered
    pub fn stop_handle_of(&self, node: NodeId) -> Option<StopHandle> {
        self.node_by_id(node).map(Node::stop_handle)
    }

    /// Release every socket created on `node`, whoever owns it
    pub fn release_sockets_of(&mut self, node: NodeId) -> Vec<ResourceId> {
        let on_node = |socket: &dyn Socket| socket.node_id() == node;
        let mut released = self.service_servers.release_where(|s| on_node(s));
        released.extend(self.service_clients.release_where(|s| on_node(s)));
        released.extend(self.subscribers.release_where(|s| on_node(s)));
        released.extend(self.publishers.release_where(|s| on_node(s)));
        released
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
            + self.publishers.len()
            + self.subscribers.len()
            + self.service_clients.len()
            + self.service_servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ScriptId;
    use crate::resource::ResourceKind;

    /// Registry payload that records its own release
    struct Tracked {
        name: &'static str,
        log: std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>,
    }

    impl Resource for Tracked {
        const KIND: ResourceKind = ResourceKind::Publisher;

        fn release(&mut self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn owner(script: i32) -> Owner {
        Owner::new(ScriptId(script), 0)
    }

    fn tracked(name: &'static str, log: &std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>) -> Tracked {
        Tracked {
            name,
            log: log.clone(),
        }
    }

    #[test]
    fn test_add_then_get() {
        let log = Default::default();
        let mut registry = Registry::new();
        let handle = registry.add(tracked("a", &log), owner(1));
        assert!(handle.starts_with("skein.pub:"));
        assert_eq!(registry.get(&handle).unwrap().name, "a");
        assert_eq!(registry.owner_of(&handle).unwrap(), owner(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_invalidates_handle() {
        let log = Default::default();
        let mut registry = Registry::new();
        let handle = registry.add(tracked("a", &log), owner(1));
        let removed = registry.remove(&handle).unwrap();
        assert_eq!(removed.name, "a");
        assert!(matches!(registry.get(&handle), Err(PluginError::InvalidHandle(h)) if h == handle));
        assert!(matches!(registry.remove(&handle), Err(PluginError::InvalidHandle(_))));
        assert!(registry.is_empty());
        // remove hands the resource back; releasing it is the caller's job
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_reused_slot_does_not_revive_old_handle() {
        let log = Default::default();
        let mut registry = Registry::new();
        let old = registry.add(tracked("old", &log), owner(1));
        registry.remove(&old).unwrap();
        let new = registry.add(tracked("new", &log), owner(1));

        assert_ne!(old, new);
        let old_id = Identity::from_bits(handle::decode(&old, "skein.pub").unwrap());
        let new_id = Identity::from_bits(handle::decode(&new, "skein.pub").unwrap());
        assert_eq!(old_id.slot, new_id.slot);
        assert_eq!(new_id.generation, old_id.generation + 1);

        assert!(registry.get(&old).is_err());
        assert_eq!(registry.get(&new).unwrap().name, "new");
    }

    #[test]
    fn test_handle_of_other_kind_is_rejected() {
        let log = Default::default();
        let mut registry = Registry::new();
        let handle = registry.add(tracked("a", &log), owner(1));
        let foreign = handle.replacen("skein.pub", "skein.sub", 1);
        assert!(registry.get(&foreign).is_err());
        assert!(registry.get("skein.pub:12345:9").is_err());
        assert!(registry.get("garbage").is_err());
    }

    #[test]
    fn test_find_by_owner_in_creation_order() {
        let log = Default::default();
        let mut registry = Registry::new();
        let a = registry.add(tracked("a", &log), owner(1));
        registry.add(tracked("b", &log), owner(2));
        registry.add(tracked("c", &log), owner(1));
        // d lands in a's recycled slot but is still the newest
        registry.remove(&a).unwrap();
        registry.add(tracked("d", &log), owner(1));

        let names: Vec<_> = registry.find_by_owner(owner(1)).iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["c", "d"]);
        assert_eq!(registry.handles_by_owner(owner(2)).len(), 1);
        assert_eq!(registry.handles().len(), 3);
    }

    #[test]
    fn test_release_owner_is_scoped_ordered_and_idempotent() {
        let log = Default::default();
        let mut registry = Registry::new();
        registry.add(tracked("a1", &log), owner(1));
        let b = registry.add(tracked("b1", &log), owner(2));
        registry.add(tracked("a2", &log), owner(1));
        registry.add(tracked("a3", &log), owner(1));

        let released = registry.release_owner(owner(1));
        assert_eq!(released.len(), 3);
        assert_eq!(*log.borrow(), vec!["a3", "a2", "a1"]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&b).is_ok());

        assert!(registry.release_owner(owner(1)).is_empty());
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_owner_generation_separates_contexts() {
        let log = Default::default();
        let mut registry = Registry::new();
        let first = Owner::new(ScriptId(5), 0);
        let second = Owner::new(ScriptId(5), 1);
        registry.add(tracked("old", &log), first);
        registry.add(tracked("new", &log), second);

        registry.release_owner(first);
        let names: Vec<_> = registry.find_by_owner(second).iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["new"]);
    }

    #[test]
    fn test_iter_mut_yields_ids_that_resolve() {
        let log = Default::default();
        let mut registry = Registry::new();
        let a = registry.add(tracked("a", &log), owner(1));
        let b = registry.add(tracked("b", &log), owner(1));
        let ids: Vec<_> = registry.iter_mut().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![registry.resolve(&a).unwrap(), registry.resolve(&b).unwrap()]);
        assert_eq!(registry.lookup_mut(&b).unwrap().0, ids[1]);
    }

    #[test]
    fn test_release_all() {
        let log = Default::default();
        let mut registry = Registry::new();
        registry.add(tracked("a", &log), owner(1));
        registry.add(tracked("b", &log), owner(2));
        assert_eq!(registry.release_all().len(), 2);
        assert_eq!(*log.borrow(), vec!["b", "a"]);
        assert!(registry.is_empty());
    }
}
