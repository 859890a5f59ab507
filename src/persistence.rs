//! Persistence engine interface, plus an in-memory engine.
//!
//! The engine owns byte-level durability and must apply a change log as one
//! atomic unit: on error, no persisted change may be observable. Everything
//! above the payload level (caching, reconnection, events) is the manager's
//! business.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arbor_core::changelog::ChangeLog;
use arbor_core::identity::{ItemId, NodeId, NodeReferencesId, PropertyId};
use arbor_core::references::NodeReferences;
use arbor_core::state::{ItemData, ItemState, NodeData, PropertyData, Status};

use crate::error::ItemStateError;
use crate::Result;

/// Durable storage of item payloads and reference bundles.
pub trait PersistenceManager: Send + Sync {
    fn load_node(&self, id: &NodeId) -> Result<NodeData>;

    fn load_property(&self, id: &PropertyId) -> Result<PropertyData>;

    fn load_references(&self, id: &NodeReferencesId) -> Result<NodeReferences>;

    fn exists(&self, id: &ItemId) -> Result<bool>;

    /// Fresh `New` node state under this engine's control. No I/O.
    fn create_new_node(&self, id: NodeId) -> Arc<ItemState> {
        ItemState::node(id, NodeData::default(), Status::New)
    }

    /// Fresh `New` property state under this engine's control. No I/O.
    fn create_new_property(&self, id: PropertyId) -> Arc<ItemState> {
        ItemState::property(id, PropertyData::default(), Status::New)
    }

    /// Stores a change log atomically: added and modified states are written
    /// from their current payloads, deleted states are removed, reference
    /// bundles are replaced (or dropped once empty).
    fn store(&self, log: &ChangeLog) -> Result<()>;
}

#[derive(Default)]
struct MemoryStore {
    nodes: HashMap<NodeId, NodeData>,
    properties: HashMap<PropertyId, PropertyData>,
    references: HashMap<NodeReferencesId, NodeReferences>,
}

/// In-memory persistence engine.
///
/// Atomicity is trivial: the whole log is applied under one lock, and the
/// only failure point (the injected one below) fires before any mutation.
#[derive(Default)]
pub struct MemoryPersistenceManager {
    store: Mutex<MemoryStore>,
    fail_next_store: AtomicBool,
}

impl MemoryPersistenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `store` call fail without applying anything. Test
    /// hook for commit-failure paths.
    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }

    fn locked(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node_count(&self) -> usize {
        self.locked().nodes.len()
    }

    pub fn property_count(&self) -> usize {
        self.locked().properties.len()
    }
}

impl PersistenceManager for MemoryPersistenceManager {
    fn load_node(&self, id: &NodeId) -> Result<NodeData> {
        self.locked()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| ItemStateError::NoSuchItem(ItemId::Node(*id)))
    }

    fn load_property(&self, id: &PropertyId) -> Result<PropertyData> {
        self.locked()
            .properties
            .get(id)
            .cloned()
            .ok_or_else(|| ItemStateError::NoSuchItem(ItemId::Property(id.clone())))
    }

    fn load_references(&self, id: &NodeReferencesId) -> Result<NodeReferences> {
        self.locked()
            .references
            .get(id)
            .cloned()
            .ok_or(ItemStateError::NoSuchReferences(*id))
    }

    fn exists(&self, id: &ItemId) -> Result<bool> {
        let store = self.locked();
        Ok(match id {
            ItemId::Node(node_id) => store.nodes.contains_key(node_id),
            ItemId::Property(prop_id) => store.properties.contains_key(prop_id),
        })
    }

    fn store(&self, log: &ChangeLog) -> Result<()> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(ItemStateError::persistence("injected store failure"));
        }

        let mut store = self.locked();
        for state in log.added_states().chain(log.modified_states()) {
            let payload = state.payload();
            match (state.id(), &*payload) {
                (ItemId::Node(id), ItemData::Node(data)) => {
                    store.nodes.insert(*id, data.clone());
                }
                (ItemId::Property(id), ItemData::Property(data)) => {
                    store.properties.insert(id.clone(), data.clone());
                }
                (id, _) => {
                    return Err(ItemStateError::persistence(format!(
                        "payload kind does not match id {id}"
                    )));
                }
            }
        }
        for state in log.deleted_states() {
            match state.id() {
                ItemId::Node(id) => {
                    store.nodes.remove(id);
                    store.references.remove(&NodeReferencesId::new(*id));
                }
                ItemId::Property(id) => {
                    store.properties.remove(id);
                }
            }
        }
        for refs in log.modified_refs() {
            if refs.has_references() {
                store.references.insert(refs.id(), refs.clone());
            } else {
                store.references.remove(&refs.id());
            }
        }
        Ok(())
    }
}
