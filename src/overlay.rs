//! Virtual item-state providers: pluggable overlays of the namespace.
//!
//! A provider owns a subtree rooted at its virtual root id and may own
//! arbitrary further ids of its choosing (a version-storage provider owns
//! the ids of its version records). Providers must never hand out states
//! whose ids collide with UUIDs known to the base persistence layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arbor_core::identity::{ItemId, NodeId, NodeReferencesId, PropertyId};
use arbor_core::name::{self, QName};
use arbor_core::nodetype::{NodeDefId, NodeTypeRegistry, PropDefId};
use arbor_core::references::NodeReferences;
use arbor_core::state::{ItemState, ItemStateListener, NodeData, PropertyData, Status};
use arbor_core::value::ValueType;

use crate::error::ItemStateError;
use crate::Result;

/// Overlay capabilities consumed by the shared item-state manager.
pub trait VirtualItemStateProvider: Send + Sync {
    /// Root of the subtree this provider owns.
    fn virtual_root_id(&self) -> NodeId;

    fn is_virtual_root(&self, id: &ItemId) -> bool {
        matches!(id, ItemId::Node(node_id) if *node_id == self.virtual_root_id())
    }

    fn has_item_state(&self, id: &ItemId) -> bool {
        match id {
            ItemId::Node(node_id) => self.has_node_state(node_id),
            ItemId::Property(prop_id) => self.has_property_state(prop_id),
        }
    }

    fn get_item_state(&self, id: &ItemId) -> Result<Arc<ItemState>> {
        match id {
            ItemId::Node(node_id) => self.get_node_state(node_id),
            ItemId::Property(prop_id) => self.get_property_state(prop_id),
        }
    }

    fn has_node_state(&self, id: &NodeId) -> bool;

    fn get_node_state(&self, id: &NodeId) -> Result<Arc<ItemState>>;

    fn has_property_state(&self, id: &PropertyId) -> bool;

    fn get_property_state(&self, id: &PropertyId) -> Result<Arc<ItemState>>;

    fn get_node_references(&self, id: &NodeReferencesId) -> Result<NodeReferences>;

    /// Accepts a reference bundle whose target this provider owns. Returns
    /// false for foreign targets.
    fn set_node_references(&self, refs: &NodeReferences) -> bool;

    /// Builds a node state inside the provider-owned subtree.
    fn create_node_state(
        &self,
        parent: &NodeId,
        name: &QName,
        id: Option<NodeId>,
        primary_type: &QName,
    ) -> Result<Arc<ItemState>>;

    /// Builds a property state inside the provider-owned subtree.
    fn create_property_state(
        &self,
        parent: &NodeId,
        name: &QName,
        value_type: ValueType,
        multi_valued: bool,
    ) -> Result<Arc<ItemState>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory provider owning a virtual root plus the subtree built under it.
///
/// Destruction or discard of the virtual root rebuilds a fresh, empty root,
/// so the overlay namespace never disappears from under the manager.
pub struct VirtualTreeProvider {
    root_id: NodeId,
    parent_id: NodeId,
    root_type: QName,
    registry: Arc<dyn NodeTypeRegistry>,
    root: Mutex<Arc<ItemState>>,
    states: Mutex<HashMap<ItemId, Arc<ItemState>>>,
    references: Mutex<HashMap<NodeReferencesId, NodeReferences>>,
    weak_self: Weak<VirtualTreeProvider>,
}

impl VirtualTreeProvider {
    /// `parent_id` is the node under the base tree the virtual root hangs
    /// from; `root_type` is the primary type of the virtual root.
    pub fn new(
        root_id: NodeId,
        parent_id: NodeId,
        root_type: QName,
        registry: Arc<dyn NodeTypeRegistry>,
    ) -> Arc<Self> {
        let provider = Arc::new_cyclic(|weak| Self {
            root_id,
            parent_id,
            root_type: root_type.clone(),
            registry,
            root: Mutex::new(Self::build_root(root_id, parent_id, root_type)),
            states: Mutex::new(HashMap::new()),
            references: Mutex::new(HashMap::new()),
            weak_self: weak.clone(),
        });
        if let Some(listener) = provider.listener_handle() {
            lock(&provider.root).add_listener(&listener);
        }
        provider
    }

    fn build_root(root_id: NodeId, parent_id: NodeId, root_type: QName) -> Arc<ItemState> {
        let data = NodeData::new(Some(parent_id), root_type);
        ItemState::node(root_id, data, Status::Existing)
    }

    fn listener_handle(&self) -> Option<Arc<dyn ItemStateListener>> {
        self.weak_self
            .upgrade()
            .map(|me| me as Arc<dyn ItemStateListener>)
    }

    fn rebuild_root(&self) {
        let fresh = Self::build_root(self.root_id, self.parent_id, self.root_type.clone());
        if let Some(listener) = self.listener_handle() {
            fresh.add_listener(&listener);
        }
        *lock(&self.root) = fresh;
        tracing::debug!(root = %self.root_id, "virtual root rebuilt");
    }

    fn owns(&self, id: &ItemId) -> bool {
        if matches!(id, ItemId::Node(node_id) if *node_id == self.root_id) {
            return true;
        }
        lock(&self.states).contains_key(id)
    }

    /// Definition id for a child named `name` under `parent`, falling back
    /// to `nt:unstructured`'s child definitions.
    fn child_def_for(&self, parent: &Arc<ItemState>, name: &QName) -> Option<NodeDefId> {
        let parent_type = {
            let payload = parent.payload();
            payload.as_node().and_then(|node| node.primary_type().cloned())
        }?;
        for type_name in [&parent_type, name::nt_unstructured()] {
            if let Ok(def) = self.registry.node_type_def(type_name) {
                if let Some(child_def) = def
                    .child_defs
                    .iter()
                    .find(|child| child.name == *name)
                    .or_else(|| def.child_defs.first())
                {
                    return Some(child_def.id);
                }
            }
        }
        None
    }

    fn prop_def_for(&self, parent: &Arc<ItemState>, name: &QName) -> Option<PropDefId> {
        let parent_type = {
            let payload = parent.payload();
            payload.as_node().and_then(|node| node.primary_type().cloned())
        }?;
        for type_name in [&parent_type, name::nt_base()] {
            if let Ok(def) = self.registry.node_type_def(type_name) {
                if let Some(prop_def) = def.property_defs.iter().find(|prop| prop.name == *name) {
                    return Some(prop_def.id);
                }
            }
        }
        None
    }
}

impl VirtualItemStateProvider for VirtualTreeProvider {
    fn virtual_root_id(&self) -> NodeId {
        self.root_id
    }

    fn has_node_state(&self, id: &NodeId) -> bool {
        *id == self.root_id || lock(&self.states).contains_key(&ItemId::Node(*id))
    }

    fn get_node_state(&self, id: &NodeId) -> Result<Arc<ItemState>> {
        if *id == self.root_id {
            return Ok(Arc::clone(&lock(&self.root)));
        }
        lock(&self.states)
            .get(&ItemId::Node(*id))
            .cloned()
            .ok_or_else(|| ItemStateError::NoSuchItem(ItemId::Node(*id)))
    }

    fn has_property_state(&self, id: &PropertyId) -> bool {
        lock(&self.states).contains_key(&ItemId::Property(id.clone()))
    }

    fn get_property_state(&self, id: &PropertyId) -> Result<Arc<ItemState>> {
        lock(&self.states)
            .get(&ItemId::Property(id.clone()))
            .cloned()
            .ok_or_else(|| ItemStateError::NoSuchItem(ItemId::Property(id.clone())))
    }

    fn get_node_references(&self, id: &NodeReferencesId) -> Result<NodeReferences> {
        if !self.owns(&ItemId::Node(id.target())) {
            return Err(ItemStateError::NoSuchReferences(*id));
        }
        Ok(lock(&self.references)
            .get(id)
            .cloned()
            .unwrap_or_else(|| NodeReferences::new(*id)))
    }

    fn set_node_references(&self, refs: &NodeReferences) -> bool {
        if !self.owns(&ItemId::Node(refs.target())) {
            return false;
        }
        let mut references = lock(&self.references);
        if refs.has_references() {
            references.insert(refs.id(), refs.clone());
        } else {
            references.remove(&refs.id());
        }
        true
    }

    fn create_node_state(
        &self,
        parent: &NodeId,
        name: &QName,
        id: Option<NodeId>,
        primary_type: &QName,
    ) -> Result<Arc<ItemState>> {
        let parent_state = self.get_node_state(parent)?;
        let id = id.unwrap_or_else(NodeId::random);

        let mut data = NodeData::new(Some(*parent), primary_type.clone());
        if let Some(def) = self.child_def_for(&parent_state, name) {
            data.set_definition(def);
        }
        let state = ItemState::node(id, data, Status::Existing);
        if let Some(listener) = self.listener_handle() {
            state.add_listener(&listener);
        }

        {
            let mut payload = parent_state.payload_mut();
            if let Some(node) = payload.as_node_mut() {
                node.add_child_entry(name.clone(), id);
            }
        }
        lock(&self.states).insert(ItemId::Node(id), Arc::clone(&state));
        Ok(state)
    }

    fn create_property_state(
        &self,
        parent: &NodeId,
        name: &QName,
        value_type: ValueType,
        multi_valued: bool,
    ) -> Result<Arc<ItemState>> {
        let parent_state = self.get_node_state(parent)?;
        let id = PropertyId::new(*parent, name.clone());

        let mut data = PropertyData::new(value_type, multi_valued);
        if let Some(def) = self.prop_def_for(&parent_state, name) {
            data.set_definition(def);
        }
        let state = ItemState::property(id.clone(), data, Status::Existing);
        if let Some(listener) = self.listener_handle() {
            state.add_listener(&listener);
        }

        {
            let mut payload = parent_state.payload_mut();
            if let Some(node) = payload.as_node_mut() {
                node.add_property_entry(name.clone());
            }
        }
        lock(&self.states).insert(ItemId::Property(id), Arc::clone(&state));
        Ok(state)
    }
}

impl ItemStateListener for VirtualTreeProvider {
    fn state_created(&self, _state: &Arc<ItemState>) {}

    fn state_modified(&self, _state: &Arc<ItemState>) {}

    fn state_destroyed(&self, state: &Arc<ItemState>) {
        lock(&self.states).remove(state.id());
        if matches!(state.id(), ItemId::Node(id) if *id == self.root_id) {
            self.rebuild_root();
        }
    }

    fn state_discarded(&self, state: &Arc<ItemState>) {
        lock(&self.states).remove(state.id());
        if matches!(state.id(), ItemId::Node(id) if *id == self.root_id) {
            self.rebuild_root();
        }
    }
}
