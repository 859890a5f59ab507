//! Layer 4: Item states.
//!
//! An `ItemState` is the in-memory representation of a node or property.
//! Shared states are the authoritative copies served to every session;
//! transient states are session-local overlays bound to a shared peer via
//! `connect` and flushed into it via `push`. Status transitions after a
//! durable store are driven by the change log, which fires the listener
//! notifications defined here.
//!
//! INVARIANT: a cached shared state is always `Existing` or
//! `ExistingModified` outside a commit critical section.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::identity::{ItemId, NodeId, PropertyId};
use super::name::QName;
use super::nodetype::{NodeDefId, PropDefId};
use super::value::{Value, ValueType};

/// Lifecycle status of an item state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Freshly created, never stored.
    New,
    /// In sync with the persisted state.
    Existing,
    /// Persisted, with unstored modifications.
    ExistingModified,
    /// Persisted, marked for removal.
    ExistingRemoved,
    /// Transient modifications against a shared peer that has moved on.
    StaleModified,
    /// Transient modifications against a shared peer that was destroyed.
    StaleDestroyed,
    /// Not attached to any lifecycle (initial or post-destruction).
    Undefined,
}

arbor_macros::str_enum! {
    impl Status {
        New => "new",
        Existing => "existing",
        ExistingModified => "existing_modified",
        ExistingRemoved => "existing_removed",
        StaleModified => "stale_modified",
        StaleDestroyed => "stale_destroyed",
        Undefined => "undefined",
    }
}

impl Status {
    pub fn is_stale(self) -> bool {
        matches!(self, Status::StaleModified | Status::StaleDestroyed)
    }
}

/// State-machine errors raised by overlay binding and push.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StateError {
    #[error("state {id} is already connected to a shared state")]
    AlreadyConnected { id: ItemId },
    #[error("state {id} is not connected to a shared state")]
    NotConnected { id: ItemId },
    #[error("cannot connect state {transient} to shared state {shared}: identities differ")]
    IdMismatch { transient: ItemId, shared: ItemId },
    #[error("state {id} is stale ({status})")]
    Stale { id: ItemId, status: Status },
}

/// Observer of shared-state lifecycle transitions.
///
/// Registration is weak: states never keep their listeners alive, and dead
/// entries are pruned on notification.
pub trait ItemStateListener: Send + Sync {
    /// A state was published for the first time (post-store).
    fn state_created(&self, state: &Arc<ItemState>);
    /// A state's persisted contents changed.
    fn state_modified(&self, state: &Arc<ItemState>);
    /// A state was removed from persistence.
    fn state_destroyed(&self, state: &Arc<ItemState>);
    /// A state was invalidated by an external signal.
    fn state_discarded(&self, state: &Arc<ItemState>);
}

/// A child-node entry as stored: qualified name plus node id. The 1-based
/// same-name-sibling index is derived from insertion order, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildNodeEntry {
    pub name: QName,
    pub id: NodeId,
}

/// A child-node entry with its derived same-name-sibling index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedChildEntry {
    pub name: QName,
    pub id: NodeId,
    /// 1-based position among same-named siblings, by insertion order.
    pub index: u32,
}

/// Working data of a node state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    parent: Option<NodeId>,
    primary_type: Option<QName>,
    mixin_types: BTreeSet<QName>,
    children: Vec<ChildNodeEntry>,
    property_names: BTreeSet<QName>,
    definition: Option<NodeDefId>,
}

impl NodeData {
    pub fn new(parent: Option<NodeId>, primary_type: QName) -> Self {
        Self {
            parent,
            primary_type: Some(primary_type),
            ..Self::default()
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub fn primary_type(&self) -> Option<&QName> {
        self.primary_type.as_ref()
    }

    pub fn set_primary_type(&mut self, name: QName) {
        self.primary_type = Some(name);
    }

    pub fn mixin_types(&self) -> &BTreeSet<QName> {
        &self.mixin_types
    }

    pub fn add_mixin_type(&mut self, name: QName) -> bool {
        self.mixin_types.insert(name)
    }

    pub fn remove_mixin_type(&mut self, name: &QName) -> bool {
        self.mixin_types.remove(name)
    }

    pub fn definition(&self) -> Option<NodeDefId> {
        self.definition
    }

    pub fn set_definition(&mut self, id: NodeDefId) {
        self.definition = Some(id);
    }

    /// Child entries in insertion order, with derived indices.
    pub fn child_entries(&self) -> impl Iterator<Item = IndexedChildEntry> + '_ {
        self.children.iter().enumerate().map(|(pos, entry)| {
            let index = self.index_at(pos);
            IndexedChildEntry {
                name: entry.name.clone(),
                id: entry.id,
                index,
            }
        })
    }

    /// Appends a child entry; same-named entries receive the next index.
    pub fn add_child_entry(&mut self, name: QName, id: NodeId) -> IndexedChildEntry {
        self.children.push(ChildNodeEntry {
            name: name.clone(),
            id,
        });
        let index = self.index_at(self.children.len() - 1);
        IndexedChildEntry { name, id, index }
    }

    pub fn child_entry(&self, name: &QName, index: u32) -> Option<IndexedChildEntry> {
        self.child_entries()
            .find(|entry| entry.name == *name && entry.index == index)
    }

    pub fn child_entry_for(&self, id: NodeId) -> Option<IndexedChildEntry> {
        self.child_entries().find(|entry| entry.id == id)
    }

    pub fn has_child_entry(&self, name: &QName, index: u32) -> bool {
        self.child_entry(name, index).is_some()
    }

    /// Removes the entry with the given name and index. Later same-named
    /// siblings shift down by one.
    pub fn remove_child_entry(&mut self, name: &QName, index: u32) -> bool {
        let Some(pos) = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.name == *name)
            .nth(index.saturating_sub(1) as usize)
            .map(|(pos, _)| pos)
        else {
            return false;
        };
        self.children.remove(pos);
        true
    }

    pub fn remove_child_entry_for(&mut self, id: NodeId) -> bool {
        let Some(pos) = self.children.iter().position(|entry| entry.id == id) else {
            return false;
        };
        self.children.remove(pos);
        true
    }

    fn index_at(&self, pos: usize) -> u32 {
        let name = &self.children[pos].name;
        self.children[..pos]
            .iter()
            .filter(|entry| entry.name == *name)
            .count() as u32
            + 1
    }

    pub fn property_names(&self) -> &BTreeSet<QName> {
        &self.property_names
    }

    pub fn add_property_entry(&mut self, name: QName) -> bool {
        self.property_names.insert(name)
    }

    pub fn remove_property_entry(&mut self, name: &QName) -> bool {
        self.property_names.remove(name)
    }

    pub fn has_property_entry(&self, name: &QName) -> bool {
        self.property_names.contains(name)
    }
}

/// Working data of a property state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyData {
    value_type: ValueType,
    multi_valued: bool,
    values: Vec<Value>,
    definition: Option<PropDefId>,
}

impl Default for PropertyData {
    fn default() -> Self {
        Self {
            value_type: ValueType::Undefined,
            multi_valued: false,
            values: Vec::new(),
            definition: None,
        }
    }
}

impl PropertyData {
    pub fn new(value_type: ValueType, multi_valued: bool) -> Self {
        Self {
            value_type,
            multi_valued,
            ..Self::default()
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn set_value_type(&mut self, value_type: ValueType) {
        self.value_type = value_type;
    }

    pub fn multi_valued(&self) -> bool {
        self.multi_valued
    }

    pub fn set_multi_valued(&mut self, multi_valued: bool) {
        self.multi_valued = multi_valued;
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn set_values(&mut self, values: Vec<Value>) {
        self.values = values;
    }

    pub fn set_value(&mut self, value: Value) {
        self.values = vec![value];
    }

    pub fn definition(&self) -> Option<PropDefId> {
        self.definition
    }

    pub fn set_definition(&mut self, id: PropDefId) {
        self.definition = Some(id);
    }
}

/// Payload of an item state: node data or property data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ItemData {
    Node(NodeData),
    Property(PropertyData),
}

impl ItemData {
    pub fn is_node(&self) -> bool {
        matches!(self, ItemData::Node(_))
    }

    pub fn as_node(&self) -> Option<&NodeData> {
        match self {
            ItemData::Node(data) => Some(data),
            ItemData::Property(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut NodeData> {
        match self {
            ItemData::Node(data) => Some(data),
            ItemData::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyData> {
        match self {
            ItemData::Node(_) => None,
            ItemData::Property(data) => Some(data),
        }
    }

    pub fn as_property_mut(&mut self) -> Option<&mut PropertyData> {
        match self {
            ItemData::Node(_) => None,
            ItemData::Property(data) => Some(data),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory state of a single item.
///
/// All mutation of shared states is serialized by the owning manager; the
/// internal locks only make individual field accesses safe for uncoordinated
/// readers.
pub struct ItemState {
    id: ItemId,
    status: Mutex<Status>,
    data: RwLock<ItemData>,
    overlay: OnceLock<Arc<ItemState>>,
    listeners: Mutex<Vec<Weak<dyn ItemStateListener>>>,
}

impl ItemState {
    pub fn node(id: NodeId, data: NodeData, status: Status) -> Arc<Self> {
        Arc::new(Self {
            id: ItemId::Node(id),
            status: Mutex::new(status),
            data: RwLock::new(ItemData::Node(data)),
            overlay: OnceLock::new(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn property(id: PropertyId, data: PropertyData, status: Status) -> Arc<Self> {
        Arc::new(Self {
            id: ItemId::Property(id),
            status: Mutex::new(status),
            data: RwLock::new(ItemData::Property(data)),
            overlay: OnceLock::new(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn is_node(&self) -> bool {
        self.id.denotes_node()
    }

    pub fn status(&self) -> Status {
        *lock(&self.status)
    }

    pub fn set_status(&self, status: Status) {
        *lock(&self.status) = status;
    }

    pub fn payload(&self) -> RwLockReadGuard<'_, ItemData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn payload_mut(&self) -> std::sync::RwLockWriteGuard<'_, ItemData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds this transient state to its shared peer. One-shot.
    pub fn connect(&self, shared: Arc<ItemState>) -> Result<(), StateError> {
        if shared.id != self.id {
            return Err(StateError::IdMismatch {
                transient: self.id.clone(),
                shared: shared.id.clone(),
            });
        }
        self.overlay
            .set(shared)
            .map_err(|_| StateError::AlreadyConnected {
                id: self.id.clone(),
            })
    }

    /// The shared peer this transient state is connected to, if any.
    pub fn overlayed_state(&self) -> Option<Arc<ItemState>> {
        self.overlay.get().cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.overlay.get().is_some()
    }

    /// Copies this state's working data into its shared peer.
    pub fn push(&self) -> Result<(), StateError> {
        let status = self.status();
        if status.is_stale() {
            return Err(StateError::Stale {
                id: self.id.clone(),
                status,
            });
        }
        let shared = self.overlay.get().ok_or_else(|| StateError::NotConnected {
            id: self.id.clone(),
        })?;
        let snapshot = self.payload().clone();
        *shared.payload_mut() = snapshot;
        Ok(())
    }

    /// Registers a listener. Duplicate-safe and order-independent: the same
    /// listener handle is registered at most once.
    pub fn add_listener(&self, listener: &Arc<dyn ItemStateListener>) {
        let mut listeners = lock(&self.listeners);
        let incoming = Arc::downgrade(listener);
        listeners.retain(|entry| entry.strong_count() > 0);
        if !listeners.iter().any(|entry| Weak::ptr_eq(entry, &incoming)) {
            listeners.push(incoming);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ItemStateListener>) {
        let target = Arc::downgrade(listener);
        lock(&self.listeners).retain(|entry| {
            entry.strong_count() > 0 && !Weak::ptr_eq(entry, &target)
        });
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners)
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    fn each_listener(self: &Arc<Self>, f: impl Fn(&dyn ItemStateListener, &Arc<Self>)) {
        let live: Vec<Arc<dyn ItemStateListener>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|entry| entry.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            f(listener.as_ref(), self);
        }
    }

    pub fn notify_created(self: &Arc<Self>) {
        self.each_listener(|listener, state| listener.state_created(state));
    }

    pub fn notify_modified(self: &Arc<Self>) {
        self.each_listener(|listener, state| listener.state_modified(state));
    }

    /// Publishes destruction: notifies listeners, then detaches them all and
    /// leaves the state `Undefined`.
    pub fn destroy(self: &Arc<Self>) {
        self.each_listener(|listener, state| listener.state_destroyed(state));
        self.set_status(Status::Undefined);
        lock(&self.listeners).clear();
    }

    /// Publishes external invalidation; same detach semantics as `destroy`.
    pub fn discard(self: &Arc<Self>) {
        self.each_listener(|listener, state| listener.state_discarded(state));
        self.set_status(Status::Undefined);
        lock(&self.listeners).clear();
    }
}

impl fmt::Debug for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemState")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("connected", &self.is_connected())
            .finish()
    }
}
