//! Shared helpers for integration tests: deterministic ids, a booted
//! manager harness, and transient-state builders.

#![allow(dead_code)]

use std::sync::Arc;

use arbor_rs::name::{self, NS_DEFAULT_URI};
use arbor_rs::persistence::PersistenceManager;
use arbor_rs::{
    BuiltinNodeTypeRegistry, ChangeLog, ItemData, ItemId, ItemState, MemoryPersistenceManager,
    NodeData, NodeId, PropertyData, PropertyId, QName, SharedItemStateManager, Status, Value,
    ValueType,
};

pub const ROOT_UUID: &str = "cafebabe-0000-0000-0000-000000000001";
pub const NS_MY_URI: &str = "http://example.com/my/1.0";

/// Deterministic node id within the test uuid block.
pub fn nid(n: u32) -> NodeId {
    NodeId::parse_str(&format!("cafebabe-0000-0000-0000-{n:012x}")).expect("test uuid")
}

pub fn root_id() -> NodeId {
    NodeId::parse_str(ROOT_UUID).expect("root uuid")
}

pub fn qn(local: &str) -> QName {
    QName::new(NS_DEFAULT_URI, local).expect("test name")
}

pub fn my(local: &str) -> QName {
    QName::new(NS_MY_URI, local).expect("test name")
}

pub struct Harness {
    pub persistence: Arc<MemoryPersistenceManager>,
    pub manager: SharedItemStateManager,
    pub root_id: NodeId,
}

/// Boots a manager over empty in-memory persistence with the builtin
/// registry and the literal root uuid.
pub fn harness() -> Harness {
    let persistence = Arc::new(MemoryPersistenceManager::new());
    let registry = BuiltinNodeTypeRegistry::new();
    let manager = SharedItemStateManager::new(
        Arc::clone(&persistence) as Arc<dyn PersistenceManager>,
        root_id(),
        &registry,
    )
    .expect("bootstrap");
    Harness {
        persistence,
        manager,
        root_id: root_id(),
    }
}

/// Fresh transient node state, as a session would build one.
pub fn transient_node(id: NodeId, parent: NodeId, primary_type: &QName) -> Arc<ItemState> {
    ItemState::node(id, NodeData::new(Some(parent), primary_type.clone()), Status::New)
}

/// Fresh transient `jcr:primaryType` property for a node.
pub fn transient_primary_type(parent: NodeId, primary_type: &QName) -> Arc<ItemState> {
    let mut data = PropertyData::new(ValueType::Name, false);
    data.set_value(Value::Name(primary_type.clone()));
    ItemState::property(
        PropertyId::new(parent, name::jcr_primary_type().clone()),
        data,
        Status::New,
    )
}

/// Transient copy of a shared state's current payload under a new status.
pub fn transient_of(shared: &Arc<ItemState>, status: Status) -> Arc<ItemState> {
    let payload = shared.payload().clone();
    match (shared.id().clone(), payload) {
        (ItemId::Node(id), ItemData::Node(data)) => ItemState::node(id, data, status),
        (ItemId::Property(id), ItemData::Property(data)) => ItemState::property(id, data, status),
        _ => unreachable!("payload kind matches id kind"),
    }
}

/// Commits a new child of the root: the child node, its `jcr:primaryType`
/// property, and the root's updated child entries.
pub fn commit_add_child(harness: &Harness, child_name: &QName, child_id: NodeId) {
    let root = harness
        .manager
        .get_item_state(&ItemId::Node(harness.root_id))
        .expect("root state");

    let child = transient_node(child_id, harness.root_id, name::nt_unstructured());
    {
        let mut payload = child.payload_mut();
        payload
            .as_node_mut()
            .expect("node payload")
            .add_property_entry(name::jcr_primary_type().clone());
    }
    let primary = transient_primary_type(child_id, name::nt_unstructured());

    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .expect("node payload")
            .add_child_entry(child_name.clone(), child_id);
    }

    let mut log = ChangeLog::new();
    log.added(child);
    log.added(primary);
    log.modified(modified_root);
    harness.manager.store(&log, None).expect("commit add child");
}

/// Commits the removal of a root child added by `commit_add_child`.
pub fn commit_delete_child(harness: &Harness, child_id: NodeId) {
    let root = harness
        .manager
        .get_item_state(&ItemId::Node(harness.root_id))
        .expect("root state");
    let child = harness
        .manager
        .get_item_state(&ItemId::Node(child_id))
        .expect("child state");
    let primary_id = PropertyId::new(child_id, name::jcr_primary_type().clone());
    let primary = harness
        .manager
        .get_item_state(&ItemId::Property(primary_id))
        .expect("child primary type");

    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .expect("node payload")
            .remove_child_entry_for(child_id);
    }

    let mut log = ChangeLog::new();
    log.deleted(transient_of(&child, Status::ExistingRemoved));
    log.deleted(transient_of(&primary, Status::ExistingRemoved));
    log.modified(modified_root);
    harness
        .manager
        .store(&log, None)
        .expect("commit delete child");
}
