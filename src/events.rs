//! Event derivation: typed events from a change log and the pre-push view.
//!
//! Events are computed during commit, strictly before the transient data is
//! pushed into shared states, and dispatched only after the durable store
//! succeeded. Paths are absolute, rooted at the
//! repository root, with 1-based same-name-sibling indices (`/a/b[2]`).

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use arbor_core::changelog::ChangeLog;
use arbor_core::identity::{ItemId, NodeId, PropertyId};
use arbor_core::name::QName;
use arbor_core::state::{IndexedChildEntry, ItemState};

use crate::error::ItemStateError;
use crate::Result;

/// Kind of a derived event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    PropertyAdded,
    PropertyChanged,
    PropertyRemoved,
}

arbor_macros::str_enum! {
    impl EventKind {
        NodeAdded => "node_added",
        NodeRemoved => "node_removed",
        PropertyAdded => "property_added",
        PropertyChanged => "property_changed",
        PropertyRemoved => "property_removed",
    }
}

/// One derived event.
///
/// `primary_type` carries the affected node's type for node events and the
/// parent node's type for property events, when resolvable.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventState {
    pub kind: EventKind,
    pub id: ItemId,
    pub parent: NodeId,
    pub path: String,
    pub primary_type: Option<QName>,
}

/// Read access to item states during event derivation: the shared, pre-push
/// view of the repository.
pub trait ItemStateSource {
    fn item_state(&self, id: &ItemId) -> Option<Arc<ItemState>>;
}

/// Receiver of dispatched event batches.
pub trait EventSink: Send + Sync {
    fn deliver(&self, events: Vec<EventState>);
}

/// Supplier of event collections, consulted once per observed commit.
pub trait ObservationManager: Send + Sync {
    fn create_event_state_collection(&self) -> EventStateCollection;
}

/// A batch of events for one commit: derived, then prepared, then
/// dispatched.
pub struct EventStateCollection {
    events: Vec<EventState>,
    prepared: bool,
    sink: Arc<dyn EventSink>,
}

impl EventStateCollection {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            events: Vec::new(),
            prepared: false,
            sink,
        }
    }

    pub fn events(&self) -> &[EventState] {
        &self.events
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Derives the events of `log` against the pre-push view in `source`.
    ///
    /// Added and modified states resolve through the log first (their names
    /// and entries live on the transient side); removals resolve through
    /// `source` alone, where the pre-push hierarchy is still intact.
    pub fn create_event_states(
        &mut self,
        root: NodeId,
        log: &ChangeLog,
        source: &dyn ItemStateSource,
    ) -> Result<()> {
        let added_nodes: HashSet<NodeId> = log
            .added_states()
            .filter_map(|state| state.id().node_id())
            .collect();
        let deleted_nodes: HashSet<NodeId> = log
            .deleted_states()
            .filter_map(|state| state.id().node_id())
            .collect();
        let view = LogFirst { log, source };

        for state in log.added_states() {
            match state.id() {
                ItemId::Node(id) => {
                    let path = node_path(root, *id, &view)?;
                    let (parent, primary_type) = node_facts(*id, &view);
                    self.events.push(EventState {
                        kind: EventKind::NodeAdded,
                        id: state.id().clone(),
                        parent: parent.unwrap_or(root),
                        path,
                        primary_type,
                    });
                }
                ItemId::Property(id) => {
                    self.events
                        .push(property_event(EventKind::PropertyAdded, root, id, &view)?);
                }
            }
        }

        for state in log.modified_states() {
            match state.id() {
                ItemId::Node(id) => {
                    self.diff_child_entries(
                        root,
                        *id,
                        state,
                        &view,
                        source,
                        &added_nodes,
                        &deleted_nodes,
                    )?;
                }
                ItemId::Property(id) => {
                    self.events
                        .push(property_event(EventKind::PropertyChanged, root, id, &view)?);
                }
            }
        }

        for state in log.deleted_states() {
            let shared = SharedOnly { source };
            match state.id() {
                ItemId::Node(id) => {
                    let path = node_path(root, *id, &shared)?;
                    let (parent, primary_type) = node_facts(*id, &shared);
                    self.events.push(EventState {
                        kind: EventKind::NodeRemoved,
                        id: state.id().clone(),
                        parent: parent.unwrap_or(root),
                        path,
                        primary_type,
                    });
                }
                ItemId::Property(id) => {
                    self.events.push(property_event(
                        EventKind::PropertyRemoved,
                        root,
                        id,
                        &shared,
                    )?);
                }
            }
        }

        Ok(())
    }

    /// Compares a modified node's transient child entries with its shared
    /// peer's. Entries that appear or vanish without a matching add or
    /// delete in the log are moves or reorders and yield their own events.
    #[allow(clippy::too_many_arguments)]
    fn diff_child_entries(
        &mut self,
        root: NodeId,
        id: NodeId,
        transient: &Arc<ItemState>,
        view: &dyn ItemStateSource,
        source: &dyn ItemStateSource,
        added_nodes: &HashSet<NodeId>,
        deleted_nodes: &HashSet<NodeId>,
    ) -> Result<()> {
        let Some(shared) = transient.overlayed_state() else {
            tracing::debug!(node = %id, "modified node not connected, skipping child diff");
            return Ok(());
        };
        let before: Vec<IndexedChildEntry> = {
            let payload = shared.payload();
            match payload.as_node() {
                Some(node) => node.child_entries().collect(),
                None => return Ok(()),
            }
        };
        let after: Vec<IndexedChildEntry> = {
            let payload = transient.payload();
            match payload.as_node() {
                Some(node) => node.child_entries().collect(),
                None => return Ok(()),
            }
        };

        let before_ids: HashSet<NodeId> = before.iter().map(|entry| entry.id).collect();
        let after_ids: HashSet<NodeId> = after.iter().map(|entry| entry.id).collect();
        let parent_path = node_path(root, id, view)?;

        for entry in &after {
            if before_ids.contains(&entry.id) || added_nodes.contains(&entry.id) {
                continue;
            }
            let primary_type = node_facts(entry.id, view).1;
            self.events.push(EventState {
                kind: EventKind::NodeAdded,
                id: ItemId::Node(entry.id),
                parent: id,
                path: join(&parent_path, &segment(entry)),
                primary_type,
            });
        }
        for entry in &before {
            if after_ids.contains(&entry.id) || deleted_nodes.contains(&entry.id) {
                continue;
            }
            let shared_view = SharedOnly { source };
            let primary_type = node_facts(entry.id, &shared_view).1;
            self.events.push(EventState {
                kind: EventKind::NodeRemoved,
                id: ItemId::Node(entry.id),
                parent: id,
                path: join(&parent_path, &segment(entry)),
                primary_type,
            });
        }
        Ok(())
    }

    /// Seals the batch for dispatch.
    pub fn prepare(&mut self) {
        self.prepared = true;
    }

    /// Publishes the batch to the sink. Must only be called after the
    /// commit is durable.
    pub fn dispatch(self) {
        if !self.prepared {
            tracing::warn!("dispatch of an unprepared event collection, dropping");
            return;
        }
        if !self.events.is_empty() {
            self.sink.deliver(self.events);
        }
    }
}

struct LogFirst<'a> {
    log: &'a ChangeLog,
    source: &'a dyn ItemStateSource,
}

impl ItemStateSource for LogFirst<'_> {
    fn item_state(&self, id: &ItemId) -> Option<Arc<ItemState>> {
        if let Some(state) = self.log.get(id) {
            return Some(Arc::clone(state));
        }
        self.source.item_state(id)
    }
}

struct SharedOnly<'a> {
    source: &'a dyn ItemStateSource,
}

impl ItemStateSource for SharedOnly<'_> {
    fn item_state(&self, id: &ItemId) -> Option<Arc<ItemState>> {
        self.source.item_state(id)
    }
}

fn property_event(
    kind: EventKind,
    root: NodeId,
    id: &PropertyId,
    view: &dyn ItemStateSource,
) -> Result<EventState> {
    let parent = id.parent();
    let parent_path = node_path(root, parent, view)?;
    let primary_type = node_facts(parent, view).1;
    Ok(EventState {
        kind,
        id: ItemId::Property(id.clone()),
        parent,
        path: join(&parent_path, &id.name().to_string()),
        primary_type,
    })
}

/// Absolute path of a node, built by climbing the parent chain to `root`.
fn node_path(root: NodeId, id: NodeId, view: &dyn ItemStateSource) -> Result<String> {
    if id == root {
        return Ok("/".to_string());
    }
    let mut segments = Vec::new();
    let mut current = id;
    loop {
        let state = view
            .item_state(&ItemId::Node(current))
            .ok_or(ItemStateError::NoSuchItem(ItemId::Node(current)))?;
        let parent = {
            let payload = state.payload();
            payload.as_node().and_then(|node| node.parent())
        }
        .ok_or(ItemStateError::NoSuchItem(ItemId::Node(current)))?;

        let parent_state = view
            .item_state(&ItemId::Node(parent))
            .ok_or(ItemStateError::NoSuchItem(ItemId::Node(parent)))?;
        let entry = {
            let payload = parent_state.payload();
            payload
                .as_node()
                .and_then(|node| node.child_entry_for(current))
        }
        .ok_or(ItemStateError::NoSuchItem(ItemId::Node(current)))?;
        segments.push(segment(&entry));

        if parent == root {
            break;
        }
        current = parent;
    }
    segments.reverse();
    Ok(format!("/{}", segments.join("/")))
}

fn node_facts(id: NodeId, view: &dyn ItemStateSource) -> (Option<NodeId>, Option<QName>) {
    let Some(state) = view.item_state(&ItemId::Node(id)) else {
        return (None, None);
    };
    let payload = state.payload();
    match payload.as_node() {
        Some(node) => (node.parent(), node.primary_type().cloned()),
        None => (None, None),
    }
}

fn segment(entry: &IndexedChildEntry) -> String {
    if entry.index > 1 {
        format!("{}[{}]", entry.name, entry.index)
    } else {
        entry.name.to_string()
    }
}

fn join(parent_path: &str, segment: &str) -> String {
    if parent_path == "/" {
        format!("/{segment}")
    } else {
        format!("{parent_path}/{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::name::{nt_unstructured, QName, NS_DEFAULT_URI};
    use arbor_core::state::{NodeData, PropertyData, Status};
    use arbor_core::value::{Value, ValueType};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn name(local: &str) -> QName {
        QName::new(NS_DEFAULT_URI, local).unwrap()
    }

    #[derive(Default)]
    struct MapSource {
        states: HashMap<ItemId, Arc<ItemState>>,
    }

    impl MapSource {
        fn insert(&mut self, state: Arc<ItemState>) {
            self.states.insert(state.id().clone(), state);
        }
    }

    impl ItemStateSource for MapSource {
        fn item_state(&self, id: &ItemId) -> Option<Arc<ItemState>> {
            self.states.get(id).cloned()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<EventState>>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, events: Vec<EventState>) {
            self.batches.lock().unwrap().push(events);
        }
    }

    fn tree_with_root() -> (NodeId, MapSource) {
        let root = NodeId::random();
        let mut source = MapSource::default();
        source.insert(ItemState::node(
            root,
            NodeData::new(None, nt_unstructured().clone()),
            Status::Existing,
        ));
        (root, source)
    }

    #[test]
    fn added_node_and_property_yield_events_with_paths() {
        let (root, source) = tree_with_root();
        let child = NodeId::random();

        // Transient picture: root gains child `a`, the child brings a
        // `title` property.
        let mut root_data = NodeData::new(None, nt_unstructured().clone());
        root_data.add_child_entry(name("a"), child);
        let t_root = ItemState::node(root, root_data, Status::ExistingModified);
        t_root
            .connect(source.item_state(&ItemId::Node(root)).unwrap())
            .unwrap();

        let t_child = ItemState::node(
            child,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::New,
        );
        let prop_id = PropertyId::new(child, name("title"));
        let mut prop_data = PropertyData::new(ValueType::String, false);
        prop_data.set_value(Value::String("x".into()));
        let t_prop = ItemState::property(prop_id, prop_data, Status::New);

        let mut log = ChangeLog::new();
        log.added(t_child);
        log.added(t_prop);
        log.modified(t_root);

        let sink = Arc::new(RecordingSink::default());
        let mut collection = EventStateCollection::new(sink);
        collection.create_event_states(root, &log, &source).unwrap();

        let kinds: Vec<EventKind> = collection.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::NodeAdded, EventKind::PropertyAdded]);
        assert_eq!(collection.events()[0].path, "/a");
        assert_eq!(collection.events()[1].path, "/a/title");
        assert_eq!(
            collection.events()[0].primary_type.as_ref(),
            Some(nt_unstructured())
        );
    }

    #[test]
    fn removed_node_resolves_its_path_from_the_shared_view() {
        let (root, mut source) = tree_with_root();
        let child = NodeId::random();

        // Shared picture still contains the child.
        {
            let root_state = source.item_state(&ItemId::Node(root)).unwrap();
            let mut payload = root_state.payload_mut();
            payload
                .as_node_mut()
                .unwrap()
                .add_child_entry(name("gone"), child);
        }
        let shared_child = ItemState::node(
            child,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::Existing,
        );
        source.insert(Arc::clone(&shared_child));

        // Transient picture: root no longer lists it, child is deleted.
        let root_data = NodeData::new(None, nt_unstructured().clone());
        let t_root = ItemState::node(root, root_data, Status::ExistingModified);
        t_root
            .connect(source.item_state(&ItemId::Node(root)).unwrap())
            .unwrap();
        let t_child = ItemState::node(
            child,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::ExistingRemoved,
        );
        t_child.connect(shared_child).unwrap();

        let mut log = ChangeLog::new();
        log.modified(t_root);
        log.deleted(t_child);

        let mut collection = EventStateCollection::new(Arc::new(RecordingSink::default()));
        collection.create_event_states(root, &log, &source).unwrap();

        let kinds: Vec<EventKind> = collection.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::NodeRemoved]);
        assert_eq!(collection.events()[0].path, "/gone");
    }

    #[test]
    fn same_name_siblings_render_indexed_paths() {
        let (root, source) = tree_with_root();
        let first = NodeId::random();
        let second = NodeId::random();

        let mut root_data = NodeData::new(None, nt_unstructured().clone());
        root_data.add_child_entry(name("a"), first);
        root_data.add_child_entry(name("a"), second);
        let t_root = ItemState::node(root, root_data, Status::ExistingModified);
        t_root
            .connect(source.item_state(&ItemId::Node(root)).unwrap())
            .unwrap();

        let mut log = ChangeLog::new();
        log.added(ItemState::node(
            first,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::New,
        ));
        log.added(ItemState::node(
            second,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::New,
        ));
        log.modified(t_root);

        let mut collection = EventStateCollection::new(Arc::new(RecordingSink::default()));
        collection.create_event_states(root, &log, &source).unwrap();

        let paths: Vec<&str> = collection
            .events()
            .iter()
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(paths, vec!["/a", "/a[2]"]);
    }

    #[test]
    fn child_diff_reports_moves_without_double_counting() {
        let (root, mut source) = tree_with_root();
        let kept = NodeId::random();
        let moved_in = NodeId::random();

        {
            let root_state = source.item_state(&ItemId::Node(root)).unwrap();
            let mut payload = root_state.payload_mut();
            payload
                .as_node_mut()
                .unwrap()
                .add_child_entry(name("kept"), kept);
        }
        source.insert(ItemState::node(
            moved_in,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::Existing,
        ));

        // The transient root gains `moved_in`, which is neither added nor
        // deleted in the log: a move.
        let mut root_data = NodeData::new(None, nt_unstructured().clone());
        root_data.add_child_entry(name("kept"), kept);
        root_data.add_child_entry(name("incoming"), moved_in);
        let t_root = ItemState::node(root, root_data, Status::ExistingModified);
        t_root
            .connect(source.item_state(&ItemId::Node(root)).unwrap())
            .unwrap();

        let mut log = ChangeLog::new();
        log.modified(t_root);

        let mut collection = EventStateCollection::new(Arc::new(RecordingSink::default()));
        collection.create_event_states(root, &log, &source).unwrap();

        let kinds: Vec<EventKind> = collection.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::NodeAdded]);
        assert_eq!(collection.events()[0].path, "/incoming");
    }

    #[test]
    fn dispatch_requires_prepare() {
        let sink = Arc::new(RecordingSink::default());
        let (root, source) = tree_with_root();
        let child = NodeId::random();
        let mut log = ChangeLog::new();
        log.added(ItemState::node(
            child,
            NodeData::new(Some(root), nt_unstructured().clone()),
            Status::New,
        ));
        // Give the child a resolvable path.
        {
            let root_state = source.item_state(&ItemId::Node(root)).unwrap();
            let mut payload = root_state.payload_mut();
            payload
                .as_node_mut()
                .unwrap()
                .add_child_entry(name("c"), child);
        }

        let mut unprepared = EventStateCollection::new(Arc::clone(&sink) as Arc<dyn EventSink>);
        unprepared
            .create_event_states(root, &log, &source)
            .unwrap();
        unprepared.dispatch();
        assert!(sink.batches.lock().unwrap().is_empty());

        let mut prepared = EventStateCollection::new(Arc::clone(&sink) as Arc<dyn EventSink>);
        prepared.create_event_states(root, &log, &source).unwrap();
        prepared.prepare();
        prepared.dispatch();
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }
}
