//! Observed commits: event derivation counts, paths, and the
//! dispatch-after-durability guarantee.

mod fixtures;

use std::sync::Arc;

use arbor_rs::name;
use arbor_rs::{
    ChangeLog, EventBus, EventKind, ItemId, Limits, PropertyId, Status, Value, ValueType,
};

use fixtures::{harness, my, nid, transient_of};

/// Seeds a `my:title` STRING property on the root.
fn seed_title(h: &fixtures::Harness) -> PropertyId {
    let prop_id = PropertyId::new(h.root_id, my("title"));
    let root = h
        .manager
        .get_item_state(&ItemId::Node(h.root_id))
        .unwrap();
    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .unwrap()
            .add_property_entry(my("title"));
    }
    let mut data = arbor_rs::PropertyData::new(ValueType::String, false);
    data.set_value(Value::String("before".into()));
    let prop = arbor_rs::ItemState::property(prop_id.clone(), data, Status::New);

    let mut log = ChangeLog::new();
    log.added(prop);
    log.modified(modified_root);
    h.manager.store(&log, None).unwrap();
    prop_id
}

#[test]
fn observed_commit_yields_exactly_the_derived_events() {
    let h = harness();
    let title = seed_title(&h);
    let bus = EventBus::new(Limits::default());
    let subscription = bus.subscribe().unwrap();

    // One added node plus one modified property.
    let child_id = nid(2);
    let root = h
        .manager
        .get_item_state(&ItemId::Node(h.root_id))
        .unwrap();
    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .unwrap()
            .add_child_entry(my("child"), child_id);
    }
    let added = fixtures::transient_node(child_id, h.root_id, name::nt_unstructured());

    let shared_title = h
        .manager
        .get_item_state(&ItemId::Property(title.clone()))
        .unwrap();
    let modified_title = transient_of(&shared_title, Status::ExistingModified);
    {
        let mut payload = modified_title.payload_mut();
        payload
            .as_property_mut()
            .unwrap()
            .set_value(Value::String("after".into()));
    }

    let mut log = ChangeLog::new();
    log.added(added);
    log.modified(modified_root);
    log.modified(modified_title);
    h.manager.store(&log, Some(&bus)).unwrap();

    let batch = subscription.recv().unwrap();
    let kinds: Vec<EventKind> = batch.iter().map(|event| event.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::NodeAdded, EventKind::PropertyChanged]
    );

    let added_event = &batch[0];
    assert_eq!(added_event.id, ItemId::Node(child_id));
    assert_eq!(added_event.parent, h.root_id);
    assert_eq!(added_event.path, format!("/{}", my("child")));

    let changed_event = &batch[1];
    assert_eq!(changed_event.id, ItemId::Property(title));
    assert_eq!(changed_event.path, format!("/{}", my("title")));

    // One batch per commit, nothing more.
    assert!(subscription.try_recv().is_err());
}

#[test]
fn deletions_are_observed_with_pre_push_paths() {
    let h = harness();
    let child_id = nid(2);
    fixtures::commit_add_child(&h, &my("child"), child_id);

    let bus = EventBus::new(Limits::default());
    let subscription = bus.subscribe().unwrap();

    let root = h
        .manager
        .get_item_state(&ItemId::Node(h.root_id))
        .unwrap();
    let child = h
        .manager
        .get_item_state(&ItemId::Node(child_id))
        .unwrap();
    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .unwrap()
            .remove_child_entry_for(child_id);
    }
    let mut log = ChangeLog::new();
    log.deleted(transient_of(&child, Status::ExistingRemoved));
    log.modified(modified_root);
    h.manager.store(&log, Some(&bus)).unwrap();

    let batch = subscription.recv().unwrap();
    let kinds: Vec<EventKind> = batch.iter().map(|event| event.kind).collect();
    assert_eq!(kinds, vec![EventKind::NodeRemoved]);
    assert_eq!(batch[0].path, format!("/{}", my("child")));
}

#[test]
fn events_are_not_dispatched_when_the_store_fails() {
    let h = harness();
    let bus = EventBus::new(Limits::default());
    let subscription = bus.subscribe().unwrap();

    let root = h
        .manager
        .get_item_state(&ItemId::Node(h.root_id))
        .unwrap();
    let child_id = nid(2);
    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .unwrap()
            .add_child_entry(my("child"), child_id);
    }
    let mut log = ChangeLog::new();
    log.added(fixtures::transient_node(
        child_id,
        h.root_id,
        name::nt_unstructured(),
    ));
    log.modified(modified_root);

    h.persistence.fail_next_store();
    assert!(h.manager.store(&log, Some(&bus)).is_err());
    assert!(subscription.try_recv().is_err());
}

#[test]
fn same_name_sibling_events_carry_indices() {
    let h = harness();
    fixtures::commit_add_child(&h, &my("item"), nid(2));

    let bus = EventBus::new(Limits::default());
    let subscription = bus.subscribe().unwrap();

    let second = nid(3);
    let root = h
        .manager
        .get_item_state(&ItemId::Node(h.root_id))
        .unwrap();
    let modified_root = transient_of(&root, Status::ExistingModified);
    {
        let mut payload = modified_root.payload_mut();
        payload
            .as_node_mut()
            .unwrap()
            .add_child_entry(my("item"), second);
    }
    let mut log = ChangeLog::new();
    log.added(fixtures::transient_node(
        second,
        h.root_id,
        name::nt_unstructured(),
    ));
    log.modified(modified_root);
    h.manager.store(&log, Some(&bus)).unwrap();

    let batch = subscription.recv().unwrap();
    assert_eq!(batch[0].kind, EventKind::NodeAdded);
    assert_eq!(batch[0].path, format!("/{}[2]", my("item")));
    assert_eq!(batch[0].primary_type.as_ref(), Some(name::nt_unstructured()));
}
