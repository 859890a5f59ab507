//! Diagnostic dump output.

mod fixtures;

use std::fs::File;
use std::io::Read;

use arbor_rs::ItemId;

use fixtures::{commit_add_child, harness, my, nid};

#[test]
fn dump_renders_every_cached_entry() {
    let h = harness();
    commit_add_child(&h, &my("child"), nid(2));
    h.manager.get_item_state(&ItemId::Node(nid(2))).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.txt");
    let mut file = File::create(&path).unwrap();
    h.manager.dump(&mut file).unwrap();
    drop(file);

    let mut text = String::new();
    File::open(&path)
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    assert!(text.starts_with("SharedItemStateManager"));
    // Root, its primary-type property, the child, and the child's
    // primary-type property are all cached after the commit.
    assert!(text.lines().count() >= 4);
    assert!(text.contains(&nid(2).to_string()));
    for line in text.lines().skip(1) {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["status"], "existing");
    }
}
