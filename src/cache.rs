//! Identity map from item id to shared item state.
//!
//! The cache is authoritative for the shared states currently known: the
//! only writers are the manager's load path (on miss) and its listener
//! callbacks (destroy/discard eviction). It carries its own short-lived lock
//! and is never held across persistence or provider callouts.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arbor_core::identity::ItemId;
use arbor_core::state::ItemState;

#[derive(Default)]
pub struct ItemStateCache {
    entries: Mutex<HashMap<ItemId, Arc<ItemState>>>,
}

impl ItemStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ItemId, Arc<ItemState>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cached(&self, id: &ItemId) -> bool {
        self.entries().contains_key(id)
    }

    pub fn retrieve(&self, id: &ItemId) -> Option<Arc<ItemState>> {
        self.entries().get(id).cloned()
    }

    /// Inserts a state under its own id.
    ///
    /// Caching over an existing entry is a programming error and panics;
    /// use `cache_idempotent` on notification paths that may re-announce a
    /// state already known.
    pub fn cache(&self, state: Arc<ItemState>) {
        let id = state.id().clone();
        let previous = self.entries().insert(id.clone(), state);
        if previous.is_some() {
            panic!("item state {id} is already cached");
        }
    }

    /// Inserts a state unless the identical state is already present.
    /// A different state under the same id is still a programming error.
    pub fn cache_idempotent(&self, state: Arc<ItemState>) {
        let id = state.id().clone();
        let mut entries = self.entries();
        match entries.get(&id) {
            Some(existing) if Arc::ptr_eq(existing, &state) => {}
            Some(_) => panic!("a different state for {id} is already cached"),
            None => {
                entries.insert(id, state);
            }
        }
    }

    pub fn evict(&self, id: &ItemId) -> Option<Arc<ItemState>> {
        self.entries().remove(id)
    }

    pub fn evict_all(&self) -> Vec<Arc<ItemState>> {
        self.entries().drain().map(|(_, state)| state).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Writes one JSON line per entry, for diagnostics.
    pub fn dump(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        let lines: Vec<(String, String)> = {
            let entries = self.entries();
            let mut lines: Vec<_> = entries
                .iter()
                .map(|(id, state)| (id.to_string(), state.status().to_string()))
                .collect();
            lines.sort();
            lines
        };
        for (id, status) in lines {
            let line = serde_json::json!({ "id": id, "status": status });
            writeln!(sink, "{line}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ItemStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStateCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::identity::NodeId;
    use arbor_core::name::rep_root;
    use arbor_core::state::{NodeData, Status};

    fn state(id: NodeId) -> Arc<ItemState> {
        ItemState::node(id, NodeData::new(None, rep_root().clone()), Status::Existing)
    }

    #[test]
    fn cache_and_retrieve_by_identity() {
        let cache = ItemStateCache::new();
        let id = NodeId::random();
        let s = state(id);
        cache.cache(Arc::clone(&s));
        assert!(cache.is_cached(s.id()));
        assert!(Arc::ptr_eq(&cache.retrieve(s.id()).unwrap(), &s));
        assert!(cache.evict(s.id()).is_some());
        assert!(!cache.is_cached(s.id()));
    }

    #[test]
    #[should_panic(expected = "already cached")]
    fn caching_a_duplicate_id_panics() {
        let cache = ItemStateCache::new();
        let id = NodeId::random();
        cache.cache(state(id));
        cache.cache(state(id));
    }

    #[test]
    fn cache_idempotent_accepts_the_same_state_again() {
        let cache = ItemStateCache::new();
        let s = state(NodeId::random());
        cache.cache_idempotent(Arc::clone(&s));
        cache.cache_idempotent(Arc::clone(&s));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evict_all_drains_every_entry() {
        let cache = ItemStateCache::new();
        cache.cache(state(NodeId::random()));
        cache.cache(state(NodeId::random()));
        let drained = cache.evict_all();
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn dump_writes_one_json_line_per_entry() {
        let cache = ItemStateCache::new();
        cache.cache(state(NodeId::random()));
        let mut out = Vec::new();
        cache.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["status"], "existing");
    }
}
