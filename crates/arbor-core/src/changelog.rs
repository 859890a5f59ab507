//! Layer 5: Change logs.
//!
//! A change log groups the added, modified, and deleted item states of one
//! commit, plus the reference bundles it touches. Entries are kept in
//! insertion order and deduplicated by item id. The log is owned by a single
//! session and is not itself thread-safe.

use std::sync::Arc;

use super::identity::ItemId;
use super::references::NodeReferences;
use super::state::{ItemState, StateError, Status};

/// The commit unit: grouped item states plus touched reference bundles.
#[derive(Default)]
pub struct ChangeLog {
    added: Vec<Arc<ItemState>>,
    modified: Vec<Arc<ItemState>>,
    deleted: Vec<Arc<ItemState>>,
    modified_refs: Vec<NodeReferences>,
}

fn upsert(entries: &mut Vec<Arc<ItemState>>, state: Arc<ItemState>) {
    match entries.iter_mut().find(|entry| entry.id() == state.id()) {
        Some(slot) => *slot = state,
        None => entries.push(state),
    }
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a state as added. A later entry with the same id replaces the
    /// earlier one.
    pub fn added(&mut self, state: Arc<ItemState>) {
        upsert(&mut self.added, state);
    }

    pub fn modified(&mut self, state: Arc<ItemState>) {
        upsert(&mut self.modified, state);
    }

    pub fn deleted(&mut self, state: Arc<ItemState>) {
        upsert(&mut self.deleted, state);
    }

    /// Records a reference bundle as modified, keyed by target.
    pub fn modified_references(&mut self, refs: NodeReferences) {
        match self
            .modified_refs
            .iter_mut()
            .find(|entry| entry.id() == refs.id())
        {
            Some(slot) => *slot = refs,
            None => self.modified_refs.push(refs),
        }
    }

    pub fn added_states(&self) -> impl Iterator<Item = &Arc<ItemState>> {
        self.added.iter()
    }

    pub fn modified_states(&self) -> impl Iterator<Item = &Arc<ItemState>> {
        self.modified.iter()
    }

    pub fn deleted_states(&self) -> impl Iterator<Item = &Arc<ItemState>> {
        self.deleted.iter()
    }

    pub fn modified_refs(&self) -> impl Iterator<Item = &NodeReferences> {
        self.modified_refs.iter()
    }

    /// Looks an id up across the added and modified sets. Ids recorded as
    /// deleted resolve to `None`.
    pub fn get(&self, id: &ItemId) -> Option<&Arc<ItemState>> {
        if self.deleted.iter().any(|entry| entry.id() == id) {
            return None;
        }
        self.added
            .iter()
            .chain(self.modified.iter())
            .find(|entry| entry.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.modified_refs.is_empty()
    }

    /// Copies every connected transient state's working data into its shared
    /// peer and advances the peers' statuses: modified peers become
    /// `ExistingModified`, deleted peers `ExistingRemoved`; added peers stay
    /// `New` until persisted.
    pub fn push(&self) -> Result<(), StateError> {
        for state in &self.added {
            state.push()?;
        }
        for state in &self.modified {
            state.push()?;
            if let Some(shared) = state.overlayed_state() {
                shared.set_status(Status::ExistingModified);
            }
        }
        for state in &self.deleted {
            state.push()?;
            if let Some(shared) = state.overlayed_state() {
                shared.set_status(Status::ExistingRemoved);
            }
        }
        Ok(())
    }

    /// Publishes the post-store transitions on the states in this log:
    /// added states become `Existing` and announce their creation, modified
    /// states become `Existing` and announce modification, deleted states
    /// are destroyed (listeners detach and evict).
    pub fn persisted(&self) {
        for state in &self.added {
            state.set_status(Status::Existing);
            state.notify_created();
        }
        for state in &self.modified {
            state.set_status(Status::Existing);
            state.notify_modified();
        }
        for state in &self.deleted {
            state.destroy();
        }
    }

    pub fn reset(&mut self) {
        self.added.clear();
        self.modified.clear();
        self.deleted.clear();
        self.modified_refs.clear();
    }
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeLog")
            .field("added", &self.added.len())
            .field("modified", &self.modified.len())
            .field("deleted", &self.deleted.len())
            .field("modified_refs", &self.modified_refs.len())
            .finish()
    }
}
