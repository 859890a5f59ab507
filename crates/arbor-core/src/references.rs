//! Reference bundles: the incoming REFERENCE-property pointers of a node.
//!
//! A bundle is keyed by the target node's UUID and lives in persistence or
//! in a virtual provider. Bundles are loaded per commit and never cached by
//! the manager.

use serde::{Deserialize, Serialize};

use super::identity::{NodeId, NodeReferencesId, PropertyId};

/// The set of back-pointers to a target node, in insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReferences {
    id: NodeReferencesId,
    references: Vec<PropertyId>,
}

impl NodeReferences {
    pub fn new(id: NodeReferencesId) -> Self {
        Self {
            id,
            references: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeReferencesId {
        self.id
    }

    /// UUID of the referenced node.
    pub fn target(&self) -> NodeId {
        self.id.target()
    }

    /// Adds a back-pointer; returns false if it was already present.
    pub fn add_reference(&mut self, reference: PropertyId) -> bool {
        if self.references.contains(&reference) {
            return false;
        }
        self.references.push(reference);
        true
    }

    pub fn remove_reference(&mut self, reference: &PropertyId) -> bool {
        let Some(pos) = self.references.iter().position(|r| r == reference) else {
            return false;
        };
        self.references.remove(pos);
        true
    }

    pub fn has_references(&self) -> bool {
        !self.references.is_empty()
    }

    pub fn references(&self) -> &[PropertyId] {
        &self.references
    }
}
