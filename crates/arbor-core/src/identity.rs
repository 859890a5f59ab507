//! Layer 2: Item identity atoms.
//!
//! NodeId: UUID identity of a node
//! PropertyId: parent UUID plus qualified name
//! ItemId: tagged union of the two
//! NodeReferencesId: key of a reference bundle, by target node

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};
use super::name::QName;

/// Node identity - a 128-bit UUID.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random (v4) node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, CoreError> {
        Uuid::parse_str(s).map(Self).map_err(|err| {
            InvalidId::Node {
                raw: s.to_string(),
                reason: err.to_string(),
            }
            .into()
        })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<NodeId> for Uuid {
    fn from(id: NodeId) -> Uuid {
        id.0
    }
}

/// Property identity - the parent node's UUID plus the property's name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyId {
    parent: NodeId,
    name: QName,
}

impl PropertyId {
    pub fn new(parent: NodeId, name: QName) -> Self {
        Self { parent, name }
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn name(&self) -> &QName {
        &self.name
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({}/{})", self.parent, self.name)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}

/// Identity of an item - a node or a property.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemId {
    Node(NodeId),
    Property(PropertyId),
}

impl ItemId {
    /// True for node ids, false for property ids. Total.
    pub fn denotes_node(&self) -> bool {
        matches!(self, ItemId::Node(_))
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ItemId::Node(id) => Some(*id),
            ItemId::Property(_) => None,
        }
    }

    pub fn property_id(&self) -> Option<&PropertyId> {
        match self {
            ItemId::Node(_) => None,
            ItemId::Property(id) => Some(id),
        }
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Node(id) => write!(f, "ItemId({id})"),
            ItemId::Property(id) => write!(f, "ItemId({id})"),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Node(id) => write!(f, "{id}"),
            ItemId::Property(id) => write!(f, "{id}"),
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        ItemId::Node(id)
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        ItemId::Property(id)
    }
}

/// Key of a reference bundle: the UUID of the target node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeReferencesId(NodeId);

impl NodeReferencesId {
    pub fn new(target: NodeId) -> Self {
        Self(target)
    }

    pub fn target(&self) -> NodeId {
        self.0
    }
}

impl fmt::Debug for NodeReferencesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeReferencesId({})", self.0)
    }
}

impl fmt::Display for NodeReferencesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeId> for NodeReferencesId {
    fn from(target: NodeId) -> Self {
        Self(target)
    }
}
