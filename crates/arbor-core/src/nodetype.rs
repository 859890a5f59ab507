//! Node-type registry oracle.
//!
//! The registry is consumed read-only: it answers what the mandatory default
//! properties and children of a type are, and hands out the opaque
//! definition ids that item states carry. Schema parsing and type authoring
//! are out of scope; `BuiltinNodeTypeRegistry` covers the types the core
//! itself needs to bootstrap.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::name::{self, QName};
use super::value::ValueType;

/// Opaque id of a child-node definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeDefId(u32);

impl NodeDefId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeDefId({})", self.0)
    }
}

impl fmt::Display for NodeDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque id of a property definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropDefId(u32);

impl PropDefId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PropDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropDefId({})", self.0)
    }
}

impl fmt::Display for PropDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A property definition of a node type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropDef {
    pub id: PropDefId,
    pub name: QName,
    pub value_type: ValueType,
    pub multi_valued: bool,
}

/// A child-node definition of a node type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildNodeDef {
    pub id: NodeDefId,
    pub name: QName,
    pub default_primary_type: QName,
}

/// A node type: its name plus the definitions it declares.
///
/// Ordering of `property_defs` is significant: the first property definition
/// of `nt:base` is `jcr:primaryType`, which bootstrap relies on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeDef {
    pub name: QName,
    pub property_defs: Vec<PropDef>,
    pub child_defs: Vec<ChildNodeDef>,
}

/// Schema lookups that cannot be answered.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("node type {name} is not registered")]
    MissingNodeType { name: QName },
    #[error("no definition registered for the root node")]
    MissingRootDefinition,
    #[error("node type {node_type} declares no primary-type property definition")]
    MissingPrimaryTypeDefinition { node_type: QName },
}

/// Read-only node-type oracle.
pub trait NodeTypeRegistry: Send + Sync {
    /// Definition id applied to the repository root node.
    fn root_node_def(&self) -> Result<NodeDefId, SchemaError>;

    /// Full definition of a registered type.
    fn node_type_def(&self, name: &QName) -> Result<NodeTypeDef, SchemaError>;

    fn has_node_type(&self, name: &QName) -> bool {
        self.node_type_def(name).is_ok()
    }
}

/// Minimal in-memory registry with the built-in types the core needs:
/// `rep:root`, `nt:base`, and `nt:unstructured`.
pub struct BuiltinNodeTypeRegistry {
    types: HashMap<QName, NodeTypeDef>,
    root_def: NodeDefId,
}

impl BuiltinNodeTypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            types: HashMap::new(),
            root_def: NodeDefId::new(1),
        };
        registry.register(NodeTypeDef {
            name: name::rep_root().clone(),
            property_defs: vec![PropDef {
                id: PropDefId::new(1),
                name: name::jcr_primary_type().clone(),
                value_type: ValueType::Name,
                multi_valued: false,
            }],
            child_defs: vec![ChildNodeDef {
                id: NodeDefId::new(2),
                name: name::rep_system().clone(),
                default_primary_type: name::rep_system().clone(),
            }],
        });
        registry.register(NodeTypeDef {
            name: name::nt_base().clone(),
            property_defs: vec![
                PropDef {
                    id: PropDefId::new(1),
                    name: name::jcr_primary_type().clone(),
                    value_type: ValueType::Name,
                    multi_valued: false,
                },
                PropDef {
                    id: PropDefId::new(2),
                    name: name::jcr_mixin_types().clone(),
                    value_type: ValueType::Name,
                    multi_valued: true,
                },
            ],
            child_defs: Vec::new(),
        });
        registry.register(NodeTypeDef {
            name: name::nt_unstructured().clone(),
            property_defs: vec![PropDef {
                id: PropDefId::new(3),
                name: name::jcr_primary_type().clone(),
                value_type: ValueType::Name,
                multi_valued: false,
            }],
            child_defs: vec![ChildNodeDef {
                id: NodeDefId::new(3),
                name: name::nt_unstructured().clone(),
                default_primary_type: name::nt_unstructured().clone(),
            }],
        });
        registry
    }

    /// Adds or replaces a type definition.
    pub fn register(&mut self, def: NodeTypeDef) {
        self.types.insert(def.name.clone(), def);
    }
}

impl Default for BuiltinNodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTypeRegistry for BuiltinNodeTypeRegistry {
    fn root_node_def(&self) -> Result<NodeDefId, SchemaError> {
        Ok(self.root_def)
    }

    fn node_type_def(&self, name: &QName) -> Result<NodeTypeDef, SchemaError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::MissingNodeType { name: name.clone() })
    }
}
