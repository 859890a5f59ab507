//! Core domain types for arbor.
//!
//! Module hierarchy follows type dependency order:
//! - name: namespaces and qualified names (Layer 1)
//! - identity: NodeId, PropertyId, ItemId (Layer 2)
//! - value: typed property values (Layer 3)
//! - state: item states, status machine, listeners (Layer 4)
//! - changelog: the commit unit (Layer 5)
//! - references: reference bundles
//! - nodetype: the read-only node-type oracle

#![forbid(unsafe_code)]

// Re-export str_enum! for internal use and downstream consumers.
pub use arbor_macros::str_enum;

pub mod changelog;
pub mod error;
pub mod identity;
pub mod name;
pub mod nodetype;
pub mod references;
pub mod state;
pub mod value;

pub use changelog::ChangeLog;
pub use error::{CoreError, Effect, InvalidId, InvalidName, Transience, ValueError};
pub use identity::{ItemId, NodeId, NodeReferencesId, PropertyId};
pub use name::QName;
pub use nodetype::{
    BuiltinNodeTypeRegistry, ChildNodeDef, NodeDefId, NodeTypeDef, NodeTypeRegistry, PropDef,
    PropDefId, SchemaError,
};
pub use references::NodeReferences;
pub use state::{
    ChildNodeEntry, IndexedChildEntry, ItemData, ItemState, ItemStateListener, NodeData,
    PropertyData, StateError, Status,
};
pub use value::{Value, ValueType};
