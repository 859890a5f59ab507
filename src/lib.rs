//! arbor: shared item-state manager for a hierarchical, versioned content
//! repository.
//!
//! The manager ([`shared::SharedItemStateManager`]) is the single
//! authoritative in-memory view of nodes and properties, backed by a
//! pluggable persistence engine ([`persistence::PersistenceManager`]) and
//! composed with virtual providers ([`overlay::VirtualItemStateProvider`])
//! that overlay parts of the namespace. Sessions commit transient change
//! logs through it; committed changes surface as typed events on the
//! observation bus ([`observation::EventBus`]).

#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
pub mod events;
pub mod limits;
pub mod observation;
pub mod overlay;
pub mod persistence;
pub mod shared;
pub mod telemetry;

pub use error::ItemStateError;
pub type Result<T> = std::result::Result<T, ItemStateError>;

// Re-export core types at crate root for convenience
pub use arbor_core::name;
pub use arbor_core::{
    BuiltinNodeTypeRegistry, ChangeLog, ChildNodeDef, ChildNodeEntry, CoreError, Effect,
    IndexedChildEntry, InvalidId, InvalidName, ItemData, ItemId, ItemState, ItemStateListener,
    NodeData, NodeDefId, NodeId, NodeReferences, NodeReferencesId, NodeTypeDef, NodeTypeRegistry,
    PropDef, PropDefId, PropertyData, PropertyId, QName, SchemaError, StateError, Status,
    Transience, Value, ValueError, ValueType,
};

pub use cache::ItemStateCache;
pub use events::{EventKind, EventSink, EventState, EventStateCollection, ObservationManager};
pub use limits::Limits;
pub use observation::{EventBus, EventSubscription, ObservationError};
pub use overlay::{VirtualItemStateProvider, VirtualTreeProvider};
pub use persistence::{MemoryPersistenceManager, PersistenceManager};
pub use shared::SharedItemStateManager;
