use thiserror::Error;

use arbor_core::error::{CoreError, Effect, Transience};
use arbor_core::identity::{ItemId, NodeId, NodeReferencesId};
use arbor_core::nodetype::SchemaError;
use arbor_core::state::StateError;

/// Runtime errors of the shared item-state layer.
///
/// Not a "god error": resolution, commit, and provider failures each keep
/// their own shape, and domain errors pass through transparently.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ItemStateError {
    #[error("no such item: {0}")]
    NoSuchItem(ItemId),

    #[error("no such reference bundle: {0}")]
    NoSuchReferences(NodeReferencesId),

    #[error("target node {target} of a REFERENCE property does not exist")]
    ReferentialIntegrity { target: NodeId },

    #[error("persistence failure: {message}")]
    Persistence { message: String, fatal: bool },

    #[error("manager poisoned by an earlier store failure; reload required")]
    Poisoned,

    #[error("virtual provider failure: {message}")]
    Provider { message: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ItemStateError {
    /// Non-fatal persistence failure (no durable side effects).
    pub fn persistence(message: impl Into<String>) -> Self {
        ItemStateError::Persistence {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn is_no_such_item(&self) -> bool {
        matches!(
            self,
            ItemStateError::NoSuchItem(_) | ItemStateError::NoSuchReferences(_)
        )
    }

    pub fn transience(&self) -> Transience {
        match self {
            ItemStateError::NoSuchItem(_)
            | ItemStateError::NoSuchReferences(_)
            | ItemStateError::ReferentialIntegrity { .. }
            | ItemStateError::Schema(_)
            | ItemStateError::State(_) => Transience::Permanent,
            ItemStateError::Persistence { fatal, .. } => {
                if *fatal {
                    Transience::Permanent
                } else {
                    Transience::Unknown
                }
            }
            ItemStateError::Poisoned => Transience::Permanent,
            ItemStateError::Provider { .. } => Transience::Unknown,
            ItemStateError::Core(err) => err.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ItemStateError::NoSuchItem(_)
            | ItemStateError::NoSuchReferences(_)
            | ItemStateError::ReferentialIntegrity { .. }
            | ItemStateError::Schema(_)
            | ItemStateError::State(_)
            | ItemStateError::Poisoned => Effect::None,
            // A fatal store failure left pushed in-memory state ahead of
            // durable state.
            ItemStateError::Persistence { fatal, .. } => {
                if *fatal {
                    Effect::Some
                } else {
                    Effect::Unknown
                }
            }
            ItemStateError::Provider { .. } => Effect::Unknown,
            ItemStateError::Core(err) => err.effect(),
        }
    }
}
