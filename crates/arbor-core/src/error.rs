//! Core domain errors (parsing and validation).
//!
//! These are bounded and stable: they represent invalid input, not library
//! implementation details. Runtime errors (resolution, persistence, commit)
//! live in the `arbor-rs` crate.

use thiserror::Error;

/// Invalid identity string.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("node id `{raw}` is invalid: {reason}")]
    Node { raw: String, reason: String },
}

/// Invalid qualified name.
#[derive(Debug, Error, Clone)]
#[error("name `{raw}` is invalid: {reason}")]
pub struct InvalidName {
    pub raw: String,
    pub reason: String,
}

/// Value text that does not parse as the requested type.
#[derive(Debug, Error, Clone)]
#[error("`{raw}` is not a valid {expected} value: {reason}")]
pub struct ValueError {
    pub expected: crate::value::ValueType,
    pub raw: String,
    pub reason: String,
}

/// Canonical error enum for the core domain layer.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error(transparent)]
    Value(#[from] ValueError),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Domain validation never succeeds on retry with the same input.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Whether retrying a failed operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs or state.
    Permanent,
    /// Retry may help.
    Retryable,
    /// Unknown whether retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What is known about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred.
    Some,
    /// Unknown whether side effects occurred.
    Unknown,
}

arbor_macros::str_enum! {
    impl Effect {
        None => "none",
        Some => "some",
        Unknown => "unknown",
    }
}
