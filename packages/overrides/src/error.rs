//! Error types for declarations, payloads and resolution.

use thiserror::Error;

use crate::fragment::Scope;

/// Errors raised while declaring extension points, building override sets
/// or resolving names through a scope chain.
#[derive(Debug, Error)]
pub enum OverrideError {
    /// The name was never declared as an extension point.
    #[error("undeclared extension point: {name}")]
    UndeclaredExtensionPoint { name: String },

    /// The manifest declares the same name twice.
    #[error("extension point declared twice: {name}")]
    DuplicateExtensionPoint { name: String },

    /// The manifest is malformed.
    #[error("invalid manifest: {message}")]
    InvalidManifest { message: String },

    /// An override payload is malformed.
    #[error("invalid override payload: {message}")]
    InvalidPayload { message: String },

    /// A set was placed in a scope chain layer of another scope.
    #[error("{found} set supplied as the {expected} layer")]
    ScopeMismatch { expected: Scope, found: Scope },

    /// Reading a manifest or payload file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverrideError {
    pub fn undeclared(name: impl Into<String>) -> Self {
        OverrideError::UndeclaredExtensionPoint { name: name.into() }
    }
}

/// Result type alias for override operations.
pub type Result<T> = std::result::Result<T, OverrideError>;
