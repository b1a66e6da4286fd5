//! Error types for the core layer.

use thiserror::Error;

use crate::path::{Path, PathError};

/// Errors at the core layer.
///
/// These cover path validation, value navigation, conversion failures and
/// state access rejections raised by guarded views.
#[derive(Debug, Error)]
pub enum Error {
    /// Path validation error.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Invalid path for an operation.
    #[error("invalid path: {message}")]
    InvalidPath { message: String },

    /// A write was attempted through a read-only view.
    #[error("path '{path}' is read-only")]
    ReadOnly { path: Path },

    /// Access to a path outside the declared capability.
    #[error("access to '{path}' denied: {reason}")]
    Denied { path: Path, reason: String },

    /// Failed to decode into a Rust type or Value.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Failed to encode from a Rust type or Value.
    #[error("encode error: {message}")]
    Encode { message: String },

    /// Generic error with message.
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }

    /// Create an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Error::Encode {
            message: message.into(),
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
        }
    }

    /// Whether this error is an access rejection (read-only or denied).
    pub fn is_access_violation(&self) -> bool {
        matches!(self, Error::ReadOnly { .. } | Error::Denied { .. })
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
