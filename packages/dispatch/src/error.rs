//! Errors surfaced to the caller of a dispatch.

use std::time::Duration;

use hotmod_overrides::OverrideError;
use hotmod_sandbox::{FaultKind, Resource, SandboxError};
use thiserror::Error;

use crate::host::HostError;

/// Errors from building a dispatcher, resolving sets, or dispatching a call.
///
/// Every variant is scoped to the request (or resolution attempt) that
/// raised it.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The name was never declared as an extension point.
    #[error("undeclared extension point: {name}")]
    UndeclaredExtensionPoint { name: String },

    #[error("{name} takes {expected} arguments, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The override for `name` does not compile.
    #[error("override for {name} does not compile: {message}")]
    Compile { name: String, message: String },

    /// Compiling the override for `name` exceeded the compile budget.
    #[error("override for {name} rejected: {reason}")]
    AdmissionRejected { name: String, reason: String },

    #[error("override for {name} faulted ({kind}): {message}")]
    Faulted {
        name: String,
        kind: FaultKind,
        message: String,
    },

    #[error("override for {name} timed out after {deadline:?}")]
    Timeout { name: String, deadline: Duration },

    #[error("override for {name} exceeded {resource}: {message}")]
    ResourceExceeded {
        name: String,
        resource: Resource,
        message: String,
    },

    /// The host default for `name` failed.
    #[error("host default for {name} failed: {source}")]
    Host {
        name: String,
        #[source]
        source: HostError,
    },

    /// A declared extension point has no host default.
    #[error("no host default registered for {name}")]
    MissingHostDefault { name: String },

    /// Declarations or payloads are malformed.
    #[error(transparent)]
    Override(OverrideError),

    /// The sandbox could not run the invocation.
    #[error("sandbox unavailable: {0}")]
    Unavailable(#[source] SandboxError),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Attach `name` to a sandbox error raised while admitting its override.
    pub(crate) fn from_sandbox(name: &str, error: SandboxError) -> Self {
        match error {
            SandboxError::Compile { message, .. } => DispatchError::Compile {
                name: name.to_string(),
                message,
            },
            SandboxError::AdmissionRejected { reason } => DispatchError::AdmissionRejected {
                name: name.to_string(),
                reason,
            },
            SandboxError::Fragment { point, source } => DispatchError::from_sandbox(&point, *source),
            other => DispatchError::Unavailable(other),
        }
    }

    /// Whether the error came from running an override, as opposed to the
    /// caller or the host.
    pub fn is_override_failure(&self) -> bool {
        matches!(
            self,
            DispatchError::Compile { .. }
                | DispatchError::AdmissionRejected { .. }
                | DispatchError::Faulted { .. }
                | DispatchError::Timeout { .. }
                | DispatchError::ResourceExceeded { .. }
        )
    }
}

impl From<OverrideError> for DispatchError {
    fn from(error: OverrideError) -> Self {
        match error {
            OverrideError::UndeclaredExtensionPoint { name } => {
                DispatchError::UndeclaredExtensionPoint { name }
            }
            OverrideError::Io(e) => DispatchError::Io(e),
            other => DispatchError::Override(other),
        }
    }
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
