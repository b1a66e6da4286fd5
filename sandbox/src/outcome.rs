//! The result of one sandboxed invocation.

use std::fmt;
use std::time::Duration;

use hotmod_core::Value;
use hotmod_state::StateView;
use serde::Serialize;

/// Category of a fault raised inside a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Unknown variable, function or property.
    Reference,
    /// The fragment threw a value.
    Thrown,
    /// Wrong type for an operation, argument or result.
    Type,
    Arithmetic,
    /// Out-of-bounds index or memory access.
    Index,
    /// State access outside the extension point's capability.
    StateDenied,
    /// A wasm trap not covered by another kind.
    Trap,
    /// The engine panicked while running the fragment.
    Panic,
    /// Any other engine error.
    Runtime,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Reference => "reference",
            FaultKind::Thrown => "thrown",
            FaultKind::Type => "type",
            FaultKind::Arithmetic => "arithmetic",
            FaultKind::Index => "index",
            FaultKind::StateDenied => "state_denied",
            FaultKind::Trap => "trap",
            FaultKind::Panic => "panic",
            FaultKind::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// A budget dimension an invocation can exhaust.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Memory,
    Depth,
    Operations,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Memory => write!(f, "memory"),
            Resource::Depth => write!(f, "call depth"),
            Resource::Operations => write!(f, "operations"),
        }
    }
}

/// Exactly one of these is produced for every invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Success(Value),
    Faulted { kind: FaultKind, message: String },
    /// The deadline passed and the invocation was terminated.
    Timeout,
    ResourceExceeded { resource: Resource, message: String },
}

impl Outcome {
    pub fn faulted(kind: FaultKind, message: impl Into<String>) -> Self {
        Outcome::Faulted {
            kind,
            message: message.into(),
        }
    }

    pub fn exceeded(resource: Resource, message: impl Into<String>) -> Self {
        Outcome::ResourceExceeded {
            resource,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(value) => write!(f, "success ({})", value.type_name()),
            Outcome::Faulted { kind, message } => write!(f, "{kind} fault: {message}"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::ResourceExceeded { resource, message } => {
                write!(f, "{resource} exceeded: {message}")
            }
        }
    }
}

/// An outcome plus what the execution unit handed back with it.
#[derive(Debug)]
pub struct Execution {
    pub outcome: Outcome,
    /// The state view, when the unit returned it. A retired unit keeps its
    /// view until its thread unwinds.
    pub view: Option<StateView>,
    pub elapsed: Duration,
}
