//! Sandboxed execution of override fragments.
//!
//! The [`Sandbox`] admits a fragment (compiling it once into a cached
//! [`Executable`]), then runs each invocation on a dedicated execution unit
//! under a [`Budget`]. Every invocation ends in exactly one [`Outcome`]:
//!
//! - `Success(value)`
//! - `Faulted { kind, message }` for errors raised by the fragment
//! - `Timeout` when the deadline passed and the unit was terminated
//! - `ResourceExceeded { resource, .. }` for memory, depth or operation caps
//!
//! Faults stay inside the invocation. A unit that does not stop within the
//! grace period after termination is retired and never reused.
//!
//! Engines plug in through [`ScriptEngine`]. Rhai is always available; the
//! `wasm` feature adds a Wasmtime engine.
//!
//! ```no_run
//! # async fn demo() -> hotmod_sandbox::Result<()> {
//! use hotmod_core::Value;
//! use hotmod_overrides::{Language, OverrideFragment, Scope};
//! use hotmod_sandbox::{Budget, Outcome, Sandbox, SandboxConfig};
//! use hotmod_state::StateView;
//!
//! let sandbox = Sandbox::new(SandboxConfig::default())?;
//! let fragment = OverrideFragment::new("double", "input * 2", Language::Rhai, Scope::Request);
//! let executable = sandbox.admit(&fragment).await?;
//! let execution = sandbox
//!     .execute(executable, vec![Value::Integer(21)], StateView::None, &Budget::default())
//!     .await?;
//! assert_eq!(execution.outcome, Outcome::Success(Value::Integer(42)));
//! # Ok(())
//! # }
//! ```

mod budget;
pub mod engine;
mod error;
mod outcome;
mod pool;
mod sandbox;
mod stats;
mod token;

pub use budget::{Budget, CompileBudget, SandboxConfig};
pub use engine::{Executable, Invocation, RhaiEngine, ScriptEngine};
#[cfg(feature = "wasm")]
pub use engine::WasmEngine;
pub use error::{Result, SandboxError};
pub use outcome::{Execution, FaultKind, Outcome, Resource};
pub use sandbox::Sandbox;
pub use stats::SandboxStats;
pub use token::CancelToken;
