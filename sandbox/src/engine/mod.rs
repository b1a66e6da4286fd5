//! Pluggable script engines.
//!
//! An engine turns fragment source into an [`Executable`] once; the
//! executable is cached and may run many invocations concurrently, each on
//! its own execution unit.

use std::sync::Arc;
use std::time::Instant;

use hotmod_core::Value;
use hotmod_overrides::Language;
use hotmod_state::StateView;

use crate::budget::Budget;
use crate::error::Result;
use crate::outcome::Outcome;
use crate::token::CancelToken;

mod rhai_engine;
#[cfg(feature = "wasm")]
mod wasm_engine;

pub use rhai_engine::RhaiEngine;
#[cfg(feature = "wasm")]
pub use wasm_engine::WasmEngine;

/// Compiles fragment source for one language.
pub trait ScriptEngine: Send + Sync {
    fn language(&self) -> Language;

    /// Compile `source`. Errors are reported as `SandboxError::Compile`.
    fn compile(&self, source: &str) -> Result<Arc<dyn Executable>>;
}

/// A compiled fragment.
pub trait Executable: Send + Sync {
    fn language(&self) -> Language;

    /// Run one invocation to an outcome.
    ///
    /// Implementations must observe `invocation.token` and the deadline at
    /// bounded intervals, and must leave the invocation's view in place when
    /// they return.
    fn execute(&self, invocation: &mut Invocation) -> Outcome;
}

/// Everything one execution attempt gets.
#[derive(Debug)]
pub struct Invocation {
    /// Owned argument snapshot.
    pub args: Vec<Value>,
    pub view: StateView,
    pub budget: Budget,
    pub token: CancelToken,
    pub deadline: Instant,
}

impl Invocation {
    pub fn new(args: Vec<Value>, view: StateView, budget: Budget, token: CancelToken) -> Self {
        let deadline = Instant::now() + budget.deadline();
        Self {
            args,
            view,
            budget,
            token,
            deadline,
        }
    }

    /// Stop at `deadline` instead of a full budget from now.
    #[must_use]
    pub fn until(mut self, deadline: Instant) -> Self {
        self.deadline = self.deadline.min(deadline);
        self
    }

    /// Whether the invocation should stop now.
    pub fn should_stop(&self) -> bool {
        self.token.is_terminated() || Instant::now() >= self.deadline
    }
}
