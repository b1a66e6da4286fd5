//! Protected service state.
//!
//! Sandboxed fragments never hold a live reference to shared state. The
//! [`StateGuard`] hands each invocation one of:
//!
//! - a [`ReadOnlyView`] over the current immutable snapshot (zero copy), or
//! - a [`PrivateCopy`] of the declared fields, thrown away afterwards, or
//! - nothing at all.
//!
//! Which one is decided by the extension point's [`Capability`]. Because no
//! lock is ever handed out, sandboxed code cannot deadlock with the host, and
//! a fault inside a fragment leaves the shared tree exactly as it was.

mod capability;
mod guard;
mod protected;
mod view;

pub use capability::{AccessMode, Capability};
pub use guard::StateGuard;
pub use protected::ProtectedState;
pub use view::{PrivateCopy, ReadOnlyView, StateView};
