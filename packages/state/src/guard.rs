//! StateGuard: mediates every state access a sandboxed invocation gets.

use std::sync::Arc;

use hotmod_core::Path;

use crate::capability::{AccessMode, Capability};
use crate::protected::ProtectedState;
use crate::view::{PrivateCopy, ReadOnlyView, StateView};

/// Builds per-invocation views and disposes of them afterwards.
///
/// The guard never writes a view back into shared state. Anything a
/// fragment wants persisted must come back as its result and be applied by
/// host code.
#[derive(Clone, Debug)]
pub struct StateGuard {
    state: Arc<ProtectedState>,
}

impl StateGuard {
    pub fn new(state: Arc<ProtectedState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ProtectedState> {
        &self.state
    }

    /// Build the view an invocation with `capability` may use.
    pub fn prepare(&self, capability: &Capability) -> StateView {
        let fields: Arc<[Path]> = capability.fields.iter().cloned().collect();
        match capability.mode {
            AccessMode::None => StateView::None,
            AccessMode::ReadOnly => {
                StateView::ReadOnly(ReadOnlyView::new(self.state.snapshot(), fields))
            }
            AccessMode::PrivateCopy => {
                let snapshot = self.state.snapshot();
                StateView::Private(PrivateCopy::new(&snapshot, fields))
            }
        }
    }

    /// Drop a view once its invocation has finished, whatever the outcome.
    pub fn release(&self, view: StateView) {
        if let StateView::Private(copy) = &view {
            if copy.writes() > 0 {
                tracing::trace!(writes = copy.writes(), "discarding private state copy");
            }
        }
        drop(view);
    }
}
