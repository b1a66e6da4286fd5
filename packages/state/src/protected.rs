//! Shared service state published by atomic swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use hotmod_core::{Error, Path, Value};
use parking_lot::Mutex;

/// Service-wide state reachable (indirectly) from override fragments.
///
/// Readers take an `Arc` snapshot without locking and never observe a
/// partially-applied update. Trusted host code replaces the whole tree with
/// [`publish`](Self::publish) or [`update`](Self::update); writers are
/// serialized among themselves but never block readers.
pub struct ProtectedState {
    current: ArcSwap<Value>,
    generation: AtomicU64,
    writer: Mutex<()>,
}

impl ProtectedState {
    pub fn new(root: Value) -> Self {
        Self {
            current: ArcSwap::from_pointee(root),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<Value> {
        self.current.load_full()
    }

    /// Copy of the value at `path` in the current snapshot.
    pub fn get(&self, path: &Path) -> Option<Value> {
        self.current.load().get(path).cloned()
    }

    /// Number of publications so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the whole tree. Returns the new generation.
    pub fn publish(&self, root: Value) -> u64 {
        let _writer = self.writer.lock();
        self.current.store(Arc::new(root));
        self.bump()
    }

    /// Apply `f` to a copy of the current tree and publish the result.
    ///
    /// If `f` fails, nothing is published.
    pub fn update<F>(&self, f: F) -> Result<u64, Error>
    where
        F: FnOnce(&mut Value) -> Result<(), Error>,
    {
        let _writer = self.writer.lock();
        let mut next = Value::clone(&self.current.load());
        f(&mut next)?;
        self.current.store(Arc::new(next));
        Ok(self.bump())
    }

    fn bump(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "protected state published");
        generation
    }
}

impl Default for ProtectedState {
    fn default() -> Self {
        Self::new(Value::map())
    }
}

impl std::fmt::Debug for ProtectedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedState")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
