use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Forced-termination flag shared between a supervising task and the
/// execution unit running an invocation.
///
/// Engines poll it at bounded intervals (Rhai's progress callback, the wasm
/// epoch callback) and unwind the invocation once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running invocation to stop. Idempotent.
    pub fn terminate(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let seen_by_unit = token.clone();
        assert!(!seen_by_unit.is_terminated());

        std::thread::spawn(move || token.terminate()).join().unwrap();
        assert!(seen_by_unit.is_terminated());
    }
}
