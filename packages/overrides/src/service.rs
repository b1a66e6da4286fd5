//! The process-wide service layer.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::set::OverrideSet;

/// Holds the live ServiceSet and a bounded history of earlier ones.
///
/// Publication is a single atomic swap: requests that already loaded the
/// old set keep it until they finish.
pub struct ServiceSlot {
    current: ArcSwap<OverrideSet>,
    history: Mutex<VecDeque<Arc<OverrideSet>>>,
    retain: usize,
}

impl ServiceSlot {
    /// `retain` is how many superseded sets to keep for inspection.
    pub fn new(initial: OverrideSet, retain: usize) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            history: Mutex::new(VecDeque::with_capacity(retain)),
            retain,
        }
    }

    pub fn load(&self) -> Arc<OverrideSet> {
        self.current.load_full()
    }

    /// Swap in `next`, returning the set it replaced.
    pub fn publish(&self, next: OverrideSet) -> Arc<OverrideSet> {
        let mut history = self.history.lock();
        let previous = self.current.swap(Arc::new(next));
        if self.retain > 0 {
            if history.len() == self.retain {
                history.pop_front();
            }
            history.push_back(Arc::clone(&previous));
        }
        tracing::info!(
            previous = %previous.tag(),
            current = %self.current.load().tag(),
            "published service set"
        );
        previous
    }

    /// Retained sets oldest first, followed by the live one.
    pub fn history(&self) -> Vec<Arc<OverrideSet>> {
        let history = self.history.lock();
        let mut sets: Vec<_> = history.iter().cloned().collect();
        sets.push(self.load());
        sets
    }
}

impl std::fmt::Debug for ServiceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSlot")
            .field("current", self.current.load().tag())
            .field("retain", &self.retain)
            .finish()
    }
}
