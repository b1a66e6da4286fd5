use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::outcome::Outcome;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    executions: AtomicU64,
    successes: AtomicU64,
    faults: AtomicU64,
    timeouts: AtomicU64,
    resource_exceeded: AtomicU64,
    retired_units: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    compile_errors: AtomicU64,
    admission_rejects: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn record(&self, outcome: &Outcome) {
        bump(&self.executions);
        match outcome {
            Outcome::Success(_) => bump(&self.successes),
            Outcome::Faulted { .. } => bump(&self.faults),
            Outcome::Timeout => bump(&self.timeouts),
            Outcome::ResourceExceeded { .. } => bump(&self.resource_exceeded),
        }
    }

    pub(crate) fn retired(&self) {
        bump(&self.retired_units);
    }

    pub(crate) fn cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub(crate) fn cache_miss(&self) {
        bump(&self.cache_misses);
    }

    pub(crate) fn compile_error(&self) {
        bump(&self.compile_errors);
    }

    pub(crate) fn rejected(&self) {
        bump(&self.admission_rejects);
    }

    pub(crate) fn snapshot(&self) -> SandboxStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SandboxStats {
            executions: get(&self.executions),
            successes: get(&self.successes),
            faults: get(&self.faults),
            timeouts: get(&self.timeouts),
            resource_exceeded: get(&self.resource_exceeded),
            retired_units: get(&self.retired_units),
            cache_hits: get(&self.cache_hits),
            cache_misses: get(&self.cache_misses),
            compile_errors: get(&self.compile_errors),
            admission_rejects: get(&self.admission_rejects),
        }
    }
}

/// Point-in-time sandbox counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SandboxStats {
    pub executions: u64,
    pub successes: u64,
    pub faults: u64,
    pub timeouts: u64,
    pub resource_exceeded: u64,
    pub retired_units: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub compile_errors: u64,
    pub admission_rejects: u64,
}
