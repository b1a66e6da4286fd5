//! Shared configuration-scope sets, one per configuration id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::set::OverrideSet;

struct Entry {
    set: Arc<OverrideSet>,
    last_used: Instant,
}

/// Caches resolved ConfigurationSets so every request routed to the same
/// arm reuses one set.
///
/// An entry is evicted by [`sweep`](Self::sweep) once nothing outside the
/// registry references it and it has been idle for at least the TTL.
pub struct ConfigurationRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl ConfigurationRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached set for `id` if its content digest is `digest`.
    pub fn get(&self, id: &str, digest: &str) -> Option<Arc<OverrideSet>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        if entry.set.digest() != digest {
            return None;
        }
        entry.last_used = Instant::now();
        Some(Arc::clone(&entry.set))
    }

    /// Return the cached set for `id`, building it with `build` when absent
    /// or when its content changed.
    ///
    /// `build` runs without the registry lock held. If two callers race, the
    /// first insert wins and both get the same set.
    pub fn get_or_try_insert_with<E>(
        &self,
        id: &str,
        digest: &str,
        build: impl FnOnce() -> Result<OverrideSet, E>,
    ) -> Result<Arc<OverrideSet>, E> {
        if let Some(set) = self.get(id, digest) {
            return Ok(set);
        }
        let built = Arc::new(build()?);

        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(id) {
            Some(entry) if entry.set.digest() == built.digest() => {
                entry.last_used = now;
                Ok(Arc::clone(&entry.set))
            }
            _ => {
                tracing::debug!(configuration = id, tag = %built.tag(), "resolved configuration set");
                entries.insert(
                    id.to_string(),
                    Entry {
                        set: Arc::clone(&built),
                        last_used: now,
                    },
                );
                Ok(built)
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<OverrideSet>> {
        self.entries.lock().remove(id).map(|entry| entry.set)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Evict idle, unreferenced sets. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, entry| {
            let idle = now.saturating_duration_since(entry.last_used) >= self.ttl;
            let unreferenced = Arc::strong_count(&entry.set) == 1;
            let evict = idle && unreferenced;
            if evict {
                tracing::debug!(configuration = %id, "evicting configuration set");
            }
            !evict
        });
        before - entries.len()
    }
}

impl std::fmt::Debug for ConfigurationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationRegistry")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
