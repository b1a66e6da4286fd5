//! Resource budgets and sandbox tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to one invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budget {
    /// Wall-clock deadline, in milliseconds.
    pub deadline_ms: u64,
    /// Ceiling on the size of any single value a fragment builds.
    ///
    /// Rhai applies it to each string, array and map on its own, so several
    /// values below the ceiling may together hold more than it. Wasm applies
    /// it to the whole linear memory. The returned value is checked against
    /// it as well.
    pub memory_bytes: usize,
    /// Maximum nested function calls.
    pub max_call_depth: usize,
    /// Optional cap on engine operations (Rhai operations, wasm fuel).
    pub max_operations: Option<u64>,
}

impl Budget {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = deadline.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_memory_bytes(mut self, bytes: usize) -> Self {
        self.memory_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_operations(mut self, operations: u64) -> Self {
        self.max_operations = Some(operations);
        self
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            deadline_ms: 100,
            memory_bytes: 16 * 1024 * 1024,
            max_call_depth: 64,
            max_operations: None,
        }
    }
}

/// What a fragment may cost to compile on the hot path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileBudget {
    pub max_source_bytes: usize,
    pub max_compile_ms: u64,
}

impl CompileBudget {
    pub fn max_compile_time(&self) -> Duration {
        Duration::from_millis(self.max_compile_ms)
    }
}

impl Default for CompileBudget {
    fn default() -> Self {
        Self {
            max_source_bytes: 64 * 1024,
            max_compile_ms: 50,
        }
    }
}

/// Sandbox tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum concurrently running execution units.
    pub units: usize,
    /// How long a terminated unit has to report back before it is retired.
    pub grace_ms: u64,
    /// Native stack size of each execution unit thread.
    pub unit_stack_bytes: usize,
    /// Compiled fragments kept in the LRU cache.
    pub cache_capacity: usize,
    pub compile: CompileBudget,
    /// Epoch tick for wasm interruption, in milliseconds.
    pub wasm_tick_ms: u64,
}

impl SandboxConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            units: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            grace_ms: 250,
            unit_stack_bytes: 16 * 1024 * 1024,
            cache_capacity: 256,
            compile: CompileBudget::default(),
            wasm_tick_ms: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let budget: Budget = serde_json::from_str(r#"{"deadline_ms": 20}"#).unwrap();
        assert_eq!(budget.deadline(), Duration::from_millis(20));
        assert_eq!(budget.max_call_depth, Budget::default().max_call_depth);
        assert_eq!(budget.max_operations, None);

        let config: SandboxConfig =
            serde_json::from_str(r#"{"units": 2, "compile": {"max_compile_ms": 5}}"#).unwrap();
        assert_eq!(config.units, 2);
        assert_eq!(config.compile.max_compile_time(), Duration::from_millis(5));
        assert_eq!(config.compile.max_source_bytes, 64 * 1024);
    }

    #[test]
    fn builder_style_overrides() {
        let budget = Budget::default()
            .with_deadline(Duration::from_millis(5))
            .with_max_operations(1_000);
        assert_eq!(budget.deadline_ms, 5);
        assert_eq!(budget.max_operations, Some(1_000));
    }
}
