//! Runtime configuration.
//!
//! Loaded from JSON; every field is optional and falls back to its default.
//!
//! ```json
//! {
//!     "budgets": {
//!         "request": { "deadline_ms": 50 },
//!         "service": { "deadline_ms": 500, "max_call_depth": 128 }
//!     },
//!     "sandbox": { "units": 8, "grace_ms": 100 },
//!     "configuration_ttl_ms": 60000,
//!     "fallback_on_admission_reject": true
//! }
//! ```

use std::time::Duration;

use hotmod_overrides::Scope;
use hotmod_sandbox::{Budget, SandboxConfig};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// Budget applied to an override, chosen by the scope it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetTable {
    pub request: Budget,
    pub configuration: Budget,
    pub service: Budget,
}

impl BudgetTable {
    pub fn for_scope(&self, scope: Scope) -> &Budget {
        match scope {
            Scope::Request => &self.request,
            Scope::Configuration => &self.configuration,
            Scope::Service => &self.service,
        }
    }

    /// The same budget for every scope.
    pub fn uniform(budget: Budget) -> Self {
        Self {
            request: budget.clone(),
            configuration: budget.clone(),
            service: budget,
        }
    }
}

impl Default for BudgetTable {
    fn default() -> Self {
        let base = Budget::default();
        Self {
            request: base.clone(),
            configuration: base.clone().with_deadline(Duration::from_millis(200)),
            service: base.with_deadline(Duration::from_millis(500)),
        }
    }
}

/// Configuration for the [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub budgets: BudgetTable,
    pub sandbox: SandboxConfig,
    /// Idle time after which an unreferenced configuration set is evicted.
    pub configuration_ttl_ms: u64,
    /// Superseded service sets kept for graduation history.
    pub service_history: usize,
    /// Run the host default when an override is rejected at admission.
    pub fallback_on_admission_reject: bool,
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DispatchError::Config {
            message: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn configuration_ttl(&self) -> Duration {
        Duration::from_millis(self.configuration_ttl_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            budgets: BudgetTable::default(),
            sandbox: SandboxConfig::default(),
            configuration_ttl_ms: 5 * 60 * 1000,
            service_history: 8,
            fallback_on_admission_reject: false,
        }
    }
}
