//! Compiled-in host defaults.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use hotmod_core::Value;
use hotmod_state::ProtectedState;
use thiserror::Error;

/// Failure of a host default. Host code owns its error messages.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<hotmod_core::Error> for HostError {
    fn from(error: hotmod_core::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Trusted logic behind an extension point when no override applies.
///
/// Runs directly on the dispatching task, outside the sandbox, with access
/// to the live protected state.
pub trait HostFunction: Send + Sync {
    fn call(&self, args: &[Value], state: &ProtectedState) -> Result<Value, HostError>;
}

impl<F> HostFunction for F
where
    F: Fn(&[Value], &ProtectedState) -> Result<Value, HostError> + Send + Sync,
{
    fn call(&self, args: &[Value], state: &ProtectedState) -> Result<Value, HostError> {
        self(args, state)
    }
}

/// Host defaults by extension point name.
///
/// Replaced as a whole on graduation, so a lookup always sees either the
/// old or the new table.
pub(crate) struct HostRegistry {
    functions: ArcSwap<HashMap<String, Arc<dyn HostFunction>>>,
}

impl HostRegistry {
    pub(crate) fn new(functions: HashMap<String, Arc<dyn HostFunction>>) -> Self {
        Self {
            functions: ArcSwap::from_pointee(functions),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn HostFunction>> {
        self.functions.load().get(name).cloned()
    }

    /// Install `function` under `name`, returning the one it replaced.
    pub(crate) fn replace(
        &self,
        name: &str,
        function: Arc<dyn HostFunction>,
    ) -> Option<Arc<dyn HostFunction>> {
        let mut previous = None;
        self.functions.rcu(|current| {
            let mut next = HashMap::clone(current);
            previous = next.insert(name.to_string(), Arc::clone(&function));
            next
        });
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i64) -> Arc<dyn HostFunction> {
        Arc::new(
            move |_: &[Value], _: &ProtectedState| -> Result<Value, HostError> {
                Ok(Value::Integer(value))
            },
        )
    }

    #[test]
    fn closures_are_host_functions() {
        let state = ProtectedState::default();
        let add = |args: &[Value], _: &ProtectedState| -> Result<Value, HostError> {
            let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
            Ok(Value::Integer(sum))
        };
        assert_eq!(
            HostFunction::call(&add, &[Value::Integer(2), Value::Integer(3)], &state).unwrap(),
            Value::Integer(5)
        );
    }

    #[test]
    fn replace_swaps_one_entry() {
        let state = ProtectedState::default();
        let registry = HostRegistry::new(HashMap::from([
            ("a".to_string(), constant(1)),
            ("b".to_string(), constant(2)),
        ]));

        let previous = registry.replace("a", constant(10));
        assert!(previous.is_some());
        let call = |name: &str| registry.get(name).unwrap().call(&[], &state).unwrap();
        assert_eq!(call("a"), Value::Integer(10));
        assert_eq!(call("b"), Value::Integer(2));
    }
}
