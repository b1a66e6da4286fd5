//! One request's view of the override layers.

use std::sync::Arc;

use hotmod_core::Value;
use hotmod_overrides::{ExtensionPoint, OverrideFragment, Resolution, Scope, ScopeChain};
use hotmod_sandbox::Outcome;
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatcher::Inner;
use crate::error::{DispatchError, Result};

/// Dispatches calls for a single request.
///
/// The scope chain is fixed when the request begins: a service deployment
/// that lands mid-request is not observed until the next one.
pub struct RequestContext {
    id: Uuid,
    chain: ScopeChain,
    inner: Arc<Inner>,
}

impl RequestContext {
    pub(crate) fn new(id: Uuid, chain: ScopeChain, inner: Arc<Inner>) -> Self {
        Self { id, chain, inner }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn chain(&self) -> &ScopeChain {
        &self.chain
    }

    /// The scope whose override answers `name`, or `None` for the host
    /// default.
    pub fn owner(&self, name: &str) -> Option<Scope> {
        self.chain.owner(name)
    }

    /// Invoke the extension point `name` with `args`.
    ///
    /// Runs the most specific override, or the host default when no layer
    /// binds the name. A failing override yields an error for this call
    /// only; the host default is never substituted for a faulted override.
    pub async fn dispatch(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let span = tracing::debug_span!("dispatch", request = %self.id, point = name);
        self.dispatch_inner(name, args).instrument(span).await
    }

    async fn dispatch_inner(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let point = self.chain.point(name)?;
        if args.len() != point.arity {
            return Err(DispatchError::ArityMismatch {
                name: name.to_string(),
                expected: point.arity,
                actual: args.len(),
            });
        }

        match self.chain.resolve(name)? {
            Resolution::HostDefault => self.call_host(name, &args),
            Resolution::Override { fragment, scope } => {
                self.run_override(point, &fragment, scope, args).await
            }
        }
    }

    fn call_host(&self, name: &str, args: &[Value]) -> Result<Value> {
        let host = self
            .inner
            .hosts
            .get(name)
            .ok_or_else(|| DispatchError::MissingHostDefault {
                name: name.to_string(),
            })?;
        tracing::trace!("running host default");
        host.call(args, self.inner.guard.state())
            .map_err(|source| DispatchError::Host {
                name: name.to_string(),
                source,
            })
    }

    async fn run_override(
        &self,
        point: &ExtensionPoint,
        fragment: &OverrideFragment,
        scope: Scope,
        args: Vec<Value>,
    ) -> Result<Value> {
        let name = point.name.as_str();
        let executable = match self.inner.sandbox.admit(fragment).await {
            Ok(executable) => executable,
            Err(e) => {
                let error = DispatchError::from_sandbox(name, e);
                if matches!(error, DispatchError::AdmissionRejected { .. })
                    && self.inner.config.fallback_on_admission_reject
                {
                    tracing::warn!(%scope, %error, "falling back to host default");
                    return self.call_host(name, &args);
                }
                return Err(error);
            }
        };

        let budget = self.inner.config.budgets.for_scope(scope);
        let view = self.inner.guard.prepare(&point.state);
        tracing::debug!(%scope, key = fragment.key().short(), "running override");
        let execution = self
            .inner
            .sandbox
            .execute(executable, args, view, budget)
            .await
            .map_err(DispatchError::Unavailable)?;
        if let Some(view) = execution.view {
            self.inner.guard.release(view);
        }

        match execution.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Faulted { kind, message } => Err(DispatchError::Faulted {
                name: name.to_string(),
                kind,
                message,
            }),
            Outcome::Timeout => Err(DispatchError::Timeout {
                name: name.to_string(),
                deadline: budget.deadline(),
            }),
            Outcome::ResourceExceeded { resource, message } => {
                Err(DispatchError::ResourceExceeded {
                    name: name.to_string(),
                    resource,
                    message,
                })
            }
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("service", &self.chain.layer(Scope::Service).tag())
            .finish()
    }
}
