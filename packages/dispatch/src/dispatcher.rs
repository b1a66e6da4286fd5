//! The dispatcher: owns the layers, the sandbox and the host defaults.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use hotmod_core::Value;
use hotmod_overrides::{
    ConfigurationRegistry, ExtensionPoint, Language, Manifest, OverridePayload, OverrideSet,
    OverrideSetBuilder, Scope, ScopeChain, ServiceSlot, SetTag,
};
use hotmod_sandbox::{Sandbox, SandboxStats};
use hotmod_state::{ProtectedState, StateGuard};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{DispatchError, Result};
use crate::host::{HostFunction, HostRegistry};
use crate::request::RequestContext;

pub(crate) struct Inner {
    pub(crate) manifest: Arc<Manifest>,
    pub(crate) hosts: HostRegistry,
    pub(crate) guard: StateGuard,
    pub(crate) sandbox: Arc<Sandbox>,
    pub(crate) config: RuntimeConfig,
    service: ServiceSlot,
    configurations: ConfigurationRegistry,
    no_configuration: Arc<OverrideSet>,
}

/// A live service fragment, as exposed to graduation tooling.
#[derive(Clone, Debug)]
pub struct FragmentSource {
    /// Declaration the fragment implements.
    pub point: ExtensionPoint,
    pub source: String,
    pub language: Language,
    /// Service set the fragment was found in.
    pub set: SetTag,
}

/// Entry point for host code.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.inner.manifest
    }

    pub fn state(&self) -> &Arc<ProtectedState> {
        self.inner.guard.state()
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.inner.sandbox
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> SandboxStats {
        self.inner.sandbox.stats()
    }

    /// The live service set.
    pub fn service(&self) -> Arc<OverrideSet> {
        self.inner.service.load()
    }

    /// Resolve and compile the configuration set for `id`.
    ///
    /// Every request routed to the same id shares one set; it is rebuilt
    /// only if `payload` changes. An undeclared name or a fragment that does
    /// not compile fails this call and caches nothing.
    pub fn configuration(&self, id: &str, payload: &OverridePayload) -> Result<Arc<OverrideSet>> {
        let inner = &self.inner;
        inner
            .configurations
            .get_or_try_insert_with(id, &payload.digest(), || {
                let set = OverrideSet::from_payload(Scope::Configuration, payload, &inner.manifest)?;
                inner
                    .sandbox
                    .precompile(&set)
                    .map_err(|e| DispatchError::from_sandbox(id, e))?;
                Ok(set)
            })
    }

    /// Start a request with an optional configuration set and the request's
    /// own overrides.
    pub fn begin_request(
        &self,
        configuration: Option<Arc<OverrideSet>>,
        request: &OverridePayload,
    ) -> Result<RequestContext> {
        let inner = &self.inner;
        let request = if request.is_empty() {
            OverrideSet::empty(Scope::Request)
        } else {
            OverrideSet::from_payload(Scope::Request, request, &inner.manifest)?
        };
        let chain = ScopeChain::new(
            Arc::clone(&inner.manifest),
            Arc::new(request),
            configuration.unwrap_or_else(|| Arc::clone(&inner.no_configuration)),
            inner.service.load(),
        )?;
        Ok(RequestContext::new(Uuid::new_v4(), chain, Arc::clone(inner)))
    }

    /// Build, compile and publish a new service set.
    ///
    /// Requests already running keep the set they started with.
    pub fn deploy_service(&self, payload: &OverridePayload) -> Result<SetTag> {
        let set = OverrideSet::from_payload(Scope::Service, payload, &self.inner.manifest)?;
        self.publish_service(set)
    }

    fn publish_service(&self, set: OverrideSet) -> Result<SetTag> {
        self.inner
            .sandbox
            .precompile(&set)
            .map_err(|e| DispatchError::from_sandbox("service", e))?;
        let tag = set.tag().clone();
        self.inner.service.publish(set);
        tracing::info!(tag = %tag, "deployed service overrides");
        Ok(tag)
    }

    /// The live service fragment for `name`, if any.
    pub fn fragment_source(&self, name: &str) -> Result<Option<FragmentSource>> {
        let point = self.inner.manifest.require(name)?;
        let service = self.inner.service.load();
        Ok(service.get(name).map(|fragment| FragmentSource {
            point: point.clone(),
            source: fragment.source().to_string(),
            language: fragment.language(),
            set: service.tag().clone(),
        }))
    }

    /// Distinct service fragments recorded for `name` across retained
    /// service sets, oldest first.
    pub fn graduation_history(&self, name: &str) -> Result<Vec<FragmentSource>> {
        let point = self.inner.manifest.require(name)?;
        let mut history: Vec<FragmentSource> = Vec::new();
        let mut last_key = None;
        for set in self.inner.service.history() {
            let Some(fragment) = set.get(name) else {
                last_key = None;
                continue;
            };
            if last_key.as_ref() == Some(fragment.key()) {
                continue;
            }
            last_key = Some(fragment.key().clone());
            history.push(FragmentSource {
                point: point.clone(),
                source: fragment.source().to_string(),
                language: fragment.language(),
                set: set.tag().clone(),
            });
        }
        Ok(history)
    }

    /// Replace the override for `name` with native host code.
    ///
    /// Installs `host` as the new default, then publishes a service set
    /// without the fragment. Request and configuration overrides for the
    /// name still take precedence.
    pub fn graduate(&self, name: &str, host: impl HostFunction + 'static) -> Result<SetTag> {
        self.inner.manifest.require(name)?;
        self.inner.hosts.replace(name, Arc::new(host));

        let current = self.inner.service.load();
        let mut builder = OverrideSetBuilder::from_set(&current, &self.inner.manifest);
        let removed = builder.remove(name).is_some();
        let tag = self.publish_service(builder.build())?;
        tracing::info!(point = name, removed, tag = %tag, "graduated extension point");
        Ok(tag)
    }

    /// Evict idle, unreferenced configuration sets now.
    pub fn sweep_configurations(&self) -> usize {
        let evicted = self.inner.configurations.sweep();
        if evicted > 0 {
            tracing::debug!(evicted, "swept configuration sets");
        }
        evicted
    }

    pub fn cached_configurations(&self) -> usize {
        self.inner.configurations.len()
    }

    /// Sweep configuration sets every `interval` on the current tokio
    /// runtime. The task ends once every dispatcher clone is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                Dispatcher { inner }.sweep_configurations();
            }
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("extension_points", &self.inner.manifest.len())
            .field("service", &self.inner.service)
            .field("configurations", &self.inner.configurations)
            .field("sandbox", &self.inner.sandbox)
            .finish()
    }
}

/// Assembles a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    manifest: Option<Manifest>,
    hosts: HashMap<String, Arc<dyn HostFunction>>,
    state: Option<Arc<ProtectedState>>,
    service: OverridePayload,
    config: RuntimeConfig,
    sandbox: Option<Arc<Sandbox>>,
}

impl DispatcherBuilder {
    pub fn manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Register the host default for `name`.
    pub fn host(mut self, name: impl Into<String>, function: impl HostFunction + 'static) -> Self {
        self.hosts.insert(name.into(), Arc::new(function));
        self
    }

    pub fn state(mut self, state: Arc<ProtectedState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Initial service overrides.
    pub fn service(mut self, payload: OverridePayload) -> Self {
        self.service = payload;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing sandbox instead of creating one from the config.
    pub fn sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Validate and assemble.
    ///
    /// Every declared extension point needs a host default, every host
    /// default must be declared, and the service overrides must compile.
    pub fn build(self) -> Result<Dispatcher> {
        let manifest = self.manifest.ok_or_else(|| DispatchError::Config {
            message: "a manifest is required".to_string(),
        })?;

        let mut missing: Vec<&str> = manifest
            .points()
            .map(|point| point.name.as_str())
            .filter(|name| !self.hosts.contains_key(*name))
            .collect();
        missing.sort_unstable();
        if let Some(name) = missing.first() {
            return Err(DispatchError::MissingHostDefault {
                name: name.to_string(),
            });
        }
        if let Some(name) = self.hosts.keys().find(|name| !manifest.contains(name)) {
            return Err(DispatchError::UndeclaredExtensionPoint { name: name.clone() });
        }

        let sandbox = match self.sandbox {
            Some(sandbox) => sandbox,
            None => Arc::new(
                Sandbox::new(self.config.sandbox.clone()).map_err(DispatchError::Unavailable)?,
            ),
        };

        let service = OverrideSet::from_payload(Scope::Service, &self.service, &manifest)?;
        sandbox
            .precompile(&service)
            .map_err(|e| DispatchError::from_sandbox("service", e))?;

        tracing::info!(
            extension_points = manifest.len(),
            service_overrides = service.len(),
            "dispatcher ready"
        );

        let inner = Inner {
            manifest: Arc::new(manifest),
            hosts: HostRegistry::new(self.hosts),
            guard: StateGuard::new(self.state.unwrap_or_default()),
            sandbox,
            service: ServiceSlot::new(service, self.config.service_history),
            configurations: ConfigurationRegistry::new(self.config.configuration_ttl()),
            no_configuration: Arc::new(OverrideSet::empty(Scope::Configuration)),
            config: self.config,
        };
        Ok(Dispatcher {
            inner: Arc::new(inner),
        })
    }
}

/// Convenience for host defaults that ignore state.
pub fn host_fn<F>(f: F) -> impl HostFunction
where
    F: Fn(&[Value]) -> std::result::Result<Value, crate::host::HostError> + Send + Sync,
{
    move |args: &[Value], _: &ProtectedState| f(args)
}
