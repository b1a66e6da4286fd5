//! Most-specific-first resolution across the three override scopes.

use std::sync::Arc;

use crate::error::{OverrideError, Result};
use crate::fragment::{OverrideFragment, Scope};
use crate::manifest::{ExtensionPoint, Manifest};
use crate::set::OverrideSet;

/// What a name resolves to for one request.
#[derive(Clone, Debug)]
pub enum Resolution {
    /// The most specific override bound to the name.
    Override {
        fragment: Arc<OverrideFragment>,
        scope: Scope,
    },
    /// Declared, but no layer overrides it.
    HostDefault,
}

impl Resolution {
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Resolution::Override { scope, .. } => Some(*scope),
            Resolution::HostDefault => None,
        }
    }
}

/// The request, configuration and service layers seen by one request.
///
/// Read-only once built. Only the request layer is new per request; the
/// other two are shared snapshots.
#[derive(Clone, Debug)]
pub struct ScopeChain {
    manifest: Arc<Manifest>,
    layers: [Arc<OverrideSet>; 3],
}

impl ScopeChain {
    /// Fails with `ScopeMismatch` unless each set belongs to the scope of
    /// its position.
    pub fn new(
        manifest: Arc<Manifest>,
        request: Arc<OverrideSet>,
        configuration: Arc<OverrideSet>,
        service: Arc<OverrideSet>,
    ) -> Result<Self> {
        let layers = [request, configuration, service];
        for (expected, layer) in [Scope::Request, Scope::Configuration, Scope::Service]
            .into_iter()
            .zip(&layers)
        {
            if layer.scope() != expected {
                return Err(OverrideError::ScopeMismatch {
                    expected,
                    found: layer.scope(),
                });
            }
        }
        Ok(Self { manifest, layers })
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    /// Declaration of `name`, or `UndeclaredExtensionPoint`.
    pub fn point(&self, name: &str) -> Result<&ExtensionPoint> {
        self.manifest.require(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Resolution> {
        if !self.manifest.contains(name) {
            return Err(OverrideError::undeclared(name));
        }
        for layer in &self.layers {
            if let Some(fragment) = layer.get(name) {
                return Ok(Resolution::Override {
                    fragment: Arc::clone(fragment),
                    scope: layer.scope(),
                });
            }
        }
        Ok(Resolution::HostDefault)
    }

    /// Scope whose override wins for `name`, if any.
    pub fn owner(&self, name: &str) -> Option<Scope> {
        self.layers
            .iter()
            .find(|layer| layer.contains(name))
            .map(|layer| layer.scope())
    }

    pub fn layer(&self, scope: Scope) -> &Arc<OverrideSet> {
        &self.layers[scope.index()]
    }

    /// Layers, most specific first.
    pub fn layers(&self) -> impl Iterator<Item = &Arc<OverrideSet>> {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ExtensionPoint;
    use crate::payload::OverridePayload;

    fn manifest() -> Arc<Manifest> {
        Arc::new(
            Manifest::from_points([ExtensionPoint::new("fun1", 1), ExtensionPoint::new("fun3", 0)])
                .unwrap(),
        )
    }

    fn set(scope: Scope, payload: OverridePayload, manifest: &Manifest) -> Arc<OverrideSet> {
        Arc::new(OverrideSet::from_payload(scope, &payload, manifest).unwrap())
    }

    fn chain(request: OverridePayload, configuration: OverridePayload) -> ScopeChain {
        let manifest = manifest();
        let service = set(Scope::Service, OverridePayload::new().with("fun1", "42"), &manifest);
        let configuration = set(Scope::Configuration, configuration, &manifest);
        let request = set(Scope::Request, request, &manifest);
        ScopeChain::new(manifest, request, configuration, service).unwrap()
    }

    fn resolved_source(chain: &ScopeChain, name: &str) -> (String, Scope) {
        match chain.resolve(name).unwrap() {
            Resolution::Override { fragment, scope } => (fragment.source().to_string(), scope),
            Resolution::HostDefault => panic!("expected an override for {name}"),
        }
    }

    #[test]
    fn service_layer_alone() {
        let chain = chain(OverridePayload::new(), OverridePayload::new());
        assert_eq!(resolved_source(&chain, "fun1"), ("42".into(), Scope::Service));
    }

    #[test]
    fn configuration_beats_service() {
        let chain = chain(
            OverridePayload::new(),
            OverridePayload::new().with("fun1", "input.a.len()"),
        );
        assert_eq!(
            resolved_source(&chain, "fun1"),
            ("input.a.len()".into(), Scope::Configuration)
        );
    }

    #[test]
    fn request_beats_configuration() {
        let chain = chain(
            OverridePayload::new().with("fun1", "input.a.len() * 2"),
            OverridePayload::new().with("fun1", "input.a.len()"),
        );
        assert_eq!(chain.owner("fun1"), Some(Scope::Request));
        assert_eq!(
            resolved_source(&chain, "fun1"),
            ("input.a.len() * 2".into(), Scope::Request)
        );
    }

    #[test]
    fn declared_without_override_is_host_default() {
        let chain = chain(OverridePayload::new(), OverridePayload::new());
        assert!(matches!(chain.resolve("fun3").unwrap(), Resolution::HostDefault));
        assert_eq!(chain.owner("fun3"), None);
    }

    #[test]
    fn undeclared_name_is_an_error() {
        let chain = chain(OverridePayload::new(), OverridePayload::new());
        let err = chain.resolve("fun2").unwrap_err();
        assert!(matches!(err, OverrideError::UndeclaredExtensionPoint { name } if name == "fun2"));
    }

    #[test]
    fn layers_must_match_their_position() {
        let manifest = manifest();
        let service = set(Scope::Service, OverridePayload::new(), &manifest);
        let configuration = set(Scope::Configuration, OverridePayload::new(), &manifest);
        let request = set(Scope::Request, OverridePayload::new(), &manifest);

        let err = ScopeChain::new(
            Arc::clone(&manifest),
            Arc::clone(&service),
            Arc::clone(&configuration),
            Arc::clone(&request),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OverrideError::ScopeMismatch {
                expected: Scope::Request,
                found: Scope::Service,
            }
        ));
        assert!(ScopeChain::new(manifest, request, configuration, service).is_ok());
    }

    #[test]
    fn resolution_is_repeatable() {
        let chain = chain(OverridePayload::new().with("fun1", "1"), OverridePayload::new());
        let first = resolved_source(&chain, "fun1");
        let second = resolved_source(&chain, "fun1");
        assert_eq!(first, second);
        assert_eq!(chain.layer(Scope::Request).len(), 1);
        assert_eq!(chain.layers().count(), 3);
    }
}
