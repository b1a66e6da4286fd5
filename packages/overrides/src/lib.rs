//! Extension points and layered overrides.
//!
//! A service declares its overridable locations in a [`Manifest`]. Override
//! fragments for those locations arrive at three scopes, each collected into
//! an immutable [`OverrideSet`]:
//!
//! | scope         | lifetime                               | holder                     |
//! |---------------|----------------------------------------|----------------------------|
//! | request       | one request                            | built per request          |
//! | configuration | while referenced, then TTL             | [`ConfigurationRegistry`]  |
//! | service       | process, swapped on deploy             | [`ServiceSlot`]            |
//!
//! A [`ScopeChain`] stacks the three for one request and resolves a name to
//! the most specific override, or to the host default when no layer binds
//! it. Undeclared names are always an error.
//!
//! ```
//! use std::sync::Arc;
//! use hotmod_overrides::{
//!     ExtensionPoint, Manifest, OverridePayload, OverrideSet, Resolution, Scope, ScopeChain,
//! };
//!
//! let manifest = Arc::new(Manifest::from_points([ExtensionPoint::new("fun1", 1)]).unwrap());
//! let layer = |scope, payload: OverridePayload| {
//!     Arc::new(OverrideSet::from_payload(scope, &payload, &manifest).unwrap())
//! };
//! let chain = ScopeChain::new(
//!     manifest.clone(),
//!     layer(Scope::Request, OverridePayload::new()),
//!     layer(Scope::Configuration, OverridePayload::new().with("fun1", "input.a.len()")),
//!     layer(Scope::Service, OverridePayload::new().with("fun1", "42")),
//! )
//! .unwrap();
//!
//! match chain.resolve("fun1").unwrap() {
//!     Resolution::Override { fragment, scope } => {
//!         assert_eq!(scope, Scope::Configuration);
//!         assert_eq!(fragment.source(), "input.a.len()");
//!     }
//!     Resolution::HostDefault => unreachable!(),
//! }
//! assert!(chain.resolve("fun2").is_err());
//! ```

mod chain;
mod configuration;
mod error;
mod fragment;
mod manifest;
mod payload;
mod service;
mod set;

pub use chain::{Resolution, ScopeChain};
pub use configuration::ConfigurationRegistry;
pub use error::{OverrideError, Result};
pub use fragment::{FragmentKey, Language, OverrideFragment, Scope};
pub use manifest::{ExtensionPoint, Manifest};
pub use payload::{OverridePayload, PayloadEntry};
pub use service::ServiceSlot;
pub use set::{OverrideSet, OverrideSetBuilder, SetTag};
