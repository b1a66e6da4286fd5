//! hotmod: hot modification of running services.
//!
//! Host code declares extension points in a [`Manifest`] and registers a
//! compiled-in default for each. Short script fragments can then override
//! any declared point at three scopes, most specific first: the request,
//! the configuration the request belongs to, and the whole service.
//! Overrides run sandboxed under a time and memory budget and reach
//! protected state only through the capability their point declares.
//!
//! The crates underneath:
//!
//! - [`core`]: values, paths and the read/write traits
//! - [`state`]: protected state and the views handed to fragments
//! - [`overrides`]: manifests, payloads, override sets and scope chains
//! - [`sandbox`]: script engines, budgets and execution units
//! - [`dispatch`]: the dispatcher tying them together
//!
//! ```no_run
//! use hotmod::{host_fn, Dispatcher, ExtensionPoint, Manifest, OverridePayload, Value};
//!
//! # async fn demo() -> Result<(), hotmod::DispatchError> {
//! let dispatcher = Dispatcher::builder()
//!     .manifest(Manifest::from_points([ExtensionPoint::new("fun1", 1)])?)
//!     .host("fun1", host_fn(|_| Ok(Value::Integer(42))))
//!     .build()?;
//!
//! let configuration =
//!     dispatcher.configuration("tenant-a", &OverridePayload::new().with("fun1", "input.a.len()"))?;
//! let request = dispatcher.begin_request(Some(configuration), &OverridePayload::new())?;
//! let value = request.dispatch("fun1", vec![Value::from("ignored")]).await;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub use hotmod_core as core;
pub use hotmod_dispatch as dispatch;
pub use hotmod_overrides as overrides;
pub use hotmod_sandbox as sandbox;
pub use hotmod_state as state;

pub use hotmod_core::{path, Path, Value};
pub use hotmod_dispatch::{
    host_fn, DispatchError, Dispatcher, HostError, HostFunction, RequestContext, RuntimeConfig,
};
pub use hotmod_overrides::{ExtensionPoint, Language, Manifest, OverridePayload, Scope};
pub use hotmod_sandbox::{Budget, FaultKind, Resource};
pub use hotmod_state::{AccessMode, Capability, ProtectedState};
