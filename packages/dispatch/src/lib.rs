//! Invocation dispatch through scoped overrides.
//!
//! A [`Dispatcher`] owns the extension point manifest, the compiled-in host
//! defaults, the protected state and the sandbox. Each request gets a
//! [`RequestContext`] whose scope chain is fixed for its lifetime:
//!
//! 1. request overrides, carried by the request itself
//! 2. configuration overrides, shared by every request with the same id
//! 3. service overrides, swapped atomically by [`Dispatcher::deploy_service`]
//!
//! Calling [`RequestContext::dispatch`] runs the most specific override in
//! the sandbox, or the host default when no layer binds the name.
//!
//! ```no_run
//! # async fn demo() -> hotmod_dispatch::Result<()> {
//! use hotmod_core::Value;
//! use hotmod_dispatch::{host_fn, Dispatcher};
//! use hotmod_overrides::{ExtensionPoint, Manifest, OverridePayload};
//!
//! let dispatcher = Dispatcher::builder()
//!     .manifest(Manifest::from_points([ExtensionPoint::new("fun1", 1)])?)
//!     .host("fun1", host_fn(|_| Ok(Value::Integer(42))))
//!     .build()?;
//!
//! let request = dispatcher.begin_request(None, &OverridePayload::new().with("fun1", "input * 2"))?;
//! assert_eq!(request.dispatch("fun1", vec![Value::Integer(5)]).await?, Value::Integer(10));
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatcher;
mod error;
mod host;
mod request;

pub use config::{BudgetTable, RuntimeConfig};
pub use dispatcher::{host_fn, Dispatcher, DispatcherBuilder, FragmentSource};
pub use error::{DispatchError, Result};
pub use host::{HostError, HostFunction};
pub use request::RequestContext;
