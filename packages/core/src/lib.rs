//! Core hotmod types
//!
//! This layer defines the data that crosses the boundary between host code
//! and override fragments:
//! - `Value`: Dynamically-typed tree (arguments, results, protected state)
//! - `Path`: Validated address of a field inside a state tree
//! - `Reader` / `Writer`: access traits implemented by guarded state views
//! - `convert`: JSON and serde conversions for payloads and state files
//!
//! # Example
//!
//! ```rust
//! use hotmod_core::{Reader, Value, path};
//!
//! fn daily_limit(state: &mut dyn Reader) -> Result<Option<Value>, hotmod_core::Error> {
//!     state.read(&path!("limits/daily"))
//! }
//! ```

pub mod convert;
mod error;
mod path;
mod traits;
mod value;

pub use error::{Error, Result};
pub use path::{Path, PathError};
pub use traits::{Reader, Writer};
pub use value::Value;
