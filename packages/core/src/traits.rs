//! State access traits.
//!
//! Guarded state views implement both. A fragment never sees the shared
//! state directly; every access it makes goes through one of these.

use crate::{Error, Path, Value};

/// Read values at paths.
///
/// Object-safe: views are handed around as `&mut dyn Reader`.
pub trait Reader: Send + Sync {
    /// Read the value at `from`.
    ///
    /// * `Ok(None)` - nothing at the path.
    /// * `Ok(Some(value))` - an owned copy of the value.
    /// * `Err(Error)` - the read was rejected.
    fn read(&mut self, from: &Path) -> Result<Option<Value>, Error>;
}

/// Write values at paths.
pub trait Writer: Send + Sync {
    /// Write `value` at `to`, returning the path written.
    fn write(&mut self, to: &Path, value: Value) -> Result<Path, Error>;
}
