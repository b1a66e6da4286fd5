//! Views of protected state handed to sandboxed code.
//!
//! A view is never a live reference to shared memory: it either borrows an
//! immutable snapshot or owns a private copy of the declared fields.

use std::sync::Arc;

use hotmod_core::{Error, Path, Reader, Value, Writer};

use crate::capability::{covers, AccessMode};

/// Zero-copy, write-rejecting view of a snapshot.
pub struct ReadOnlyView {
    snapshot: Arc<Value>,
    fields: Arc<[Path]>,
}

impl ReadOnlyView {
    pub fn new(snapshot: Arc<Value>, fields: Arc<[Path]>) -> Self {
        Self { snapshot, fields }
    }
}

impl Reader for ReadOnlyView {
    fn read(&mut self, from: &Path) -> Result<Option<Value>, Error> {
        check(&self.fields, from)?;
        Ok(self.snapshot.get(from).cloned())
    }
}

impl Writer for ReadOnlyView {
    fn write(&mut self, to: &Path, _value: Value) -> Result<Path, Error> {
        check(&self.fields, to)?;
        Err(Error::ReadOnly { path: to.clone() })
    }
}

/// Private copy of the declared fields. Writes stay here.
pub struct PrivateCopy {
    root: Value,
    fields: Arc<[Path]>,
    writes: usize,
}

impl PrivateCopy {
    /// Deep-copy only the declared fields out of `snapshot`.
    pub fn new(snapshot: &Value, fields: Arc<[Path]>) -> Self {
        let mut root = Value::Null;
        for field in fields.iter() {
            if let Some(value) = snapshot.get(field) {
                // Declared fields come from a valid tree, so this cannot
                // traverse a scalar unless two fields overlap.
                if root.set(field, value.clone()).is_err() {
                    tracing::warn!(%field, "overlapping state field skipped in private copy");
                }
            }
        }
        Self {
            root,
            fields,
            writes: 0,
        }
    }

    /// Number of writes absorbed by this copy.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Reader for PrivateCopy {
    fn read(&mut self, from: &Path) -> Result<Option<Value>, Error> {
        check(&self.fields, from)?;
        Ok(self.root.get(from).cloned())
    }
}

impl Writer for PrivateCopy {
    fn write(&mut self, to: &Path, value: Value) -> Result<Path, Error> {
        check(&self.fields, to)?;
        self.root.set(to, value)?;
        self.writes += 1;
        Ok(to.clone())
    }
}

fn check(fields: &[Path], path: &Path) -> Result<(), Error> {
    if covers(fields, path) {
        Ok(())
    } else {
        Err(Error::Denied {
            path: path.clone(),
            reason: "field not declared by extension point".to_string(),
        })
    }
}

/// The state a single invocation may see.
pub enum StateView {
    None,
    ReadOnly(ReadOnlyView),
    Private(PrivateCopy),
}

impl StateView {
    pub fn mode(&self) -> AccessMode {
        match self {
            StateView::None => AccessMode::None,
            StateView::ReadOnly(_) => AccessMode::ReadOnly,
            StateView::Private(_) => AccessMode::PrivateCopy,
        }
    }
}

impl Reader for StateView {
    fn read(&mut self, from: &Path) -> Result<Option<Value>, Error> {
        match self {
            StateView::None => Err(Error::Denied {
                path: from.clone(),
                reason: "extension point declares no state access".to_string(),
            }),
            StateView::ReadOnly(view) => view.read(from),
            StateView::Private(copy) => copy.read(from),
        }
    }
}

impl Writer for StateView {
    fn write(&mut self, to: &Path, value: Value) -> Result<Path, Error> {
        match self {
            StateView::None => Err(Error::Denied {
                path: to.clone(),
                reason: "extension point declares no state access".to_string(),
            }),
            StateView::ReadOnly(view) => view.write(to, value),
            StateView::Private(copy) => copy.write(to, value),
        }
    }
}

impl std::fmt::Debug for StateView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateView({})", self.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;
    use hotmod_core::path;

    fn tree() -> Value {
        Value::Map(btree! {
            "limits".to_string() => Value::Map(btree! {
                "daily".to_string() => Value::Integer(100),
            }),
            "secrets".to_string() => Value::from("hunter2"),
        })
    }

    fn fields(list: &[&str]) -> Arc<[Path]> {
        list.iter().map(|f| path!(f)).collect()
    }

    #[test]
    fn read_only_reads_declared_fields() {
        let mut view = ReadOnlyView::new(Arc::new(tree()), fields(&["limits"]));
        assert_eq!(
            view.read(&path!("limits/daily")).unwrap(),
            Some(Value::Integer(100))
        );
        assert!(matches!(
            view.read(&path!("secrets")),
            Err(Error::Denied { .. })
        ));
    }

    #[test]
    fn read_only_rejects_writes() {
        let snapshot = Arc::new(tree());
        let mut view = ReadOnlyView::new(snapshot.clone(), fields(&["limits"]));
        let err = view
            .write(&path!("limits/daily"), Value::Integer(0))
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnly { .. }));
        assert_eq!(*snapshot, tree());
    }

    #[test]
    fn private_copy_holds_only_declared_fields() {
        let mut copy = PrivateCopy::new(&tree(), fields(&["limits"]));
        copy.write(&path!("limits/daily"), Value::Integer(5)).unwrap();
        assert_eq!(
            copy.read(&path!("limits/daily")).unwrap(),
            Some(Value::Integer(5))
        );
        assert_eq!(copy.writes(), 1);
        assert!(copy.read(&path!("secrets")).is_err());
        assert!(copy.write(&path!("secrets"), Value::Null).is_err());
    }

    #[test]
    fn none_view_denies_everything() {
        let mut view = StateView::None;
        assert!(view.read(&path!("limits")).is_err());
        assert!(view.write(&path!("limits"), Value::Null).is_err());
        assert_eq!(view.mode(), AccessMode::None);
    }
}
