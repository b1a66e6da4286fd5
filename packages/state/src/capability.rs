//! State capability declarations.
//!
//! Every extension point declares which fields of the protected state its
//! fragments may touch, and how.

use hotmod_core::Path;
use serde::{Deserialize, Serialize};

/// How a fragment may reach protected state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// No state access at all.
    #[default]
    None,
    /// Zero-copy view of the current snapshot; writes are rejected.
    ReadOnly,
    /// Private deep copy of the declared fields; writes are discarded.
    PrivateCopy,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::None => write!(f, "none"),
            AccessMode::ReadOnly => write!(f, "read_only"),
            AccessMode::PrivateCopy => write!(f, "private_copy"),
        }
    }
}

/// Access mode plus the state fields it applies to.
///
/// A field grants access to itself and everything below it. An empty path
/// grants the whole tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capability {
    pub mode: AccessMode,
    pub fields: Vec<Path>,
}

impl Capability {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn read_only(fields: impl IntoIterator<Item = Path>) -> Self {
        Self {
            mode: AccessMode::ReadOnly,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn private_copy(fields: impl IntoIterator<Item = Path>) -> Self {
        Self {
            mode: AccessMode::PrivateCopy,
            fields: fields.into_iter().collect(),
        }
    }

    /// Whether `path` lies within a declared field.
    pub fn permits(&self, path: &Path) -> bool {
        self.mode != AccessMode::None && covers(&self.fields, path)
    }
}

pub(crate) fn covers(fields: &[Path], path: &Path) -> bool {
    fields.iter().any(|field| path.has_prefix(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmod_core::path;

    #[test]
    fn fields_grant_subtrees_only() {
        let cap = Capability::read_only([path!("limits")]);
        assert!(cap.permits(&path!("limits")));
        assert!(cap.permits(&path!("limits/daily")));
        assert!(!cap.permits(&path!("secrets")));
        assert!(!cap.permits(&Path::root()));
    }

    #[test]
    fn root_field_grants_everything() {
        let cap = Capability::private_copy([Path::root()]);
        assert!(cap.permits(&path!("anything/at/all")));
    }

    #[test]
    fn none_mode_permits_nothing() {
        let cap = Capability {
            mode: AccessMode::None,
            fields: vec![Path::root()],
        };
        assert!(!cap.permits(&path!("limits")));
    }

    #[test]
    fn deserializes_from_manifest_form() {
        let cap: Capability =
            serde_json::from_str(r#"{"mode": "private_copy", "fields": ["cart/items"]}"#).unwrap();
        assert_eq!(cap.mode, AccessMode::PrivateCopy);
        assert_eq!(cap.fields, vec![path!("cart/items")]);

        let default: Capability = serde_json::from_str("{}").unwrap();
        assert_eq!(default, Capability::none());
    }
}
