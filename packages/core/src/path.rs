//! Addresses of fields inside protected state.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A state path that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path component '{component}' at position {position}: {reason}")]
pub struct PathError {
    pub component: String,
    pub position: usize,
    pub reason: &'static str,
}

/// A validated, `/`-separated path into a state tree.
///
/// Each component is either a Unicode identifier (UAX#31 `XID_Start`
/// followed by `XID_Continue`, a leading `_` allowed when something follows
/// it) or a run of ASCII digits indexing into an array. Manifests and
/// fragments use the same text form, e.g. `cart/items/0/price`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Path {
    pub components: Vec<String>,
}

impl Path {
    /// The empty path, addressing the whole tree.
    pub fn root() -> Self {
        Path::default()
    }

    /// Parse `text`, ignoring empty components.
    ///
    /// ```rust
    /// use hotmod_core::Path;
    ///
    /// let path = Path::parse("cart/items/0").unwrap();
    /// assert_eq!(path.len(), 3);
    /// assert_eq!(Path::parse("/cart//items/").unwrap(), Path::parse("cart/items").unwrap());
    /// assert!(Path::parse("cart/total-price").is_err());
    /// ```
    pub fn parse(text: &str) -> Result<Self, PathError> {
        let components = text
            .split('/')
            .filter(|c| !c.is_empty())
            .enumerate()
            .map(|(position, component)| {
                check_component(component).map_err(|reason| PathError {
                    component: component.to_string(),
                    position,
                    reason,
                })?;
                Ok(component.to_string())
            })
            .collect::<Result<Vec<_>, PathError>>()?;
        Ok(Path { components })
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.components.iter()
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        self.components.starts_with(&prefix.components)
    }
}

fn check_component(component: &str) -> Result<(), &'static str> {
    if component.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(());
    }
    let mut chars = component.chars();
    let starts_well = match chars.next() {
        Some('_') => chars.clone().next().is_some_and(unicode_ident::is_xid_continue),
        Some(first) => unicode_ident::is_xid_start(first),
        None => false,
    };
    if !starts_well {
        return Err("must start with a letter, or an underscore and a letter or digit");
    }
    if !chars.all(unicode_ident::is_xid_continue) {
        return Err("contains a character that is not allowed in an identifier");
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

impl std::str::FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

// Manifests declare state fields as plain strings.
impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Path::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Path literal; panics on an invalid path.
///
/// ```rust
/// use hotmod_core::path;
///
/// assert_eq!(path!("cart/total").len(), 2);
/// ```
#[macro_export]
macro_rules! path {
    ($s:expr) => {
        $crate::Path::parse($s).expect("invalid path literal")
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slashes_normalize() {
        assert!(Path::parse("").unwrap().is_empty());
        assert_eq!(path!("cart//items/"), path!("cart/items"));
        assert_eq!(path!("/cart"), path!("cart"));
        assert_eq!(path!("cart/items/0").to_string(), "cart/items/0");
    }

    #[test]
    fn components_must_be_identifiers_or_indexes() {
        assert!(Path::parse("items/0/name").is_ok());
        assert!(Path::parse("_private/ünïcode").is_ok());
        for bad in ["total price", "total-price", ".hidden", "123abc", "_"] {
            assert!(Path::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn error_names_component_and_position() {
        let err = Path::parse("cart/to$tal").unwrap_err();
        assert_eq!(err.component, "to$tal");
        assert_eq!(err.position, 1);
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn prefixes() {
        let p = path!("cart/items/0");
        assert!(p.has_prefix(&Path::root()));
        assert!(p.has_prefix(&path!("cart")));
        assert!(p.has_prefix(&p));
        assert!(!p.has_prefix(&path!("items")));
        assert!(!path!("cart").has_prefix(&p));
    }

    #[test]
    fn serde_uses_text_form() {
        let p: Path = serde_json::from_str("\"cart/total\"").unwrap();
        assert_eq!(p, path!("cart/total"));
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"cart/total\"");
        assert!(serde_json::from_str::<Path>("\"bad-name\"").is_err());
    }
}
