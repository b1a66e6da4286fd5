//! The Value type - the tree-shaped data exchanged across the dispatch boundary.
//!
//! Arguments, results and protected state are all Values. A Value owns its
//! whole tree, so cloning one yields a snapshot that shares nothing with the
//! original.

use std::collections::BTreeMap;

use crate::{Error, Path};

/// A dynamically-typed tree value.
///
/// # Design Notes
///
/// - Uses `BTreeMap` for deterministic ordering (identical inputs produce
///   identical iteration order inside fragments)
/// - Includes `Bytes` for binary data
/// - Uses `i64` for integers, matching the script engine's integer type
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Key-value map with string keys.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Rough heap footprint of the tree in bytes.
    ///
    /// Used to enforce memory ceilings on values crossing the sandbox
    /// boundary. Counts payload bytes plus a fixed per-node overhead.
    pub fn approx_size(&self) -> usize {
        const NODE: usize = std::mem::size_of::<Value>();
        match self {
            Value::Null | Value::Bool(_) | Value::Integer(_) | Value::Float(_) => NODE,
            Value::String(s) => NODE + s.len(),
            Value::Bytes(b) => NODE + b.len(),
            Value::Array(items) => NODE + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Map(map) => {
                NODE + map
                    .iter()
                    .map(|(k, v)| k.len() + v.approx_size())
                    .sum::<usize>()
            }
        }
    }

    /// The value at `path`, if every step along it exists.
    ///
    /// Numeric components index arrays; anything else looks up a map key.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| match node {
            Value::Map(entries) => entries.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Store `value` at `path`.
    ///
    /// Missing map entries along the way are created, and a `Null` node is
    /// promoted to an empty map. An array index may address an existing
    /// element or append one past the end. Stepping through a scalar fails.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<(), Error> {
        let Some((last, parents)) = path.components.split_last() else {
            *self = value;
            return Ok(());
        };
        let mut node = self;
        for key in parents {
            node = node.child_mut(key)?;
        }
        node.put_child(last, value)
    }

    fn child_mut(&mut self, key: &str) -> Result<&mut Value, Error> {
        if self.is_null() {
            *self = Value::map();
        }
        match self {
            Value::Map(entries) => Ok(entries.entry(key.to_string()).or_default()),
            Value::Array(items) => {
                let index = array_index(key)?;
                let len = items.len();
                items.get_mut(index).ok_or_else(|| out_of_bounds(index, len))
            }
            other => Err(Error::InvalidPath {
                message: format!("'{key}' is below a {} value", other.type_name()),
            }),
        }
    }

    fn put_child(&mut self, key: &str, value: Value) -> Result<(), Error> {
        if self.is_null() {
            *self = Value::map();
        }
        match self {
            Value::Map(entries) => {
                entries.insert(key.to_string(), value);
            }
            Value::Array(items) => match array_index(key)? {
                index if index < items.len() => items[index] = value,
                index if index == items.len() => items.push(value),
                index => return Err(out_of_bounds(index, items.len())),
            },
            other => {
                return Err(Error::InvalidPath {
                    message: format!("cannot store '{key}' inside a {} value", other.type_name()),
                })
            }
        }
        Ok(())
    }
}

fn array_index(key: &str) -> Result<usize, Error> {
    key.parse().map_err(|_| Error::InvalidPath {
        message: format!("'{key}' is not an array index"),
    })
}

fn out_of_bounds(index: usize, len: usize) -> Error {
    Error::InvalidPath {
        message: format!("index {index} is past the end of an array of {len}"),
    }
}

macro_rules! value_from {
    ($($source:ty => |$v:ident| $body:expr;)*) => {
        $(
            impl From<$source> for Value {
                fn from($v: $source) -> Self {
                    $body
                }
            }
        )*
    };
}

value_from! {
    bool => |v| Value::Bool(v);
    i64 => |v| Value::Integer(v);
    i32 => |v| Value::Integer(i64::from(v));
    f64 => |v| Value::Float(v);
    String => |v| Value::String(v);
    &str => |v| Value::String(v.to_owned());
    Vec<u8> => |v| Value::Bytes(v);
    BTreeMap<String, Value> => |v| Value::Map(v);
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::Array(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use collection_literals::btree;

    fn cart() -> Value {
        Value::Map(btree! {
            "total".to_string() => Value::Integer(10),
            "items".to_string() => ["apple", "pear"].into_iter().collect(),
        })
    }

    #[test]
    fn get_walks_maps_and_arrays() {
        let cart = cart();
        assert_eq!(cart.get(&path!("total")), Some(&Value::Integer(10)));
        assert_eq!(cart.get(&path!("items/1")), Some(&Value::from("pear")));
        assert_eq!(cart.get(&path!("items/2")), None);
        assert_eq!(cart.get(&path!("total/amount")), None);
        assert_eq!(cart.get(&Path::root()), Some(&cart));
    }

    #[test]
    fn set_creates_missing_maps() {
        let mut state = Value::Null;
        state.set(&path!("limits/daily/max"), Value::from(5i64)).unwrap();
        assert_eq!(state.get(&path!("limits/daily/max")), Some(&Value::Integer(5)));
        assert!(state.get(&path!("limits")).unwrap().is_map());
    }

    #[test]
    fn set_replaces_and_appends_array_elements() {
        let mut cart = cart();
        cart.set(&path!("items/0"), Value::from("plum")).unwrap();
        cart.set(&path!("items/2"), Value::from("fig")).unwrap();
        assert_eq!(cart.get(&path!("items/0")), Some(&Value::from("plum")));
        assert_eq!(cart.get(&path!("items/2")), Some(&Value::from("fig")));

        let err = cart.set(&path!("items/9"), Value::Null).unwrap_err();
        assert!(err.to_string().contains("past the end"));
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut cart = cart();
        assert!(cart.set(&path!("total/amount"), Value::Null).is_err());
        assert!(cart.set(&path!("total/amount/x"), Value::Null).is_err());
        assert_eq!(cart.get(&path!("total")), Some(&Value::Integer(10)));
    }

    #[test]
    fn approx_size_grows_with_payload() {
        let small = Value::from("ab");
        let large = Value::from("a".repeat(1024));
        assert!(large.approx_size() > small.approx_size() + 1000);

        let nested: Value = [large.clone(), large].into_iter().collect();
        assert!(nested.approx_size() > 2048);
    }

    #[test]
    fn clone_is_independent() {
        let mut original = cart();
        let snapshot = original.clone();
        original.set(&path!("total"), Value::from(0i64)).unwrap();
        assert_eq!(snapshot.get(&path!("total")), Some(&Value::Integer(10)));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(3i64).as_f64(), Some(3.0));
        assert_eq!(Value::from(3i32).as_i64(), Some(3));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::map().type_name(), "map");
    }
}
