//! Conversions between Value, serde_json and serde types.
//!
//! Payloads, manifests and state files arrive as JSON; these helpers move
//! them into the Value tree the sandbox understands and back out again.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;

use crate::{Error, Value};

/// Convert a Value to a Rust type via serde.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value_to_json(value)).map_err(|e| Error::decode(e.to_string()))
}

/// Convert a Rust type to a Value via serde.
pub fn to_value<T: Serialize>(data: &T) -> Result<Value, Error> {
    let json = serde_json::to_value(data).map_err(|e| Error::encode(e.to_string()))?;
    Ok(json_to_value(json))
}

/// Parse JSON text into a Value.
pub fn parse_json(text: &str) -> Result<Value, Error> {
    let json: Json = serde_json::from_str(text).map_err(|e| Error::decode(e.to_string()))?;
    Ok(json_to_value(json))
}

/// Render a Value as compact JSON text.
pub fn to_json_string(value: &Value) -> String {
    value_to_json(value.clone()).to_string()
}

/// Convert a Value to `serde_json::Value`.
///
/// Bytes become base64 strings and non-finite floats become `null`; JSON
/// has no way to say either.
pub fn value_to_json(value: Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(b),
        Value::Integer(i) => Json::from(i),
        Value::Float(f) => serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number),
        Value::String(s) => Json::String(s),
        Value::Bytes(bytes) => Json::String(BASE64.encode(bytes)),
        Value::Array(items) => items.into_iter().map(value_to_json).collect(),
        Value::Map(entries) => Json::Object(
            entries
                .into_iter()
                .map(|(key, item)| (key, value_to_json(item)))
                .collect(),
        ),
    }
}

/// Convert `serde_json::Value` to a Value.
///
/// Integers that do not fit in `i64` become floats.
pub fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        Json::Object(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| (key, json_to_value(item)))
                .collect(),
        ),
    }
}
