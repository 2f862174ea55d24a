//! Dynamic document value type.

use crate::error::{CodecError, CodecResult};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic document value.
///
/// This is the shape both local application state and remote documents take
/// on the way through the sync engine. Maps are keyed by strings, which is
/// what document stores accept as field names.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// 64-bit float. Must be finite to be encoded.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of named fields.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a map value from field/value pairs.
    pub fn map<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// An empty map.
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Short name of this value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a field in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Converts any serializable type into a `Value`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serde`] if the type does not serialize to a
    /// JSON-compatible shape (for example, maps with non-string keys).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> CodecResult<Self> {
        let json = serde_json::to_value(value)?;
        Ok(serde_json::from_value(json)?)
    }

    /// Converts this value into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serde`] if the shape does not match `T`.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> CodecResult<T> {
        let json = serde_json::to_value(self)?;
        Ok(serde_json::from_value(json)?)
    }

    /// Converts this value into a `serde_json::Value`.
    ///
    /// Non-finite floats become JSON `null`, following `serde_json`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serde`] if serialization fails.
    pub fn to_json(&self) -> CodecResult<serde_json::Value> {
        serde_json::to_value(self).map_err(CodecError::from)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON-compatible document value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| E::custom(format!("integer {v} does not fit in i64")))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut fields = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            fields.insert(key, value);
        }
        Ok(Value::Map(fields))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: String,
        done: bool,
        xp: i64,
    }

    #[test]
    fn map_get_and_accessors() {
        let v = Value::map([
            ("name", Value::from("Alice")),
            ("xp", Value::from(30i64)),
            ("ratio", Value::from(0.5)),
        ]);

        assert_eq!(v.get("name").and_then(Value::as_text), Some("Alice"));
        assert_eq!(v.get("xp").and_then(Value::as_integer), Some(30));
        assert_eq!(v.get("ratio").and_then(Value::as_float), Some(0.5));
        assert_eq!(v.get("missing"), None);
        assert_eq!(Value::from(3i64).as_float(), Some(3.0));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_integer(), None);
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::empty_map().kind(), "map");
        assert_eq!(Value::Array(vec![]).kind(), "array");
    }

    #[test]
    fn json_round_trip() {
        let json = serde_json::json!({
            "tasks": [{"id": "t1", "done": false}],
            "xp": 120,
            "settings": {"volume": 0.75, "theme": null}
        });
        let value: Value = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(value.get("xp"), Some(&Value::Integer(120)));
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn typed_conversion() {
        let task = Task {
            id: "t1".into(),
            done: true,
            xp: 15,
        };
        let value = Value::from_serialize(&task).unwrap();
        assert_eq!(value.get("done"), Some(&Value::Bool(true)));
        let back: Task = value.deserialize_into().unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn oversized_unsigned_is_rejected() {
        let result: Result<Value, _> = serde_json::from_str("18446744073709551615");
        assert!(result.is_err());
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }
}
