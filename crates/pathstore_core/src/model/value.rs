//! Attribute values and their storage encoding.
//!
//! # Responsibility
//! - Define the tagged value carried by every attribute record.
//! - Encode values into a canonical `(kind, value)` pair for persistence.
//! - Decode persisted pairs back, leniently.
//!
//! # Invariants
//! - Two logically equal values always encode to identical pairs; the
//!   mutation path relies on this for idempotence.
//! - Mapping keys are encoded in sorted order at every nesting level.
//! - The kind is stored explicitly. A text value starting with `[` or `{` is
//!   still text.
//! - Non-finite reals are stored as the text labels `NaN`, `inf` and `-inf`
//!   under the `real` tag; SQLite would turn a bound NaN into NULL.
//! - Decoding never fails; malformed composites fall back to their raw form.

use log::warn;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

/// Attribute set for one path, keyed by attribute name.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Value of one attribute.
///
/// Scalars map onto native SQLite storage classes; lists and mappings hold
/// arbitrary JSON and are persisted in canonical JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<JsonValue>),
    Map(JsonMap<String, JsonValue>),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the storage tag for this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Integer(_) => ValueKind::Integer,
            Self::Real(_) => ValueKind::Real,
            Self::Text(_) => ValueKind::Text,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

/// Booleans are stored the way SQLite stores them: as `0` / `1`.
impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<JsonValue> for AttrValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(flag) => Self::from(flag),
            JsonValue::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => number.as_f64().map_or(Self::Null, Self::Real),
            },
            JsonValue::String(text) => Self::Text(text),
            JsonValue::Array(items) => Self::List(items),
            JsonValue::Object(entries) => Self::Map(entries),
        }
    }
}

/// Storage tag persisted in `item.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Integer,
    Real,
    Text,
    List,
    Map,
}

impl ValueKind {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::List => "list",
            Self::Map => "map",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "null" => Some(Self::Null),
            "integer" => Some(Self::Integer),
            "real" => Some(Self::Real),
            "text" => Some(Self::Text),
            "list" => Some(Self::List),
            "map" => Some(Self::Map),
            _ => None,
        }
    }
}

/// Canonical persisted form of an [`AttrValue`].
///
/// Equality of two encodings is the store's definition of "unchanged".
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedValue {
    pub kind: ValueKind,
    pub value: Value,
}

/// Encodes a value into its canonical storage form.
pub fn encode(value: &AttrValue) -> EncodedValue {
    let stored = match value {
        AttrValue::Null => Value::Null,
        AttrValue::Integer(integer) => Value::Integer(*integer),
        AttrValue::Real(real) => match non_finite_label(*real) {
            Some(label) => Value::Text(label.to_string()),
            None => Value::Real(*real),
        },
        AttrValue::Text(text) => Value::Text(text.clone()),
        AttrValue::List(items) => Value::Text(canonical_json(&JsonValue::Array(
            items.iter().map(canonicalize).collect(),
        ))),
        AttrValue::Map(entries) => Value::Text(canonical_json(&canonicalize_map(entries))),
    };

    EncodedValue {
        kind: value.kind(),
        value: stored,
    }
}

/// Decodes a persisted `(kind, value)` pair.
///
/// Unknown tags, tag/storage-class mismatches and unparsable composites fall
/// back to the raw stored value and emit a `value_decode` warning.
pub fn decode(kind: &str, raw: Value) -> AttrValue {
    let Some(parsed_kind) = ValueKind::parse(kind) else {
        warn!("event=value_decode module=model status=fallback kind={kind} reason=unknown_kind");
        return from_native(raw);
    };

    match (parsed_kind, raw) {
        (ValueKind::Null, Value::Null) => AttrValue::Null,
        (ValueKind::Integer, Value::Integer(integer)) => AttrValue::Integer(integer),
        (ValueKind::Real, Value::Real(real)) => AttrValue::Real(real),
        (ValueKind::Real, Value::Text(text)) => match non_finite_from_label(&text) {
            Some(real) => AttrValue::Real(real),
            None => {
                warn!("event=value_decode module=model status=fallback kind=real reason=unknown_label");
                AttrValue::Text(text)
            }
        },
        (ValueKind::Text, Value::Text(text)) => AttrValue::Text(text),
        (ValueKind::List, Value::Text(text)) => match serde_json::from_str::<Vec<JsonValue>>(&text) {
            Ok(items) => AttrValue::List(items),
            Err(err) => {
                warn!(
                    "event=value_decode module=model status=fallback kind=list reason=malformed_json line={} column={}",
                    err.line(),
                    err.column()
                );
                AttrValue::Text(text)
            }
        },
        (ValueKind::Map, Value::Text(text)) => {
            match serde_json::from_str::<JsonMap<String, JsonValue>>(&text) {
                Ok(entries) => AttrValue::Map(entries),
                Err(err) => {
                    warn!(
                        "event=value_decode module=model status=fallback kind=map reason=malformed_json line={} column={}",
                        err.line(),
                        err.column()
                    );
                    AttrValue::Text(text)
                }
            }
        }
        (kind, raw) => {
            warn!(
                "event=value_decode module=model status=fallback kind={} reason=storage_class_mismatch",
                kind.as_db()
            );
            from_native(raw)
        }
    }
}

// Every NaN shares one label, so re-asserting any NaN is a no-op.
fn non_finite_label(real: f64) -> Option<&'static str> {
    if real.is_nan() {
        Some("NaN")
    } else if real == f64::INFINITY {
        Some("inf")
    } else if real == f64::NEG_INFINITY {
        Some("-inf")
    } else {
        None
    }
}

fn non_finite_from_label(label: &str) -> Option<f64> {
    match label {
        "NaN" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn from_native(raw: Value) -> AttrValue {
    match raw {
        Value::Null => AttrValue::Null,
        Value::Integer(integer) => AttrValue::Integer(integer),
        Value::Real(real) => AttrValue::Real(real),
        Value::Text(text) => AttrValue::Text(text),
        Value::Blob(bytes) => AttrValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn canonical_json(value: &JsonValue) -> String {
    // `Display` on `serde_json::Value` is the compact serializer.
    value.to_string()
}

fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        JsonValue::Object(entries) => canonicalize_map(entries),
        other => other.clone(),
    }
}

// Rebuilds in sorted key order even when `serde_json/preserve_order` is
// enabled somewhere in the dependency graph.
fn canonicalize_map(entries: &JsonMap<String, JsonValue>) -> JsonValue {
    let mut keys = entries.keys().collect::<Vec<_>>();
    keys.sort();
    let mut sorted = JsonMap::new();
    for key in keys {
        if let Some(value) = entries.get(key) {
            sorted.insert(key.clone(), canonicalize(value));
        }
    }
    JsonValue::Object(sorted)
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, AttrValue, ValueKind};
    use rusqlite::types::Value;
    use serde_json::json;

    #[test]
    fn logically_equal_maps_encode_identically() {
        let left = AttrValue::from(json!({"b": 1, "a": {"y": [1, 2], "x": null}}));
        let right = AttrValue::from(json!({"a": {"x": null, "y": [1, 2]}, "b": 1}));

        assert_eq!(encode(&left), encode(&right));
        assert_eq!(
            encode(&left).value,
            Value::Text(r#"{"a":{"x":null,"y":[1,2]},"b":1}"#.to_string())
        );
    }

    #[test]
    fn list_order_is_significant() {
        let forward = AttrValue::from(json!([1, 2]));
        let backward = AttrValue::from(json!([2, 1]));
        assert_ne!(encode(&forward), encode(&backward));
    }

    #[test]
    fn integer_and_real_are_distinct_encodings() {
        assert_ne!(encode(&AttrValue::Integer(1)), encode(&AttrValue::Real(1.0)));
    }

    #[test]
    fn bracket_leading_text_stays_text() {
        let value = AttrValue::from("[not a list");
        let encoded = encode(&value);
        assert_eq!(encoded.kind, ValueKind::Text);
        assert_eq!(decode(encoded.kind.as_db(), encoded.value), value);
    }

    #[test]
    fn composites_roundtrip_through_decode() {
        let value = AttrValue::from(json!({"files": ["a.mkv", "b.mkv"], "size": 3}));
        let encoded = encode(&value);
        assert_eq!(decode(encoded.kind.as_db(), encoded.value), value);
    }

    #[test]
    fn malformed_composite_falls_back_to_raw_text() {
        let decoded = decode("list", Value::Text("[1, 2".to_string()));
        assert_eq!(decoded, AttrValue::Text("[1, 2".to_string()));
    }

    #[test]
    fn unknown_kind_falls_back_to_native_value() {
        assert_eq!(decode("blob", Value::Integer(7)), AttrValue::Integer(7));
    }

    #[test]
    fn non_finite_reals_share_a_stable_encoding() {
        let nan = encode(&AttrValue::Real(f64::NAN));
        assert_eq!(nan, encode(&AttrValue::Real(-f64::NAN)));
        assert_eq!(nan.kind, ValueKind::Real);
        assert_eq!(nan.value, Value::Text("NaN".to_string()));

        let decoded = decode("real", nan.value);
        assert!(matches!(decoded, AttrValue::Real(real) if real.is_nan()));

        let infinity = encode(&AttrValue::Real(f64::NEG_INFINITY));
        assert_eq!(
            decode(infinity.kind.as_db(), infinity.value),
            AttrValue::Real(f64::NEG_INFINITY)
        );
        assert_eq!(
            decode("real", Value::Text("1.5".to_string())),
            AttrValue::Text("1.5".to_string())
        );
    }

    #[test]
    fn accessors_only_answer_for_their_own_variant() {
        assert!(AttrValue::Null.is_null());
        assert!(!AttrValue::Integer(0).is_null());
        assert_eq!(AttrValue::from("x").as_str(), Some("x"));
        assert_eq!(AttrValue::Integer(3).as_str(), None);
        assert_eq!(AttrValue::from(true).as_i64(), Some(1));
        assert_eq!(AttrValue::Real(3.0).as_i64(), None);
    }

    #[test]
    fn json_bool_becomes_integer() {
        assert_eq!(AttrValue::from(json!(true)), AttrValue::Integer(1));
        assert_eq!(AttrValue::from(None::<i64>), AttrValue::Null);
    }
}
