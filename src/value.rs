//! Tagged datapoint value model and structural content hashing.
//!
//! Device datapoints arrive as anything the firmware felt like sending:
//! booleans, integers, strings, base64 blobs, raw bytes or whole JSON
//! objects. [`DeviceValue`] makes that explicit so the decoder and the hub
//! can match on shape instead of probing types at runtime.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// A single datapoint value as delivered by the protocol layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Binary payloads (only produced by the protocol layer, never JSON).
    Bytes(Vec<u8>),
    Map(serde_json::Map<String, Value>),
    List(Vec<Value>),
    Null,
}

impl DeviceValue {
    /// Best-effort JSON view. Bytes are rendered as a hex string since JSON
    /// has no binary type.
    pub fn to_json(&self) -> Value {
        match self {
            DeviceValue::Bool(b) => Value::Bool(*b),
            DeviceValue::Int(i) => Value::from(*i),
            DeviceValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DeviceValue::Str(s) => Value::String(s.clone()),
            DeviceValue::Bytes(b) => Value::String(hex::encode(b)),
            DeviceValue::Map(m) => Value::Object(m.clone()),
            DeviceValue::List(l) => Value::Array(l.clone()),
            DeviceValue::Null => Value::Null,
        }
    }

    /// True if the value is boolean-ish truthy, mirroring how the device
    /// reports switch state (`true`, `1`, `"true"`, `"on"`, ...).
    pub fn is_truthy(&self) -> bool {
        match self {
            DeviceValue::Bool(b) => *b,
            DeviceValue::Int(i) => *i != 0,
            DeviceValue::Float(f) => *f != 0.0,
            DeviceValue::Str(s) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "on" | "yes" | "1")
            }
            DeviceValue::Bytes(b) => !b.is_empty(),
            DeviceValue::Map(m) => !m.is_empty(),
            DeviceValue::List(l) => !l.is_empty(),
            DeviceValue::Null => false,
        }
    }

    /// Loose equivalence used when verifying a command echo: `true` matches
    /// `1`, `"5"` matches `5`, and so on.
    pub fn loosely_eq(&self, other: &DeviceValue) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (DeviceValue::Bool(b), DeviceValue::Int(i))
            | (DeviceValue::Int(i), DeviceValue::Bool(b)) => *i == i64::from(*b),
            (DeviceValue::Int(i), DeviceValue::Float(f))
            | (DeviceValue::Float(f), DeviceValue::Int(i)) => (*i as f64) == *f,
            (DeviceValue::Str(s), v) | (v, DeviceValue::Str(s)) => match v {
                DeviceValue::Bool(b) => s.parse::<bool>().map(|p| p == *b).unwrap_or(false),
                DeviceValue::Int(i) => s.parse::<i64>().map(|p| p == *i).unwrap_or(false),
                DeviceValue::Float(f) => s.parse::<f64>().map(|p| p == *f).unwrap_or(false),
                _ => false,
            },
            _ => false,
        }
    }

    /// Stable SHA-256 content hash of the value, used for duplicate
    /// suppression. Maps and lists are canonicalized (recursively sorted
    /// object keys) before hashing so key insertion order never matters.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            DeviceValue::Bytes(b) => {
                hasher.update(b"bytes:");
                hasher.update(b);
            }
            DeviceValue::Map(_) | DeviceValue::List(_) => {
                hasher.update(b"json:");
                hasher.update(canonical_json(&self.to_json()));
            }
            DeviceValue::Null => hasher.update(b"null"),
            other => {
                hasher.update(b"scalar:");
                hasher.update(other.to_string().as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for DeviceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceValue::Bool(b) => write!(f, "{}", b),
            DeviceValue::Int(i) => write!(f, "{}", i),
            DeviceValue::Float(v) => write!(f, "{}", v),
            DeviceValue::Str(s) => write!(f, "{}", s),
            DeviceValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            DeviceValue::Map(m) => write!(f, "{}", Value::Object(m.clone())),
            DeviceValue::List(l) => write!(f, "{}", Value::Array(l.clone())),
            DeviceValue::Null => write!(f, "null"),
        }
    }
}

impl From<Value> for DeviceValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DeviceValue::Null,
            Value::Bool(b) => DeviceValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DeviceValue::Int(i)
                } else {
                    DeviceValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => DeviceValue::Str(s),
            Value::Array(l) => DeviceValue::List(l),
            Value::Object(m) => DeviceValue::Map(m),
        }
    }
}

impl From<bool> for DeviceValue {
    fn from(b: bool) -> Self {
        DeviceValue::Bool(b)
    }
}

impl From<i64> for DeviceValue {
    fn from(i: i64) -> Self {
        DeviceValue::Int(i)
    }
}

impl From<&str> for DeviceValue {
    fn from(s: &str) -> Self {
        DeviceValue::Str(s.to_string())
    }
}

/// Serialize a JSON value with recursively sorted object keys so that
/// structurally identical maps hash identically.
fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(
                    serde_json::to_string(key).unwrap_or_default().as_bytes(),
                );
                out.push(b':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
        Value::Array(list) => {
            out.push(b'[');
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        other => {
            out.extend_from_slice(serde_json::to_string(other).unwrap_or_default().as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_under_key_reordering() {
        let a = DeviceValue::from(json!({"bucket": "x", "files": [["/p", "1"]], "v": 1}));
        let b = DeviceValue::from(json!({"v": 1, "files": [["/p", "1"]], "bucket": "x"}));
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_distinguishes_values() {
        assert_ne!(
            DeviceValue::Bool(true).content_hash(),
            DeviceValue::Bool(false).content_hash()
        );
        assert_ne!(
            DeviceValue::Int(1).content_hash(),
            DeviceValue::Int(2).content_hash()
        );
        assert_ne!(
            DeviceValue::from(json!({"a": 1})).content_hash(),
            DeviceValue::from(json!({"a": 2})).content_hash()
        );
        assert_ne!(
            DeviceValue::from(json!([1, 2])).content_hash(),
            DeviceValue::from(json!([2, 1])).content_hash()
        );
    }

    #[test]
    fn bytes_hash_differs_from_equivalent_string() {
        let s = DeviceValue::Str("abc".into());
        let b = DeviceValue::Bytes(b"abc".to_vec());
        assert_ne!(s.content_hash(), b.content_hash());
    }

    #[test]
    fn loose_equivalence_for_verification() {
        assert!(DeviceValue::Bool(true).loosely_eq(&DeviceValue::Int(1)));
        assert!(DeviceValue::Bool(false).loosely_eq(&DeviceValue::Int(0)));
        assert!(DeviceValue::Int(5).loosely_eq(&DeviceValue::Str("5".into())));
        assert!(DeviceValue::Str("true".into()).loosely_eq(&DeviceValue::Bool(true)));
        assert!(!DeviceValue::Bool(true).loosely_eq(&DeviceValue::Int(2)));
        assert!(!DeviceValue::Int(2).loosely_eq(&DeviceValue::Bool(true)));
        assert!(!DeviceValue::Bool(false).loosely_eq(&DeviceValue::Int(2)));
        assert!(!DeviceValue::Int(5).loosely_eq(&DeviceValue::Int(6)));
    }

    #[test]
    fn truthiness_follows_device_conventions() {
        assert!(DeviceValue::Str("ON".into()).is_truthy());
        assert!(DeviceValue::Str("1".into()).is_truthy());
        assert!(!DeviceValue::Str("off".into()).is_truthy());
        assert!(DeviceValue::Int(2).is_truthy());
        assert!(!DeviceValue::Null.is_truthy());
    }

    #[test]
    fn json_round_trip_preserves_shape() {
        let v = DeviceValue::from(json!({"a": [1, "x", true]}));
        assert!(matches!(v, DeviceValue::Map(_)));
        assert_eq!(v.to_json(), json!({"a": [1, "x", true]}));
    }
}
