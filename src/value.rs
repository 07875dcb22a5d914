//! The evaluated-value model shared by every component in the pipeline.
//!
//! Mirrors HCL2's runtime value space: null, bool, number (split into int and
//! float so round-tripping through JSON/YAML doesn't silently coerce one into
//! the other), string, ordered list, and an order-preserving string-keyed map.

use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn map_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn empty_map() -> Value {
        Value::Map(Vec::new())
    }

    /// Whether this value carries an unresolved-marker substring anywhere
    /// within it (see SPEC_FULL §3 and §7). Used by the evaluator's
    /// multi-pass resolution loop to decide whether to revert and retry.
    pub fn is_unresolved(&self) -> bool {
        match self {
            Value::String(s) => is_unresolved_str(s),
            Value::Map(m) => m.iter().any(|(_, v)| v.is_unresolved()),
            Value::List(l) => l.iter().any(|v| v.is_unresolved()),
            _ => false,
        }
    }

    /// Build a `Value` tree from a `serde_json::Value`, as returned by the
    /// external HCL bridge.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }

    /// Convert to a `serde_json::Value`, used by the output formatter (JSON
    /// and, via re-serialization, YAML).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }
}

/// Is `s` itself an unresolved-marker sentinel ("<...>") or does it still
/// contain a raw `${...}` interpolation that never got substituted?
pub fn is_unresolved_str(s: &str) -> bool {
    (s.starts_with('<') && s.ends_with('>')) || s.contains("${")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(fl) => write!(f, "{fl}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

// Untagged serialization: a Value::Map serializes as a plain object, a
// Value::List as a plain array, etc. — not as a `{"Map": [...]}` wrapper.
// This is what lets the same type drive both serde_json and serde_yaml
// output without an intermediate conversion.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(fl) => serializer.serialize_f64(*fl),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for item in l {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_detection() {
        assert!(is_unresolved_str("<templatefile(...)>"));
        assert!(is_unresolved_str("prefix-${local.x}"));
        assert!(!is_unresolved_str("plain string"));
    }

    #[test]
    fn nested_unresolved_propagates() {
        let v = Value::Map(vec![(
            "a".to_string(),
            Value::List(vec![Value::String("<x>".to_string())]),
        )]);
        assert!(v.is_unresolved());
    }

    #[test]
    fn json_roundtrip_preserves_int_vs_float() {
        let v = Value::Int(8080);
        assert_eq!(v.to_json(), serde_json::json!(8080));
        let v = Value::Float(1.5);
        assert_eq!(v.to_json(), serde_json::json!(1.5));
    }

    #[test]
    fn serialize_map_is_untagged() {
        let v = Value::Map(vec![("k".to_string(), Value::String("v".to_string()))]);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"k": "v"}));
    }
}
