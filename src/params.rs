//! Step parameter values and canonical encoding.
//!
//! Parameters are both functional inputs to a step's compute callable and
//! part of its cache key, so they need a closed set of value types and a
//! byte encoding that is stable across runs and platforms. [`Params`] keeps
//! keys in a `BTreeMap` so two semantically identical parameter sets always
//! encode — and therefore fingerprint — identically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single parameter value.
///
/// Floats are encoded by their exact IEEE-754 bit pattern (`f64::to_bits`);
/// two float params are fingerprint-equal iff they are bitwise equal. There
/// is no rounding or tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Append this value's canonical byte encoding to `buf`.
    ///
    /// Each variant is prefixed with a distinct tag byte so that, e.g.,
    /// `Int(1)` and `Bool(true)` can never collide.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            ParamValue::Bool(b) => {
                buf.push(b'b');
                buf.push(*b as u8);
            }
            ParamValue::Int(i) => {
                buf.push(b'i');
                buf.extend_from_slice(&i.to_le_bytes());
            }
            ParamValue::Float(f) => {
                buf.push(b'f');
                buf.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            ParamValue::Str(s) => {
                buf.push(b's');
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            ParamValue::List(items) => {
                buf.push(b'l');
                buf.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// An ordered parameter map for a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    /// Create an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, returning self for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a parameter in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a parameter by name.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Get a string parameter by name.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(ParamValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Get an integer parameter by name.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(ParamValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Get a float parameter by name.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(ParamValue::Float(f)) => Some(*f),
            Some(ParamValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get a boolean parameter by name.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(ParamValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Canonical byte encoding of the whole map, in key order.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.0.len() as u64).to_le_bytes());
        for (key, value) in &self.0 {
            buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
            buf.extend_from_slice(key.as_bytes());
            value.encode(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(params: &Params) -> Vec<u8> {
        let mut buf = Vec::new();
        params.encode(&mut buf);
        buf
    }

    #[test]
    fn insertion_order_does_not_affect_encoding() {
        let a = Params::new().with("alpha", 1i64).with("beta", 2i64);
        let b = Params::new().with("beta", 2i64).with("alpha", 1i64);
        assert_eq!(encoded(&a), encoded(&b));
    }

    #[test]
    fn different_values_encode_differently() {
        let a = Params::new().with("threshold", 0.5);
        let b = Params::new().with("threshold", 0.6);
        assert_ne!(encoded(&a), encoded(&b));
    }

    #[test]
    fn int_and_bool_do_not_collide() {
        let a = Params::new().with("flag", true);
        let b = Params::new().with("flag", 1i64);
        assert_ne!(encoded(&a), encoded(&b));
    }

    #[test]
    fn float_encoding_is_bit_exact() {
        let a = Params::new().with("x", 0.1 + 0.2);
        let b = Params::new().with("x", 0.3);
        // 0.1 + 0.2 != 0.3 in IEEE-754; encodings must differ
        assert_ne!(encoded(&a), encoded(&b));

        let c = Params::new().with("x", 0.3);
        assert_eq!(encoded(&b), encoded(&c));
    }

    #[test]
    fn nested_lists_encode() {
        let params = Params::new().with(
            "bands",
            ParamValue::List(vec![
                ParamValue::List(vec![ParamValue::Float(8.0), ParamValue::Float(12.0)]),
                ParamValue::List(vec![ParamValue::Float(12.0), ParamValue::Float(30.0)]),
            ]),
        );
        assert!(!encoded(&params).is_empty());
    }

    #[test]
    fn typed_accessors() {
        let params = Params::new()
            .with("name", "alpha")
            .with("count", 3i64)
            .with("rate", 0.25)
            .with("enabled", true);

        assert_eq!(params.get_str("name"), Some("alpha"));
        assert_eq!(params.get_int("count"), Some(3));
        assert_eq!(params.get_float("rate"), Some(0.25));
        assert_eq!(params.get_bool("enabled"), Some(true));
        assert_eq!(params.get_str("count"), None);
        assert!(params.get("missing").is_none());
    }

    #[test]
    fn serializes_as_plain_map() {
        let params = Params::new().with("n", 5i64).with("label", "x");
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"label":"x","n":5}"#);
    }

    #[test]
    fn display_formats_values() {
        assert_eq!(ParamValue::Int(3).to_string(), "3");
        assert_eq!(
            ParamValue::List(vec![ParamValue::Int(1), ParamValue::Int(2)]).to_string(),
            "[1, 2]"
        );
    }
}
