//! Step parameter values.
//!
//! Parameters are an insertion-ordered map so that serialized workflows and
//! run records are byte-stable across round trips. Values are a small tagged
//! variant rather than raw JSON: step handlers get a typed surface and the
//! ordering survives serde.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    String(String),
    Map(Params),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Insertion-ordered parameter map.
///
/// Keys keep the order they were inserted in; duplicate inserts replace the
/// value in place without moving the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a value, replacing in place if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlay other's entries onto self (used for replay overrides).
    pub fn merge(&mut self, other: &Params) {
        for (k, v) in other.iter() {
            self.insert(k, v.clone());
        }
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = Params;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Params, A::Error> {
                let mut params = Params::new();
                while let Some((key, value)) = access.next_entry::<String, ParamValue>()? {
                    params.insert(key, value);
                }
                Ok(params)
            }
        }

        deserializer.deserialize_map(ParamsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_preserve_insertion_order() {
        let mut params = Params::new();
        params.insert("zebra", "z");
        params.insert("alpha", 1.0);
        params.insert("mid", true);

        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zebra", "alpha", "mid"]);
    }

    #[test]
    fn test_params_insert_replaces_in_place() {
        let mut params = Params::new();
        params.insert("a", "one");
        params.insert("b", "two");
        params.insert("a", "updated");

        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(params.get("a").and_then(|v| v.as_str()), Some("updated"));
    }

    #[test]
    fn test_params_serde_round_trip_keeps_order() {
        let mut params = Params::new();
        params.insert("url", "https://example.com");
        params.insert("limit", 25.0);
        params.insert("dry_run", false);

        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"url":"https://example.com","limit":25.0,"dry_run":false}"#);

        let back: Params = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_nested_map_values() {
        let mut inner = Params::new();
        inner.insert("channel", "#alerts");
        let mut params = Params::new();
        params.insert("slack", ParamValue::Map(inner));

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["slack"]["channel"], "#alerts");
    }

    #[test]
    fn test_merge_overlays_and_appends() {
        let mut base = Params::new();
        base.insert("a", 1.0);
        base.insert("b", 2.0);

        let mut overrides = Params::new();
        overrides.insert("b", 20.0);
        overrides.insert("c", 30.0);

        base.merge(&overrides);
        assert_eq!(base.get("a").and_then(|v| v.as_number()), Some(1.0));
        assert_eq!(base.get("b").and_then(|v| v.as_number()), Some(20.0));
        assert_eq!(base.get("c").and_then(|v| v.as_number()), Some(30.0));
        let keys: Vec<&str> = base.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
