//! Item representation and property-path flattening.
//!
//! An `Item` is an arbitrary structured record. Index and projection value
//! extraction flattens an item's nested object paths with `.`-joined keys
//! (`{"a": {"b": 1}}` flattens to `"a.b" -> 1`). Arrays are not descended
//! into: an array value at a path is a leaf, since nested property paths
//! only ever traverse objects.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// An item is a structured JSON-like record; scalars and arrays at the top
/// level are rejected by the query engine before they ever reach this
/// module.
pub type Item = Map<String, Value>;

/// Flatten an item into dot-joined property paths. Used for both index
/// value extraction (simple properties) and projection extraction.
pub fn flatten(item: &Item) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(item, "", &mut out);
    out
}

fn flatten_into(obj: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, Value>) {
    for (k, v) in obj {
        let path = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            Value::Object(inner) => flatten_into(inner, &path, out),
            other => {
                out.insert(path, other.clone());
            },
        }
    }
}

/// Look up a single flattened property path on an item. Returns `None` if
/// the path does not resolve to a value. Absence and JSON `null` are
/// distinct: a present `null` is `Some(Value::Null)`.
pub fn get_path(item: &Item, path: &str) -> Option<Value> {
    let mut cursor: &Value = &Value::Object(item.clone());
    for segment in path.split('.') {
        match cursor {
            Value::Object(map) => cursor = map.get(segment)?,
            _ => return None,
        }
    }
    Some(cursor.clone())
}

/// Canonical ordering over index tuple elements. The KV engine's ordered
/// byte-tuple keyspace requires each index value to map onto one ordered
/// tuple element; `IndexScalar` is that typed element ordering for this
/// crate's in-process and `MemoryKv` use. Object/array values are accepted
/// as opaque equality keys, ordered by their serialized form, since index
/// values are not restricted to scalars, only required to be comparable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexScalar {
    Null,
    Bool(bool),
    /// Stored as a totally-ordered bit pattern so `IndexScalar` can derive
    /// `Ord`; see `from_value`/`to_value` for the conversion.
    Number(OrderedF64),
    Str(String),
    /// Arrays/objects used as opaque equality keys; ordered by their
    /// canonical JSON text.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedF64(pub f64);

impl Eq for OrderedF64 {}

impl PartialOrd for OrderedF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

impl IndexScalar {
    pub fn from_value(value: &Value) -> IndexScalar {
        match value {
            Value::Null => IndexScalar::Null,
            Value::Bool(b) => IndexScalar::Bool(*b),
            Value::Number(n) => IndexScalar::Number(OrderedF64(n.as_f64().unwrap_or(0.0))),
            Value::String(s) => IndexScalar::Str(s.clone()),
            other => IndexScalar::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
