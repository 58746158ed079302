//! KeyCodec: builds structured keys for the metadata record, items, and
//! index entries, all sharing one ordered KV namespace.
//!
//! Keys are ordered byte-tuples. This crate represents a key as
//! `Key(Vec<KeyElem>)`; `KeyElem` derives `Ord` so that `Key`'s derived
//! tuple-of-elements ordering matches the KV engine's lexicographic,
//! typed-element ordering.

use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::value::IndexScalar;

/// One element of an ordered key tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyElem {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit-pattern ordering, see `value::OrderedF64`; kept as raw bits here
    /// so `KeyElem` can derive `Eq`/`Hash` as well as `Ord`.
    Float(u64),
    Str(String),
    /// Canonical JSON text for object/array index values used as opaque
    /// equality keys.
    Json(String),
}

impl KeyElem {
    pub fn str(s: impl Into<String>) -> KeyElem {
        KeyElem::Str(s.into())
    }

    pub fn int(n: i64) -> KeyElem {
        KeyElem::Int(n)
    }
}

impl From<&IndexScalar> for KeyElem {
    fn from(scalar: &IndexScalar) -> KeyElem {
        match scalar {
            IndexScalar::Null => KeyElem::Null,
            IndexScalar::Bool(b) => KeyElem::Bool(*b),
            IndexScalar::Number(f) => KeyElem::Float(f.0.to_bits()),
            IndexScalar::Str(s) => KeyElem::Str(s.clone()),
            IndexScalar::Other(s) => KeyElem::Json(s.clone()),
        }
    }
}

impl fmt::Display for KeyElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyElem::Null => write!(f, "null"),
            KeyElem::Bool(b) => write!(f, "{b}"),
            KeyElem::Int(n) => write!(f, "{n}"),
            KeyElem::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            KeyElem::Str(s) => write!(f, "{s}"),
            KeyElem::Json(s) => write!(f, "{s}"),
        }
    }
}

/// An ordered byte-tuple key as seen by the KV engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(pub Vec<KeyElem>);

impl Key {
    pub fn new(elems: Vec<KeyElem>) -> Key {
        Key(elems)
    }

    pub fn push(mut self, elem: KeyElem) -> Key {
        self.0.push(elem);
        self
    }

    pub fn extend(mut self, elems: impl IntoIterator<Item = KeyElem>) -> Key {
        self.0.extend(elems);
        self
    }

    /// `True` if `self` is a prefix of `other` (used to implement prefix
    /// scans over an in-memory ordered map backend).
    pub fn is_prefix_of(&self, other: &Key) -> bool {
        self.0.len() <= other.0.len() && self.0[..] == other.0[..self.0.len()]
    }

    pub fn last(&self) -> Option<&KeyElem> {
        self.0.last()
    }
}

/// An item key: a non-empty string or number. Normalized at the
/// QueryEngine boundary (`query::normalize_key`) before reaching KeyCodec.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKey {
    Str(String),
    Int(i64),
}

impl ItemKey {
    pub fn from_value(value: &Value) -> Result<ItemKey> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(ItemKey::Str(s.clone())),
            Value::String(_) => Err(Error::configuration("item key string must not be empty")),
            Value::Number(n) if n.is_i64() => Ok(ItemKey::Int(n.as_i64().unwrap())),
            Value::Number(n) if n.is_u64() => Ok(ItemKey::Int(n.as_u64().unwrap() as i64)),
            _ => Err(Error::configuration(
                "item key must be a non-empty string or a number",
            )),
        }
    }

    pub fn to_elem(&self) -> KeyElem {
        match self {
            ItemKey::Str(s) => KeyElem::Str(s.clone()),
            ItemKey::Int(n) => KeyElem::Int(*n),
        }
    }
}

impl ItemKey {
    /// Recovers an `ItemKey` from the trailing element of an item key or
    /// index entry key (used by schema rebuild and the query engine to
    /// turn a KV row back into `{key, value}`).
    pub fn from_elem(elem: &KeyElem) -> Result<ItemKey> {
        match elem {
            KeyElem::Str(s) => Ok(ItemKey::Str(s.clone())),
            KeyElem::Int(n) => Ok(ItemKey::Int(*n)),
            other => Err(Error::invariant(format!(
                "item key element must be a string or integer, found {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Str(s) => write!(f, "{s}"),
            ItemKey::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Join character for an index's declared property paths, and the
/// separator between a collection name and its index namespace. Both are
/// part of the persisted keyspace and must not change across versions
/// without a migration.
pub const INDEX_KEY_JOIN: &str = "+";
pub const COLLECTION_INDEX_SEP: &str = ":";

/// `indexName = join(index.keys, "+")`.
pub fn index_name(keys: &[String]) -> String {
    keys.join(INDEX_KEY_JOIN)
}

/// `collectionName + ":" + indexName`.
pub fn index_collection_name(collection_name: &str, index_keys: &[String]) -> String {
    format!(
        "{collection_name}{COLLECTION_INDEX_SEP}{}",
        index_name(index_keys)
    )
}

pub struct KeyCodec;

impl KeyCodec {
    /// `[ storeName ]`
    pub fn store_descriptor_key(store_name: &str) -> Key {
        Key::new(vec![KeyElem::str(store_name)])
    }

    /// `[ storeName, collectionName ]` -- prefix for a full collection scan.
    pub fn collection_prefix(store_name: &str, collection_name: &str) -> Key {
        Key::new(vec![KeyElem::str(store_name), KeyElem::str(collection_name)])
    }

    /// `[ storeName, collectionName, itemKey ]`
    pub fn item_key(store_name: &str, collection_name: &str, item_key: &ItemKey) -> Key {
        Self::collection_prefix(store_name, collection_name).push(item_key.to_elem())
    }

    /// `[ storeName, indexCollectionName ]` -- prefix for an index's whole
    /// namespace, used by `_removeIndex`'s range delete.
    pub fn index_namespace_prefix(
        store_name: &str,
        collection_name: &str,
        index_keys: &[String],
    ) -> Key {
        Key::new(vec![
            KeyElem::str(store_name),
            KeyElem::str(index_collection_name(collection_name, index_keys)),
        ])
    }

    /// `[ storeName, indexCollectionName, v1..vN, itemKey ]`
    pub fn index_entry_key(
        store_name: &str,
        collection_name: &str,
        index_keys: &[String],
        values: &[IndexScalar],
        item_key: &ItemKey,
    ) -> Key {
        Self::index_namespace_prefix(store_name, collection_name, index_keys)
            .extend(values.iter().map(KeyElem::from))
            .push(item_key.to_elem())
    }

    /// `[ storeName, indexCollectionName, q1..qK ]`, truncated to the
    /// number of query values provided, in the index's declaration order.
    pub fn index_query_prefix(
        store_name: &str,
        collection_name: &str,
        index_keys: &[String],
        query_values: &[IndexScalar],
    ) -> Key {
        Self::index_namespace_prefix(store_name, collection_name, index_keys)
            .extend(query_values.iter().map(KeyElem::from))
    }
}

#[cfg(test)]
#[path = "key_test.rs"]
mod key_test;
