//! CollectionRegistry: the in-memory set of declared collections and
//! their index declarations, and index selection for a (query, order)
//! pair. Frozen after construction: building a `DocumentStore` with a
//! new declaration set requires a new registry.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::value::{get_path, Item};

/// One property a declared index is built from.
#[derive(Clone)]
pub enum Property {
    /// Read the flattened `item[key]`.
    Simple,
    /// Apply the function to the (unflattened) item. Not persisted --
    /// computed indexes are rebuilt from this in-memory declaration on
    /// every process start.
    Computed(Arc<dyn Fn(&Item) -> Option<Value> + Send + Sync>),
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Simple => write!(f, "Property::Simple"),
            Property::Computed(_) => write!(f, "Property::Computed(..)"),
        }
    }
}

/// A declared index.
#[derive(Debug, Clone)]
pub struct Index {
    pub keys: Vec<String>,
    pub properties: Vec<Property>,
    pub projection: Option<Vec<String>>,
}

impl Index {
    /// A simple index: every key is read directly off the flattened item.
    pub fn simple(keys: impl IntoIterator<Item = impl Into<String>>) -> Index {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let properties = keys.iter().map(|_| Property::Simple).collect();
        Index { keys, properties, projection: None }
    }

    pub fn with_projection(mut self, projection: impl IntoIterator<Item = impl Into<String>>) -> Index {
        self.projection = Some(projection.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve this index's `key` at position `i` against `item`: a
    /// simple lookup for `Property::Simple`, or the computed function for
    /// `Property::Computed`. `None` means "undefined".
    pub fn value_at(&self, i: usize, item: &Item) -> Option<Value> {
        match &self.properties[i] {
            Property::Simple => get_path(item, &self.keys[i]),
            Property::Computed(f) => f(item),
        }
    }
}

/// A declared collection.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub indexes: Vec<Index>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Collection {
        Collection { name: name.into(), indexes: Vec::new() }
    }

    pub fn with_index(mut self, index: Index) -> Collection {
        self.indexes.push(index);
        self
    }

    /// Picks the first declared index whose `keys` prefix equals
    /// `query_keys ++ order_keys` -- set-equal for the query portion,
    /// order-preserving for the order portion. Declaration order is the
    /// tie-break.
    pub fn find_index_for_query_and_order(
        &self,
        query_keys: &[String],
        order_keys: &[String],
    ) -> Result<&Index> {
        let total = query_keys.len() + order_keys.len();
        'candidates: for index in &self.indexes {
            if index.keys.len() < total {
                continue;
            }
            let (query_prefix, order_prefix) = index.keys[..total].split_at(query_keys.len());
            for qk in query_keys {
                if !query_prefix.contains(qk) {
                    continue 'candidates;
                }
            }
            if order_prefix != order_keys {
                continue 'candidates;
            }
            return Ok(index);
        }
        Err(Error::invariant(format!(
            "no index on collection '{}' matches query keys {query_keys:?} and order keys {order_keys:?}",
            self.name
        )))
    }
}

/// The in-memory set of declared collections.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: Vec<Collection>,
}

impl CollectionRegistry {
    pub fn new() -> CollectionRegistry {
        CollectionRegistry::default()
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// Rejects a duplicate `name`.
    pub fn add_collection(&mut self, def: Collection) -> Result<()> {
        if self.collections.iter().any(|c| c.name == def.name) {
            return Err(Error::configuration(format!(
                "duplicate collection name: '{}'",
                def.name
            )));
        }
        self.collections.push(def);
        Ok(())
    }

    /// Linear search. The error message names the collection that was
    /// actually requested.
    pub fn get_collection(&self, name: &str, error_if_missing: bool) -> Result<Option<&Collection>> {
        match self.collections.iter().find(|c| c.name == name) {
            Some(c) => Ok(Some(c)),
            None if error_if_missing => {
                Err(Error::invariant(format!("collection not found: '{name}'")))
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
