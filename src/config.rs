//! Construction options for a `DocumentStore`.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::EventListener;
use crate::registry::Collection;

/// `{ name (required), url (required, KV backend locator), collections
/// (ordered declarations), log (optional listener) }`. The `url` is an
/// opaque locator parsed by the `Kv` implementation, not by this crate.
pub struct DocumentStoreOptions {
    pub name: String,
    pub url: String,
    pub collections: Vec<Collection>,
    pub events: Vec<Arc<dyn EventListener>>,
}

impl DocumentStoreOptions {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> DocumentStoreOptions {
        DocumentStoreOptions { name: name.into(), url: url.into(), collections: Vec::new(), events: Vec::new() }
    }

    pub fn with_collection(mut self, collection: Collection) -> DocumentStoreOptions {
        self.collections.push(collection);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> DocumentStoreOptions {
        self.events.push(listener);
        self
    }

    /// Catches everything `CollectionRegistry::add_collection` would
    /// otherwise only discover one collection at a time, plus the other
    /// construction-level checks (`name`/`url` required; duplicate
    /// collection names; empty index `keys`, which no declared index can
    /// ever satisfy a query against).
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration("store name must not be empty"));
        }
        if self.url.is_empty() {
            return Err(Error::configuration("store url must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            if !seen.insert(collection.name.clone()) {
                return Err(Error::configuration(format!("duplicate collection name: '{}'", collection.name)));
            }
            for index in &collection.indexes {
                if index.keys.is_empty() {
                    return Err(Error::configuration(format!(
                        "collection '{}' declares an index with no keys",
                        collection.name
                    )));
                }
            }
        }
        Ok(())
    }
}
