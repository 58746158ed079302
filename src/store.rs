//! `DocumentStore`: the crate's public facade, wiring the KeyCodec,
//! CollectionRegistry, IndexMaintainer, SchemaManager, QueryEngine,
//! TxnContext, and EventBus collaborators together behind a single
//! handle.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::config::DocumentStoreOptions;
use crate::error::Result;
use crate::events::EventBus;
use crate::key::ItemKey;
use crate::kv::{DeleteOptions, GetOptions, Kv, PutOptions};
use crate::query::{self, CountOptions, FindOptions, ForEachOptions, GetManyOptions};
use crate::registry::CollectionRegistry;
use crate::schema::SchemaManager;
use crate::txn::Context;
use crate::value::Item;

/// A collection-oriented handle over an ordered KV backend `K`, with
/// secondary indexes, schema migration, and transactional semantics
/// inherited from `K`.
#[derive(Clone)]
pub struct DocumentStore<K: Kv> {
    store_name: String,
    schema: Arc<SchemaManager>,
    ctx: Context<K>,
}

impl<K: Kv> DocumentStore<K> {
    pub fn new(opts: DocumentStoreOptions, kv: K) -> Result<DocumentStore<K>> {
        opts.validate()?;
        let DocumentStoreOptions { name, collections, events, .. } = opts;

        let mut registry = CollectionRegistry::new();
        for collection in collections {
            registry.add_collection(collection)?;
        }
        let mut bus = EventBus::new();
        for listener in events {
            bus = bus.with_listener(listener);
        }

        let schema = Arc::new(SchemaManager::new(name.clone()));
        let ctx = Context::new(kv, Arc::new(bus), Arc::new(registry));
        Ok(DocumentStore { store_name: name, schema, ctx })
    }

    /// Ensures the store descriptor exists, is unlocked, and is
    /// reconciled against the declared collections/indexes. Every other
    /// method calls this first; idempotent.
    pub async fn initialize(&self) -> Result<()> {
        self.schema.initialize(&self.ctx, &self.ctx.registry).await
    }

    pub async fn get(&self, collection: &str, key: ItemKey, opts: &GetOptions) -> Result<Option<Value>> {
        query::get(&self.ctx, &self.schema, &self.store_name, collection, &key, opts).await
    }

    pub async fn put(&self, collection: &str, key: ItemKey, item: Item, opts: &PutOptions) -> Result<()> {
        query::put(&self.ctx, &self.schema, &self.store_name, collection, key, item, opts).await
    }

    /// Returns whether a delete occurred.
    pub async fn delete(&self, collection: &str, key: ItemKey, opts: &DeleteOptions) -> Result<bool> {
        query::delete(&self.ctx, &self.schema, &self.store_name, collection, key, opts).await
    }

    pub async fn get_many(
        &self,
        collection: &str,
        keys: &[ItemKey],
        opts: &GetManyOptions,
    ) -> Result<Vec<(ItemKey, Option<Value>)>> {
        query::get_many(&self.ctx, &self.schema, &self.store_name, collection, keys, opts).await
    }

    pub async fn find(&self, collection: &str, opts: &FindOptions) -> Result<Vec<(ItemKey, Option<Value>)>> {
        query::find(&self.ctx, &self.schema, &self.store_name, collection, opts).await
    }

    pub async fn count(&self, collection: &str, opts: &CountOptions) -> Result<usize> {
        query::count(&self.ctx, &self.schema, &self.store_name, collection, opts).await
    }

    pub async fn for_each<F>(&self, collection: &str, opts: &ForEachOptions, callback: F) -> Result<()>
    where
        F: FnMut(&ItemKey, Option<&Value>) -> Result<bool>,
    {
        query::for_each(&self.ctx, &self.schema, &self.store_name, collection, opts, callback).await
    }

    pub async fn find_and_delete(&self, collection: &str, opts: &ForEachOptions) -> Result<usize> {
        query::find_and_delete(&self.ctx, &self.schema, &self.store_name, collection, opts).await
    }

    /// Purges the data and descriptors of collections tombstoned by a
    /// prior migration.
    pub async fn remove_collections_marked_as_removed(&self) -> Result<()> {
        self.schema.remove_collections_marked_as_removed(&self.ctx).await
    }

    /// Privileged operator escape hatch for a stuck schema lock.
    pub async fn force_unlock(&self) -> Result<()> {
        self.schema.force_unlock(&self.ctx).await
    }

    /// Deletes the entire store (descriptor, items, indexes) and resets
    /// initialization state. Forbidden inside a transaction.
    pub async fn destroy_all(&self) -> Result<()> {
        self.schema.destroy_all(&self.ctx).await
    }

    /// If already inside a transaction, nesting is flattened: `body`
    /// runs against a clone of `self` sharing the same transaction
    /// handle. Otherwise a new KV transaction is opened and `body` runs
    /// against a child `DocumentStore` backed by it; the child's
    /// `schema` is the same instance, so its initialization state is
    /// shared with the root.
    pub async fn transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(DocumentStore<K>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let store_name = self.store_name.clone();
        let schema = self.schema.clone();
        self.ctx
            .transaction(move |txn_ctx| {
                let child = DocumentStore { store_name, schema, ctx: txn_ctx };
                body(child)
            })
            .await
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
