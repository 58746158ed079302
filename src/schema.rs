//! SchemaManager: the persisted store descriptor and its lifecycle --
//! creation, cross-process locking, version upgrade, and idempotent
//! migration against the declared `CollectionRegistry`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::Event;
use crate::key::{ItemKey, KeyCodec};
use crate::kv::{GetOptions, Kv, PutOptions, ScanOptions};
use crate::pace::Pacer;
use crate::registry::{Collection, CollectionRegistry, Index};
use crate::txn::Context;

/// Current descriptor schema version.
pub const VERSION: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub projection: Option<Vec<String>>,
}

impl IndexDescriptor {
    fn from_declared(index: &Index) -> IndexDescriptor {
        IndexDescriptor { keys: index.keys.clone(), projection: index.projection.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    #[serde(default)]
    pub has_been_removed: bool,
    pub indexes: Vec<IndexDescriptor>,
}

impl CollectionDescriptor {
    fn from_declared(collection: &Collection) -> CollectionDescriptor {
        CollectionDescriptor {
            name: collection.name.clone(),
            has_been_removed: false,
            indexes: collection.indexes.iter().map(IndexDescriptor::from_declared).collect(),
        }
    }
}

/// The persisted store descriptor, serialized as a single opaque value at
/// the store descriptor key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDescriptor {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub is_locked: bool,
    pub collections: Vec<CollectionDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Per-process initialization state machine and descriptor lifecycle
/// driver.
pub struct SchemaManager {
    store_name: String,
    state: Mutex<InitState>,
}

impl SchemaManager {
    pub fn new(store_name: impl Into<String>) -> SchemaManager {
        SchemaManager { store_name: store_name.into(), state: Mutex::new(InitState::Uninitialized) }
    }

    pub async fn is_initialized(&self) -> bool {
        *self.state.lock().await == InitState::Initialized
    }

    /// Resets to `Uninitialized`; used by `destroy_all`.
    async fn reset(&self) {
        *self.state.lock().await = InitState::Uninitialized;
    }

    /// Drives the store descriptor from "absent" or "stale version" to
    /// "present, unlocked, at `VERSION`, reconciled against `registry`".
    /// Re-entrant: a second call after success is a no-op that performs
    /// zero KV writes. Re-entry while another call on this process is
    /// mid-flight is also a no-op, a fast in-process re-entry guard.
    pub async fn initialize<K: Kv>(&self, ctx: &Context<K>, registry: &CollectionRegistry) -> Result<()> {
        if ctx.inside_transaction() {
            return Err(Error::transaction_misuse("initialize() called from inside a transaction"));
        }
        {
            let mut state = self.state.lock().await;
            match *state {
                InitState::Initialized | InitState::Initializing => return Ok(()),
                InitState::Uninitialized => *state = InitState::Initializing,
            }
        }

        let created = self.create_if_missing(ctx, registry).await?;
        if !created {
            self.acquire_lock(ctx).await?;
            let body: Result<()> = async {
                self.upgrade(ctx).await?;
                self.verify(ctx).await?;
                self.migrate(ctx, registry).await?;
                Ok(())
            }
            .await;
            let unlocked = self.unlock(ctx).await;
            body?;
            unlocked?;
        }

        *self.state.lock().await = InitState::Initialized;
        ctx.events.emit(Event::DidInitialize);
        Ok(())
    }

    async fn read_descriptor<K: Kv>(&self, ctx: &Context<K>) -> Result<Option<StoreDescriptor>> {
        let key = KeyCodec::store_descriptor_key(&self.store_name);
        match ctx.kv.get(&key, &GetOptions::default()).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::invariant(format!("corrupt store descriptor for '{}': {e}", self.store_name))),
        }
    }

    async fn read_descriptor_required<K: Kv>(&self, ctx: &Context<K>) -> Result<StoreDescriptor> {
        self.read_descriptor(ctx)
            .await?
            .ok_or_else(|| Error::invariant(format!("store descriptor missing for '{}'", self.store_name)))
    }

    async fn write_descriptor<K: Kv>(&self, ctx: &Context<K>, descriptor: &StoreDescriptor) -> Result<()> {
        let key = KeyCodec::store_descriptor_key(&self.store_name);
        let value = serde_json::to_value(descriptor)
            .map_err(|e| Error::invariant(format!("cannot serialize store descriptor: {e}")))?;
        ctx.kv.put(&key, Some(value), &PutOptions { create_if_missing: true, error_if_exists: false }).await
    }

    async fn create_if_missing<K: Kv>(&self, ctx: &Context<K>, registry: &CollectionRegistry) -> Result<bool> {
        ctx.transaction(|txn| async move {
            if self.read_descriptor(&txn).await?.is_some() {
                return Ok(false);
            }
            let descriptor = StoreDescriptor {
                name: self.store_name.clone(),
                version: VERSION,
                is_locked: false,
                collections: registry.collections().iter().map(CollectionDescriptor::from_declared).collect(),
            };
            self.write_descriptor(&txn, &descriptor).await?;
            txn.events.emit(Event::DidCreate);
            Ok(true)
        })
        .await
    }

    /// Lock loop: no timeout, no deadlock detection -- purely advisory
    /// between cooperating initializers.
    async fn acquire_lock<K: Kv>(&self, ctx: &Context<K>) -> Result<()> {
        loop {
            let acquired = ctx
                .transaction(|txn| async move {
                    let mut descriptor = self.read_descriptor_required(&txn).await?;
                    if descriptor.is_locked {
                        return Ok(false);
                    }
                    descriptor.is_locked = true;
                    self.write_descriptor(&txn, &descriptor).await?;
                    Ok(true)
                })
                .await?;
            if acquired {
                return Ok(());
            }
            tracing::warn!(store = %self.store_name, "schema lock held by another initializer, retrying in 5s");
            tokio::time::sleep(Duration::from_millis(5000)).await;
        }
    }

    /// Clears the lock regardless of how the caller got here: the scoped
    /// unlock in `initialize` runs on every exit path.
    async fn unlock<K: Kv>(&self, ctx: &Context<K>) -> Result<()> {
        let mut descriptor = self.read_descriptor_required(ctx).await?;
        descriptor.is_locked = false;
        self.write_descriptor(ctx, &descriptor).await
    }

    /// Privileged unlock for an operator to clear a stuck lock.
    pub async fn force_unlock<K: Kv>(&self, ctx: &Context<K>) -> Result<()> {
        self.unlock(ctx).await
    }

    async fn upgrade<K: Kv>(&self, ctx: &Context<K>) -> Result<()> {
        let mut descriptor = self.read_descriptor_required(ctx).await?;
        if descriptor.version > VERSION {
            return Err(Error::invariant(format!(
                "store '{}' descriptor version {} is newer than supported version {VERSION}",
                self.store_name, descriptor.version
            )));
        }
        if descriptor.version == VERSION {
            return Ok(());
        }
        ctx.events.emit(Event::UpgradeDidStart);
        if descriptor.version < 2 {
            // Legacy-rename fixup: descriptors found in the wild at
            // version 1 stored collections under a `tables` field with
            // each collection's indexes as a bare list of index names,
            // and carried a `lastMigrationNumber` field this crate never
            // persists. Since this crate's `StoreDescriptor` never wrote
            // that shape, there is nothing left to rewrite in-process;
            // the only observable effect of this step is the version
            // bump to 2 before the (fatal) 2->3 check below runs.
            descriptor.version = 2;
        }
        if descriptor.version < VERSION {
            self.write_descriptor(ctx, &descriptor).await?;
            ctx.events.emit(Event::UpgradeDidStop);
            return Err(Error::unsupported_migration(format!(
                "automatic upgrade from version {} to {VERSION} is not supported",
                descriptor.version
            )));
        }
        self.write_descriptor(ctx, &descriptor).await?;
        ctx.events.emit(Event::UpgradeDidStop);
        Ok(())
    }

    /// Reserved hook; an explicit no-op for now.
    async fn verify<K: Kv>(&self, _ctx: &Context<K>) -> Result<()> {
        Ok(())
    }

    async fn migrate<K: Kv>(&self, ctx: &Context<K>, registry: &CollectionRegistry) -> Result<()> {
        let mut started = false;
        let result = self.migrate_inner(ctx, registry, &mut started).await;
        if started {
            ctx.events.emit(Event::MigrationDidStop);
        }
        result
    }

    async fn migrate_inner<K: Kv>(
        &self,
        ctx: &Context<K>,
        registry: &CollectionRegistry,
        started: &mut bool,
    ) -> Result<()> {
        for declared in registry.collections() {
            let descriptor = self.read_descriptor_required(ctx).await?;
            match descriptor.collections.iter().position(|c| c.name == declared.name) {
                None => {
                    self.emit_start_once(ctx, started);
                    let mut descriptor = descriptor;
                    descriptor.collections.push(CollectionDescriptor::from_declared(declared));
                    self.write_descriptor(ctx, &descriptor).await?;
                },
                Some(pos) => {
                    if descriptor.collections[pos].has_been_removed {
                        return Err(Error::unsupported_migration(format!(
                            "collection '{}' was previously removed; re-adding it is not supported",
                            declared.name
                        )));
                    }
                    self.reconcile_indexes(ctx, declared, started).await?;
                },
            }
        }

        let descriptor = self.read_descriptor_required(ctx).await?;
        let to_tombstone: Vec<String> = descriptor
            .collections
            .iter()
            .filter(|c| !c.has_been_removed && !registry.collections().iter().any(|d| d.name == c.name))
            .map(|c| c.name.clone())
            .collect();
        for name in to_tombstone {
            self.emit_start_once(ctx, started);
            let mut descriptor = self.read_descriptor_required(ctx).await?;
            let pos = descriptor.collections.iter().position(|c| c.name == name).unwrap();
            let keys: Vec<Vec<String>> = descriptor.collections[pos].indexes.iter().map(|i| i.keys.clone()).collect();
            for index_keys in keys {
                self.remove_index(ctx, &name, &index_keys).await?;
            }
            descriptor.collections[pos].indexes.clear();
            descriptor.collections[pos].has_been_removed = true;
            self.write_descriptor(ctx, &descriptor).await?;
        }
        Ok(())
    }

    fn emit_start_once<K: Kv>(&self, ctx: &Context<K>, started: &mut bool) {
        if !*started {
            ctx.events.emit(Event::MigrationDidStart);
            *started = true;
        }
    }

    async fn reconcile_indexes<K: Kv>(
        &self,
        ctx: &Context<K>,
        declared: &Collection,
        started: &mut bool,
    ) -> Result<()> {
        let descriptor = self.read_descriptor_required(ctx).await?;
        let pos = descriptor.collections.iter().position(|c| c.name == declared.name).unwrap();

        let to_add: Vec<&Index> = declared
            .indexes
            .iter()
            .filter(|idx| !descriptor.collections[pos].indexes.iter().any(|p| p.keys == idx.keys))
            .collect();
        for index in to_add {
            self.emit_start_once(ctx, started);
            self.add_index(ctx, &declared.name, index).await?;
            let mut descriptor = self.read_descriptor_required(ctx).await?;
            let pos = descriptor.collections.iter().position(|c| c.name == declared.name).unwrap();
            descriptor.collections[pos].indexes.push(IndexDescriptor::from_declared(index));
            self.write_descriptor(ctx, &descriptor).await?;
        }

        let descriptor = self.read_descriptor_required(ctx).await?;
        let pos = descriptor.collections.iter().position(|c| c.name == declared.name).unwrap();
        let to_remove: Vec<Vec<String>> = descriptor.collections[pos]
            .indexes
            .iter()
            .filter(|persisted| !declared.indexes.iter().any(|d| d.keys == persisted.keys))
            .map(|persisted| persisted.keys.clone())
            .collect();
        for index_keys in to_remove {
            self.emit_start_once(ctx, started);
            self.remove_index(ctx, &declared.name, &index_keys).await?;
            let mut descriptor = self.read_descriptor_required(ctx).await?;
            let pos = descriptor.collections.iter().position(|c| c.name == declared.name).unwrap();
            descriptor.collections[pos].indexes.retain(|p| p.keys != index_keys);
            self.write_descriptor(ctx, &descriptor).await?;
        }
        Ok(())
    }

    /// Sequential scan of the collection, invoking `update_index` with no
    /// old item for every item, cooperatively yielding every 250 items.
    async fn add_index<K: Kv>(&self, ctx: &Context<K>, collection_name: &str, index: &Index) -> Result<()> {
        let prefix = KeyCodec::collection_prefix(&self.store_name, collection_name);
        let rows = ctx.kv.find(&ScanOptions { prefix, return_values: true, ..Default::default() }).await?;
        let mut pacer = Pacer::new();
        for row in rows {
            let item_key = ItemKey::from_elem(row.key.last().ok_or_else(|| {
                Error::invariant("item key must have at least one element")
            })?)?;
            if let Some(Value::Object(item)) = row.value {
                crate::index_maintainer::update_index(
                    &ctx.kv,
                    &self.store_name,
                    collection_name,
                    &item_key,
                    None,
                    Some(&item),
                    index,
                )
                .await?;
            }
            pacer.tick().await;
        }
        Ok(())
    }

    /// KV range delete at `[storeName, collectionName:indexName]`.
    async fn remove_index<K: Kv>(&self, ctx: &Context<K>, collection_name: &str, keys: &[String]) -> Result<()> {
        let prefix = KeyCodec::index_namespace_prefix(&self.store_name, collection_name, keys);
        ctx.kv.find_and_delete(&ScanOptions { prefix, ..Default::default() }).await?;
        Ok(())
    }

    /// Purges tombstoned collections' data and drops their descriptors.
    pub async fn remove_collections_marked_as_removed<K: Kv>(&self, ctx: &Context<K>) -> Result<()> {
        let mut descriptor = self.read_descriptor_required(ctx).await?;
        let removed_names: Vec<String> =
            descriptor.collections.iter().filter(|c| c.has_been_removed).map(|c| c.name.clone()).collect();
        for name in &removed_names {
            let prefix = KeyCodec::collection_prefix(&self.store_name, name);
            ctx.kv.find_and_delete(&ScanOptions { prefix, ..Default::default() }).await?;
        }
        descriptor.collections.retain(|c| !c.has_been_removed);
        self.write_descriptor(ctx, &descriptor).await
    }

    /// Deletes everything under `[storeName]` and resets initialization
    /// state. Forbidden inside a transaction.
    pub async fn destroy_all<K: Kv>(&self, ctx: &Context<K>) -> Result<()> {
        if ctx.inside_transaction() {
            return Err(Error::transaction_misuse("destroy_all() called from inside a transaction"));
        }
        let prefix = crate::key::Key::new(vec![crate::key::KeyElem::str(self.store_name.as_str())]);
        ctx.kv.find_and_delete(&ScanOptions { prefix, ..Default::default() }).await?;
        self.reset().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod schema_test;
