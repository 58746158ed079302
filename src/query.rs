//! QueryEngine: `get`/`put`/`delete`/`get_many`/`find`/`count`/
//! `for_each`/`find_and_delete`, the crate's public read/write surface.
//! Every operation normalizes its arguments, ensures the store is
//! initialized, resolves the collection via the registry, runs index
//! maintenance on mutations, and builds keys through `KeyCodec`.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::events::Event;
use crate::index_maintainer::update_indexes;
use crate::key::{ItemKey, Key, KeyCodec};
use crate::kv::{DeleteOptions, GetOptions, Kv, PutOptions, ScanOptions};
use crate::pace::{Pacer, RESPIRATION_RATE};
use crate::registry::{Collection, Index};
use crate::schema::SchemaManager;
use crate::txn::Context;
use crate::value::{Item, IndexScalar};

/// Tagged `properties` option: `All` fetches the full item, `None`
/// returns keys only, `Paths` an explicit ordered property-path
/// projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Properties {
    All,
    None,
    Paths(Vec<String>),
}

impl Default for Properties {
    fn default() -> Properties {
        Properties::None
    }
}

impl Properties {
    fn wants_values(&self) -> bool {
        !matches!(self, Properties::None)
    }

    /// Whether `paths` (an index's declared projection) covers this
    /// `properties` request, making the projection fast-path viable.
    fn satisfied_by_projection(&self, projection: Option<&[String]>) -> bool {
        match (self, projection) {
            (Properties::All, _) => false,
            (Properties::None, _) => true,
            (Properties::Paths(paths), Some(proj)) => paths.iter().all(|p| proj.contains(p)),
            (Properties::Paths(_), None) => false,
        }
    }
}

fn apply_properties(value: Option<Value>, properties: &Properties) -> Option<Value> {
    match (value, properties) {
        (None, _) => None,
        (Some(v), Properties::All) => Some(v),
        (Some(_), Properties::None) => None,
        (Some(Value::Object(map)), Properties::Paths(paths)) => {
            let mut out = Map::new();
            for path in paths {
                if let Some(v) = map.get(path) {
                    out.insert(path.clone(), v.clone());
                }
            }
            Some(Value::Object(out))
        },
        (Some(other), Properties::Paths(_)) => Some(other),
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetManyOptions {
    pub error_if_missing: bool,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub query: Vec<(String, Value)>,
    pub order: Vec<String>,
    pub start: Option<Key>,
    pub start_after: Option<Key>,
    pub end: Option<Key>,
    pub end_before: Option<Key>,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    pub query: Vec<(String, Value)>,
    pub order: Vec<String>,
    pub start: Option<Key>,
    pub start_after: Option<Key>,
    pub end: Option<Key>,
    pub end_before: Option<Key>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ForEachOptions {
    pub query: Vec<(String, Value)>,
    pub order: Vec<String>,
    pub start: Option<Key>,
    pub end: Option<Key>,
    pub end_before: Option<Key>,
    pub properties: Properties,
    pub batch_size: Option<usize>,
}

fn normalize_key(key: &ItemKey) -> Result<()> {
    if let ItemKey::Str(s) = key {
        if s.is_empty() {
            return Err(Error::configuration("item key must not be empty"));
        }
    }
    Ok(())
}

/// Picks the declared index for a query/order pair, or `None` when
/// `query`/`order` are both empty (plain collection scan).
fn resolve_index<'a>(
    collection: &'a Collection,
    query: &[(String, Value)],
    order: &[String],
) -> Result<Option<&'a Index>> {
    if query.is_empty() && order.is_empty() {
        return Ok(None);
    }
    let query_keys: Vec<String> = query.iter().map(|(k, _)| k.clone()).collect();
    Ok(Some(collection.find_index_for_query_and_order(&query_keys, order)?))
}

/// Builds the KV scan prefix for `query`/`order`, following the declared
/// index's key order rather than the caller's: query keys not given in
/// the index's declaration order are still sent in declaration order.
fn build_prefix(store_name: &str, collection_name: &str, query: &[(String, Value)], index: Option<&Index>) -> Key {
    match index {
        None => KeyCodec::collection_prefix(store_name, collection_name),
        Some(index) => {
            let mut query_values = Vec::with_capacity(query.len());
            for declared_key in &index.keys {
                if query_values.len() == query.len() {
                    break;
                }
                if let Some((_, v)) = query.iter().find(|(k, _)| k == declared_key) {
                    query_values.push(IndexScalar::from_value(v));
                }
            }
            KeyCodec::index_query_prefix(store_name, collection_name, &index.keys, &query_values)
        },
    }
}

async fn materialize_rows(
    rows: Vec<crate::kv::KvEntry>,
    properties: &Properties,
) -> Result<Vec<(ItemKey, Option<Value>)>> {
    let mut pacer = Pacer::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let elem = row.key.last().ok_or_else(|| Error::invariant("row key must have at least one element"))?;
        let item_key = ItemKey::from_elem(elem)?;
        out.push((item_key, apply_properties(row.value, properties)));
        pacer.tick().await;
    }
    Ok(out)
}

pub async fn get<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    key: &ItemKey,
    opts: &GetOptions,
) -> Result<Option<Value>> {
    schema.initialize(ctx, &ctx.registry).await?;
    normalize_key(key)?;
    ctx.registry.get_collection(collection_name, true)?;
    let kv_key = KeyCodec::item_key(store_name, collection_name, key);
    ctx.kv.get(&kv_key, opts).await
}

pub async fn put<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    key: ItemKey,
    item: Item,
    opts: &PutOptions,
) -> Result<()> {
    schema.initialize(ctx, &ctx.registry).await?;
    normalize_key(&key)?;
    ctx.registry.get_collection(collection_name, true)?;

    let store_name = store_name.to_string();
    let collection_name = collection_name.to_string();
    let opts = opts.clone();
    ctx.transaction(move |txn| async move {
        let collection = txn.registry.get_collection(&collection_name, true)?.expect("checked above");
        let kv_key = KeyCodec::item_key(&store_name, &collection_name, &key);
        let old_item = match txn.kv.get(&kv_key, &GetOptions::default()).await? {
            Some(Value::Object(m)) => Some(m),
            _ => None,
        };
        let new_value = Value::Object(item.clone());
        txn.kv.put(&kv_key, Some(new_value.clone()), &opts).await?;
        update_indexes(&txn.kv, &store_name, collection, &key, old_item.as_ref(), Some(&item)).await?;
        txn.events.emit(Event::DidPutItem {
            collection: collection_name.clone(),
            key: key.clone(),
            item: new_value,
            options: opts.clone(),
        });
        Ok(())
    })
    .await
}

/// Returns whether a delete occurred.
pub async fn delete<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    key: ItemKey,
    opts: &DeleteOptions,
) -> Result<bool> {
    schema.initialize(ctx, &ctx.registry).await?;
    normalize_key(&key)?;
    ctx.registry.get_collection(collection_name, true)?;

    let store_name = store_name.to_string();
    let collection_name = collection_name.to_string();
    let opts = opts.clone();
    ctx.transaction(move |txn| async move {
        let collection = txn.registry.get_collection(&collection_name, true)?.expect("checked above");
        let kv_key = KeyCodec::item_key(&store_name, &collection_name, &key);
        match txn.kv.get(&kv_key, &GetOptions::default()).await? {
            Some(Value::Object(old_item)) => {
                txn.kv.delete(&kv_key, &DeleteOptions::default()).await?;
                update_indexes(&txn.kv, &store_name, collection, &key, Some(&old_item), None).await?;
                txn.events.emit(Event::DidDeleteItem {
                    collection: collection_name.clone(),
                    key: key.clone(),
                    old_item: Value::Object(old_item),
                    options: opts.clone(),
                });
                Ok(true)
            },
            _ if opts.error_if_missing => Err(Error::invariant(format!("item not found: {key}"))),
            _ => Ok(false),
        }
    })
    .await
}

pub async fn get_many<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    keys: &[ItemKey],
    opts: &GetManyOptions,
) -> Result<Vec<(ItemKey, Option<Value>)>> {
    schema.initialize(ctx, &ctx.registry).await?;
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    ctx.registry.get_collection(collection_name, true)?;
    let return_values = opts.properties.wants_values();
    let kv_keys: Vec<Key> = keys.iter().map(|k| KeyCodec::item_key(store_name, collection_name, k)).collect();
    let rows = ctx
        .kv
        .get_many(&kv_keys, &crate::kv::GetManyOptions { error_if_missing: opts.error_if_missing, return_values })
        .await?;
    materialize_rows(rows, &opts.properties).await
}

pub async fn find<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    opts: &FindOptions,
) -> Result<Vec<(ItemKey, Option<Value>)>> {
    schema.initialize(ctx, &ctx.registry).await?;
    let collection = ctx.registry.get_collection(collection_name, true)?.expect("checked above");
    let index = resolve_index(collection, &opts.query, &opts.order)?;

    match index {
        None => {
            let scan = ScanOptions {
                prefix: build_prefix(store_name, collection_name, &opts.query, None),
                start: opts.start.clone(),
                start_after: opts.start_after.clone(),
                end: opts.end.clone(),
                end_before: opts.end_before.clone(),
                reverse: opts.reverse,
                limit: opts.limit,
                return_values: opts.properties.wants_values(),
            };
            let rows = ctx.kv.find(&scan).await?;
            materialize_rows(rows, &opts.properties).await
        },
        Some(index) => {
            let use_projection = opts.properties.satisfied_by_projection(index.projection.as_deref());
            if !use_projection {
                tracing::debug!(
                    collection = %collection_name,
                    "find index path falls back to a full item fetch"
                );
            }
            let scan = ScanOptions {
                prefix: build_prefix(store_name, collection_name, &opts.query, Some(index)),
                start: opts.start.clone(),
                start_after: opts.start_after.clone(),
                end: opts.end.clone(),
                end_before: opts.end_before.clone(),
                reverse: opts.reverse,
                limit: opts.limit,
                return_values: use_projection,
            };
            let rows = ctx.kv.find(&scan).await?;
            if use_projection {
                materialize_rows(rows, &opts.properties).await
            } else {
                let keys: Vec<ItemKey> = rows
                    .iter()
                    .map(|r| {
                        r.key.last().ok_or_else(|| Error::invariant("row key must have at least one element")).and_then(ItemKey::from_elem)
                    })
                    .collect::<Result<_>>()?;
                get_many(
                    ctx,
                    schema,
                    store_name,
                    collection_name,
                    &keys,
                    &GetManyOptions { error_if_missing: false, properties: opts.properties.clone() },
                )
                .await
            }
        },
    }
}

pub async fn count<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    opts: &CountOptions,
) -> Result<usize> {
    schema.initialize(ctx, &ctx.registry).await?;
    let collection = ctx.registry.get_collection(collection_name, true)?.expect("checked above");
    let index = resolve_index(collection, &opts.query, &opts.order)?;
    let scan = ScanOptions {
        prefix: build_prefix(store_name, collection_name, &opts.query, index),
        start: opts.start.clone(),
        start_after: opts.start_after.clone(),
        end: opts.end.clone(),
        end_before: opts.end_before.clone(),
        ..Default::default()
    };
    ctx.kv.count(&scan).await
}

/// Batched scan: `batch_size` (default `RESPIRATION_RATE`) becomes each
/// batch's `limit`. After each batch, resumption continues strictly after
/// the last scanned KV key -- the scanned key already *is*
/// `[orderValues..., itemKey]` when `order` is a suffix of the chosen
/// index's keys, and is the item key itself on a plain collection scan,
/// so resuming from it needs no separate order-key reconstruction.
/// `callback` returns whether to keep going; returning `Ok(false)` stops
/// early.
pub async fn for_each<K: Kv, F>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    opts: &ForEachOptions,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(&ItemKey, Option<&Value>) -> Result<bool>,
{
    schema.initialize(ctx, &ctx.registry).await?;
    let collection = ctx.registry.get_collection(collection_name, true)?.expect("checked above");
    let index = resolve_index(collection, &opts.query, &opts.order)?;
    let prefix = build_prefix(store_name, collection_name, &opts.query, index);
    let batch_size = opts.batch_size.unwrap_or(RESPIRATION_RATE);

    let mut start = opts.start.clone();
    let mut start_after: Option<Key> = None;
    loop {
        let scan = ScanOptions {
            prefix: prefix.clone(),
            start: start.take(),
            start_after: start_after.take(),
            end: opts.end.clone(),
            end_before: opts.end_before.clone(),
            reverse: false,
            limit: Some(batch_size),
            return_values: opts.properties.wants_values(),
        };
        let rows = ctx.kv.find(&scan).await?;
        if rows.is_empty() {
            return Ok(());
        }
        let last_key = rows.last().expect("checked non-empty").key.clone();
        for row in rows {
            let elem = row.key.last().ok_or_else(|| Error::invariant("row key must have at least one element"))?;
            let item_key = ItemKey::from_elem(elem)?;
            let value = apply_properties(row.value, &opts.properties);
            if !callback(&item_key, value.as_ref())? {
                return Ok(());
            }
        }
        start_after = Some(last_key);
    }
}

/// `forEach` with `properties=[]` (keys-only); deletes every visited item
/// and returns the total deleted.
pub async fn find_and_delete<K: Kv>(
    ctx: &Context<K>,
    schema: &SchemaManager,
    store_name: &str,
    collection_name: &str,
    opts: &ForEachOptions,
) -> Result<usize> {
    let mut keys_only = opts.clone();
    keys_only.properties = Properties::None;

    let mut keys = Vec::new();
    for_each(ctx, schema, store_name, collection_name, &keys_only, |key, _value| {
        keys.push(key.clone());
        Ok(true)
    })
    .await?;

    let mut deleted = 0usize;
    for key in keys {
        if delete(ctx, schema, store_name, collection_name, key, &DeleteOptions::default()).await? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
