//! Differential index maintenance on every item write/delete. Computes
//! old/new index tuples for an item transition and applies the KV writes
//! needed to keep index entries consistent with the item.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::key::{ItemKey, KeyCodec};
use crate::kv::{DeleteOptions, Kv, PutOptions};
use crate::registry::{Collection, Index};
use crate::value::{flatten, IndexScalar, Item};

/// Per-property values for an index, extracted from an (optional) item.
/// `None` at a position means "undefined"; an absent item (e.g. no old
/// item on a pure insert) yields all-`None`.
fn values_for(item: Option<&Item>, index: &Index) -> Vec<Option<Value>> {
    (0..index.keys.len())
        .map(|i| item.and_then(|it| index.value_at(i, it)))
        .collect()
}

/// `oldProjection`/`newProjection`: only computed when `index.projection`
/// is set; absent (not an empty object) if no path produces a value.
fn projection_for(item: Option<&Item>, index: &Index) -> Option<Value> {
    let paths = index.projection.as_ref()?;
    let item = item?;
    let flat = flatten(item);
    let mut map = Map::new();
    for path in paths {
        if let Some(v) = flat.get(path) {
            map.insert(path.clone(), v.clone());
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn all_defined(values: &[Option<Value>]) -> bool {
    values.iter().all(Option::is_some)
}

fn to_scalars(values: &[Option<Value>]) -> Vec<IndexScalar> {
    values.iter().map(|v| IndexScalar::from_value(v.as_ref().expect("all_defined checked"))).collect()
}

/// Applies the differential index update for one declared index, given an
/// item transition `old_item -> new_item` (either side may be absent: a
/// pure insert has no old item, a delete has no new item).
pub async fn update_index<K: Kv>(
    kv: &K,
    store_name: &str,
    collection_name: &str,
    item_key: &ItemKey,
    old_item: Option<&Item>,
    new_item: Option<&Item>,
    index: &Index,
) -> Result<()> {
    let old_values = values_for(old_item, index);
    let new_values = values_for(new_item, index);
    let old_projection = projection_for(old_item, index);
    let new_projection = projection_for(new_item, index);

    let values_differ = old_values != new_values;
    let proj_differ = old_projection != new_projection;

    if values_differ && all_defined(&old_values) {
        let key = KeyCodec::index_entry_key(
            store_name,
            collection_name,
            &index.keys,
            &to_scalars(&old_values),
            item_key,
        );
        kv.delete(&key, &DeleteOptions::default()).await?;
    }

    if (values_differ || proj_differ) && all_defined(&new_values) {
        let key = KeyCodec::index_entry_key(
            store_name,
            collection_name,
            &index.keys,
            &to_scalars(&new_values),
            item_key,
        );
        kv.put(&key, new_projection, &PutOptions { create_if_missing: true, error_if_exists: false }).await?;
    }

    Ok(())
}

/// Runs `update_index` over every declared index of `collection`, in
/// declaration order.
pub async fn update_indexes<K: Kv>(
    kv: &K,
    store_name: &str,
    collection: &Collection,
    item_key: &ItemKey,
    old_item: Option<&Item>,
    new_item: Option<&Item>,
) -> Result<()> {
    for index in &collection.indexes {
        update_index(kv, store_name, &collection.name, item_key, old_item, new_item, index).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "index_maintainer_test.rs"]
mod index_maintainer_test;
