use serde_json::json;

use super::*;
use crate::kv::memory::MemoryKv;
use crate::kv::{GetOptions, ScanOptions};

fn item(fields: &[(&str, Value)]) -> Item {
    let mut map = Item::new();
    for (k, v) in fields {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

/// `None` means no entry at `key`; `Some(None)` means the entry exists
/// with a genuinely absent value; `Some(Some(v))` means it exists with
/// value `v`. `kv.get` alone can't distinguish the first two (it treats
/// "found, absent value" and "not found" both as `None`), so this scans
/// for the exact key instead.
async fn entry_value(kv: &MemoryKv, key: &crate::key::Key) -> Option<Option<Value>> {
    let rows = kv.find(&ScanOptions { prefix: key.clone(), return_values: true, ..Default::default() }).await.unwrap();
    rows.into_iter().next().map(|row| row.value)
}

#[tokio::test]
async fn test_insert_writes_simple_index_entry() {
    let kv = MemoryKv::new();
    let index = Index::simple(["lastName"]);
    let new_item = item(&[("firstName", json!("Ada")), ("lastName", json!("L"))]);
    update_index(&kv, "S", "People", &ItemKey::Str("u1".into()), None, Some(&new_item), &index)
        .await
        .unwrap();

    let key = KeyCodec::index_entry_key(
        "S",
        "People",
        &["lastName".to_string()],
        &[IndexScalar::Str("L".into())],
        &ItemKey::Str("u1".into()),
    );
    assert_eq!(entry_value(&kv, &key).await, Some(None), "no declared projection: entry exists with absent value");
}

#[tokio::test]
async fn test_update_moves_index_entry() {
    let kv = MemoryKv::new();
    let index = Index::simple(["lastName"]);
    let item_key = ItemKey::Str("u1".into());
    let old_item = item(&[("lastName", json!("L"))]);
    let new_item = item(&[("lastName", json!("M"))]);
    update_index(&kv, "S", "People", &item_key, None, Some(&old_item), &index).await.unwrap();
    update_index(&kv, "S", "People", &item_key, Some(&old_item), Some(&new_item), &index).await.unwrap();

    let old_key = KeyCodec::index_entry_key(
        "S",
        "People",
        &["lastName".to_string()],
        &[IndexScalar::Str("L".into())],
        &item_key,
    );
    let new_key = KeyCodec::index_entry_key(
        "S",
        "People",
        &["lastName".to_string()],
        &[IndexScalar::Str("M".into())],
        &item_key,
    );
    assert_eq!(entry_value(&kv, &old_key).await, None, "old entry must be removed");
    assert_eq!(entry_value(&kv, &new_key).await, Some(None), "new entry exists with absent value");
}

#[tokio::test]
async fn test_delete_removes_index_entry() {
    let kv = MemoryKv::new();
    let index = Index::simple(["lastName"]);
    let item_key = ItemKey::Str("u1".into());
    let old_item = item(&[("lastName", json!("L"))]);
    update_index(&kv, "S", "People", &item_key, None, Some(&old_item), &index).await.unwrap();
    update_index(&kv, "S", "People", &item_key, Some(&old_item), None, &index).await.unwrap();

    let prefix = KeyCodec::index_namespace_prefix("S", "People", &["lastName".to_string()]);
    let rows = kv.find(&ScanOptions { prefix, ..Default::default() }).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_undefined_value_skips_index_entry() {
    let kv = MemoryKv::new();
    let index = Index::simple(["lastName"]);
    let item_key = ItemKey::Str("u1".into());
    let new_item = item(&[("firstName", json!("Ada"))]); // no lastName
    update_index(&kv, "S", "People", &item_key, None, Some(&new_item), &index).await.unwrap();

    let prefix = KeyCodec::index_namespace_prefix("S", "People", &["lastName".to_string()]);
    let rows = kv.find(&ScanOptions { prefix, ..Default::default() }).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_projection_stored_and_empty_projection_is_absent() {
    let kv = MemoryKv::new();
    let index = Index::simple(["lastName"]).with_projection(["firstName"]);
    let item_key = ItemKey::Str("u1".into());
    let new_item = item(&[("firstName", json!("Ada")), ("lastName", json!("L"))]);
    update_index(&kv, "S", "People", &item_key, None, Some(&new_item), &index).await.unwrap();

    let key = KeyCodec::index_entry_key(
        "S",
        "People",
        &["lastName".to_string()],
        &[IndexScalar::Str("L".into())],
        &item_key,
    );
    let got = kv.get(&key, &GetOptions::default()).await.unwrap().unwrap();
    assert_eq!(got, json!({"firstName": "Ada"}));
}
