use std::sync::Arc;

use super::*;
use crate::events::EventBus;
use crate::kv::memory::MemoryKv;
use crate::registry::{Collection, Index};

fn ctx(kv: MemoryKv, registry: CollectionRegistry) -> Context<MemoryKv> {
    Context::new(kv, Arc::new(EventBus::new()), Arc::new(registry))
}

#[tokio::test]
async fn test_create_then_reopen_writes_once() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut registry = CollectionRegistry::new();
    registry.add_collection(Collection::new("People").with_index(Index::simple(["lastName"]))).unwrap();

    let kv = MemoryKv::new();
    let manager = SchemaManager::new("S");
    let context = ctx(kv.clone(), registry.clone());
    manager.initialize(&context, &context.registry.clone()).await.unwrap();

    let descriptor = manager.read_descriptor(&context).await.unwrap().unwrap();
    assert_eq!(descriptor.version, VERSION);
    assert_eq!(descriptor.collections.len(), 1);
    assert_eq!(descriptor.collections[0].indexes[0].keys, vec!["lastName".to_string()]);

    // A second process opening the same store performs no writes: simulate
    // by reading the descriptor before/after and comparing.
    let before = manager.read_descriptor(&context).await.unwrap().unwrap();
    let manager2 = SchemaManager::new("S");
    manager2.initialize(&context, &context.registry.clone()).await.unwrap();
    let after = manager.read_descriptor(&context).await.unwrap().unwrap();
    assert_eq!(serde_json::to_value(&before).unwrap(), serde_json::to_value(&after).unwrap());
}

#[tokio::test]
async fn test_initialize_inside_transaction_is_fatal() {
    let registry = CollectionRegistry::new();
    let kv = MemoryKv::new();
    let manager = SchemaManager::new("S");
    let context = ctx(kv, registry);
    let result = context
        .transaction(|txn| async move { manager.initialize(&txn, &txn.registry.clone()).await })
        .await;
    assert!(matches!(result, Err(Error::TransactionMisuse(_))));
}

#[tokio::test]
async fn test_downgrade_is_fatal() {
    let registry = CollectionRegistry::new();
    let kv = MemoryKv::new();
    let context = ctx(kv.clone(), registry);
    let key = KeyCodec::store_descriptor_key("S");
    let descriptor =
        StoreDescriptor { name: "S".into(), version: VERSION + 1, is_locked: false, collections: vec![] };
    kv.put(&key, Some(serde_json::to_value(&descriptor).unwrap()), &PutOptions { create_if_missing: true, error_if_exists: false })
        .await
        .unwrap();

    let manager = SchemaManager::new("S");
    let result = manager.initialize(&context, &context.registry.clone()).await;
    assert!(matches!(result, Err(Error::Invariant(_))));
}

#[tokio::test]
async fn test_upgrade_from_v1_is_fatal() {
    let registry = CollectionRegistry::new();
    let kv = MemoryKv::new();
    let context = ctx(kv.clone(), registry);
    let key = KeyCodec::store_descriptor_key("S");
    let descriptor = StoreDescriptor { name: "S".into(), version: 1, is_locked: false, collections: vec![] };
    kv.put(&key, Some(serde_json::to_value(&descriptor).unwrap()), &PutOptions { create_if_missing: true, error_if_exists: false })
        .await
        .unwrap();

    let manager = SchemaManager::new("S");
    let result = manager.initialize(&context, &context.registry.clone()).await;
    assert!(matches!(result, Err(Error::UnsupportedMigration(_))));
    // unlock still ran on this failing exit path.
    let after = manager.read_descriptor(&context).await.unwrap().unwrap();
    assert!(!after.is_locked);
}

#[tokio::test]
async fn test_collection_removal_tombstones_and_purges_indexes() {
    let mut full = CollectionRegistry::new();
    full.add_collection(Collection::new("P").with_index(Index::simple(["lastName"]))).unwrap();
    full.add_collection(Collection::new("Q").with_index(Index::simple(["code"]))).unwrap();

    let kv = MemoryKv::new();
    let context = ctx(kv.clone(), full);
    let manager = SchemaManager::new("S");
    manager.initialize(&context, &context.registry.clone()).await.unwrap();

    // Put an item into Q and build its index manually to prove purge.
    let item_key = crate::key::ItemKey::Str("q1".into());
    crate::index_maintainer::update_index(
        &kv,
        "S",
        "Q",
        &item_key,
        None,
        Some(&serde_json::from_value::<Item>(serde_json::json!({"code": "X"})).unwrap()),
        &context.registry.get_collection("Q", true).unwrap().unwrap().indexes[0],
    )
    .await
    .unwrap();

    let mut reduced = CollectionRegistry::new();
    reduced.add_collection(Collection::new("P").with_index(Index::simple(["lastName"]))).unwrap();
    let context2 = ctx(kv.clone(), reduced);
    let manager2 = SchemaManager::new("S");
    manager2.initialize(&context2, &context2.registry.clone()).await.unwrap();

    let descriptor = manager2.read_descriptor(&context2).await.unwrap().unwrap();
    let q = descriptor.collections.iter().find(|c| c.name == "Q").unwrap();
    assert!(q.has_been_removed);
    assert!(q.indexes.is_empty());

    let index_prefix = KeyCodec::index_namespace_prefix("S", "Q", &["code".to_string()]);
    let rows = kv.find(&ScanOptions { prefix: index_prefix, ..Default::default() }).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_acquire_lock_retries_until_unlocked() {
    tokio::time::pause();

    let registry = CollectionRegistry::new();
    let kv = MemoryKv::new();
    let context = ctx(kv, registry);

    let key = KeyCodec::store_descriptor_key("S");
    let locked = StoreDescriptor { name: "S".into(), version: VERSION, is_locked: true, collections: vec![] };
    context
        .kv
        .put(&key, Some(serde_json::to_value(&locked).unwrap()), &PutOptions { create_if_missing: true, error_if_exists: false })
        .await
        .unwrap();

    let manager = Arc::new(SchemaManager::new("S"));
    let task_manager = manager.clone();
    let task_context = context.clone();
    let handle =
        tokio::spawn(async move { task_manager.initialize(&task_context, &task_context.registry.clone()).await });

    tokio::task::yield_now().await;
    assert!(!handle.is_finished(), "initialize must block while the descriptor is locked");

    tokio::time::advance(std::time::Duration::from_millis(5000)).await;
    tokio::task::yield_now().await;
    assert!(!handle.is_finished(), "must still be blocked after one retry interval while still locked");

    let mut unlocked = manager.read_descriptor(&context).await.unwrap().unwrap();
    unlocked.is_locked = false;
    manager.write_descriptor(&context, &unlocked).await.unwrap();

    tokio::time::advance(std::time::Duration::from_millis(5000)).await;
    handle.await.unwrap().unwrap();
    assert!(manager.is_initialized().await);
}

#[tokio::test]
async fn test_force_unlock_clears_stuck_lock() {
    let registry = CollectionRegistry::new();
    let kv = MemoryKv::new();
    let context = ctx(kv.clone(), registry);
    let manager = SchemaManager::new("S");
    manager.initialize(&context, &context.registry.clone()).await.unwrap();

    let mut descriptor = manager.read_descriptor(&context).await.unwrap().unwrap();
    descriptor.is_locked = true;
    manager.write_descriptor(&context, &descriptor).await.unwrap();

    manager.force_unlock(&context).await.unwrap();
    let after = manager.read_descriptor(&context).await.unwrap().unwrap();
    assert!(!after.is_locked);
}
