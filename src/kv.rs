//! The KV backend contract this crate consumes. This module defines the
//! trait boundary only; `kv::memory` ships a reference in-memory
//! implementation used by this crate's own tests and suitable as a
//! template for a real backend (file-backed, LMDB, etc).
//!
//! `DocumentStore` is generic over `K: Kv` rather than boxing a `dyn Kv`,
//! preferring a type parameter over a trait object. A backend is a
//! cheaply-`Clone`-able handle (an `Arc`-backed struct in practice); the
//! clone handed to `transaction`'s closure *is* the ambient transaction.

pub mod memory;

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::key::Key;

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub error_if_missing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub error_if_exists: bool,
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub error_if_missing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetManyOptions {
    pub error_if_missing: bool,
    pub return_values: bool,
}

/// A range/prefix scan request. `prefix` narrows the scan to keys with
/// that prefix; `start`/`start_after`/`end`/`end_before` further bound it
/// within the prefix.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub prefix: Key,
    pub start: Option<Key>,
    pub start_after: Option<Key>,
    pub end: Option<Key>,
    pub end_before: Option<Key>,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub return_values: bool,
}

/// One row of a `find`/`get_many` result.
#[derive(Debug, Clone)]
pub struct KvEntry {
    pub key: Key,
    pub value: Option<Value>,
}

/// The ordered, transactional KV engine this crate overlays. Keys are
/// ordered byte-tuples (`Key`); values are opaque structured records
/// (`serde_json::Value`).
#[async_trait]
pub trait Kv: Clone + Send + Sync + 'static {
    async fn get(&self, key: &Key, opts: &GetOptions) -> Result<Option<Value>>;

    /// `value` is `None` for an entry with a genuinely absent value (an
    /// index entry for an index with no declared projection); this is
    /// distinct from a present JSON `null`, see `value.rs`'s
    /// `Absence and JSON null are distinct` note.
    async fn put(&self, key: &Key, value: Option<Value>, opts: &PutOptions) -> Result<()>;

    /// Returns whether a delete occurred.
    async fn delete(&self, key: &Key, opts: &DeleteOptions) -> Result<bool>;

    async fn get_many(&self, keys: &[Key], opts: &GetManyOptions) -> Result<Vec<KvEntry>>;

    async fn find(&self, opts: &ScanOptions) -> Result<Vec<KvEntry>>;

    async fn count(&self, opts: &ScanOptions) -> Result<usize>;

    /// Deletes every key matching `opts` and returns the number removed.
    async fn find_and_delete(&self, opts: &ScanOptions) -> Result<usize>;

    /// Opens a transaction scoped to `body`: commits on `Ok`, aborts on
    /// `Err`. The handle passed to `body` is this same (cheaply cloned)
    /// backend; nested `Kv` calls made through it observe each other's
    /// writes in program order.
    async fn transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send;

    async fn close(&self) -> Result<()>;
}
