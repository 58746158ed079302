//! `MemoryKv`: a reference in-memory implementation of the `Kv` contract,
//! used by this crate's own test suite and as a template for a real
//! backend: an ordered map guarded by a lock, with a factory-style
//! constructor.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::kv::{DeleteOptions, GetManyOptions, GetOptions, Kv, KvEntry, PutOptions, ScanOptions};

/// `None` in the value slot represents a genuinely absent value (as
/// opposed to the key not being present in `map` at all).
#[derive(Default)]
struct Inner {
    map: BTreeMap<Key, Option<Value>>,
}

/// Cheaply-cloneable handle onto a shared, ordered, in-memory map. Clones
/// share the same backing storage; this is what lets `transaction`'s
/// closure receive "the same store" as an ambient transaction.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryKv {
    pub fn new() -> MemoryKv {
        MemoryKv::default()
    }

    fn scan_locked(inner: &Inner, opts: &ScanOptions) -> Vec<KvEntry> {
        let mut rows: Vec<(&Key, &Option<Value>)> = inner
            .map
            .range(..)
            .filter(|(k, _)| opts.prefix.is_prefix_of(k))
            .filter(|(k, _)| opts.start.as_ref().map_or(true, |s| *k >= s))
            .filter(|(k, _)| opts.start_after.as_ref().map_or(true, |s| *k > s))
            .filter(|(k, _)| opts.end.as_ref().map_or(true, |e| *k <= e))
            .filter(|(k, _)| opts.end_before.as_ref().map_or(true, |e| *k < e))
            .collect();
        if opts.reverse {
            rows.reverse();
        }
        if let Some(limit) = opts.limit {
            rows.truncate(limit);
        }
        rows.into_iter()
            .map(|(k, v)| KvEntry {
                key: k.clone(),
                value: if opts.return_values { v.clone() } else { None },
            })
            .collect()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &Key, opts: &GetOptions) -> Result<Option<Value>> {
        let inner = self.inner.lock();
        match inner.map.get(key) {
            Some(v) => Ok(v.clone()),
            None if opts.error_if_missing => {
                Err(Error::invariant(format!("key not found: {key:?}")))
            },
            None => Ok(None),
        }
    }

    async fn put(&self, key: &Key, value: Option<Value>, opts: &PutOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        let exists = inner.map.contains_key(key);
        if exists && opts.error_if_exists {
            return Err(Error::invariant(format!("key already exists: {key:?}")));
        }
        if !exists && !opts.create_if_missing {
            return Err(Error::invariant(format!(
                "key does not exist and create_if_missing is false: {key:?}"
            )));
        }
        inner.map.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key, opts: &DeleteOptions) -> Result<bool> {
        let mut inner = self.inner.lock();
        let existed = inner.map.remove(key).is_some();
        if !existed && opts.error_if_missing {
            return Err(Error::invariant(format!("key not found: {key:?}")));
        }
        Ok(existed)
    }

    async fn get_many(&self, keys: &[Key], opts: &GetManyOptions) -> Result<Vec<KvEntry>> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match inner.map.get(key) {
                Some(v) => out.push(KvEntry {
                    key: key.clone(),
                    value: if opts.return_values { v.clone() } else { None },
                }),
                None if opts.error_if_missing => {
                    return Err(Error::invariant(format!("key not found: {key:?}")));
                },
                None => out.push(KvEntry { key: key.clone(), value: None }),
            }
        }
        Ok(out)
    }

    async fn find(&self, opts: &ScanOptions) -> Result<Vec<KvEntry>> {
        let inner = self.inner.lock();
        Ok(Self::scan_locked(&inner, opts))
    }

    async fn count(&self, opts: &ScanOptions) -> Result<usize> {
        let inner = self.inner.lock();
        Ok(Self::scan_locked(&inner, opts).len())
    }

    async fn find_and_delete(&self, opts: &ScanOptions) -> Result<usize> {
        let mut inner = self.inner.lock();
        let keys: Vec<Key> = Self::scan_locked(&inner, opts).into_iter().map(|e| e.key).collect();
        for key in &keys {
            inner.map.remove(key);
        }
        Ok(keys.len())
    }

    async fn transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Self) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let snapshot = self.inner.lock().map.clone();
        match body(self.clone()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.inner.lock().map = snapshot;
                Err(err)
            },
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
