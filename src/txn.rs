//! TxnContext: a scoped override of the KV handle so nested calls reuse
//! a transaction, carried as an explicit `Context` value threaded through
//! every operation instead of a cloned `self`.

use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::events::EventBus;
use crate::kv::Kv;
use crate::registry::CollectionRegistry;

/// KV handle + collaborators + ambient-transaction flag, threaded through
/// every `QueryEngine`/`SchemaManager` operation. `transaction(fn)`
/// produces a child `Context` whose `kv` is the transaction handle;
/// `inside_transaction` marks that flag.
#[derive(Clone)]
pub struct Context<K: Kv> {
    pub kv: K,
    pub events: Arc<EventBus>,
    pub registry: Arc<CollectionRegistry>,
    inside_transaction: bool,
}

impl<K: Kv> Context<K> {
    pub fn new(kv: K, events: Arc<EventBus>, registry: Arc<CollectionRegistry>) -> Context<K> {
        Context { kv, events, registry, inside_transaction: false }
    }

    pub fn inside_transaction(&self) -> bool {
        self.inside_transaction
    }

    /// If already inside a transaction, nesting is flattened: `body` runs
    /// directly against `self`. Otherwise a KV transaction is opened and
    /// `body` runs against a child `Context` whose `kv` is the
    /// transaction handle.
    pub async fn transaction<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Context<K>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if self.inside_transaction {
            return body(self.clone()).await;
        }
        let events = self.events.clone();
        let registry = self.registry.clone();
        self.kv
            .clone()
            .transaction(move |txn_kv| {
                let child = Context { kv: txn_kv, events, registry, inside_transaction: true };
                body(child)
            })
            .await
    }
}

#[cfg(test)]
mod txn_test {
    use super::*;
    use crate::kv::memory::MemoryKv;

    #[tokio::test]
    async fn test_nested_transaction_flattens() {
        let ctx = Context::new(MemoryKv::new(), Arc::new(EventBus::new()), Arc::new(CollectionRegistry::new()));
        let depth = ctx
            .transaction(|outer| async move {
                assert!(outer.inside_transaction());
                outer
                    .transaction(|inner| async move {
                        assert!(inner.inside_transaction());
                        Ok(2)
                    })
                    .await
            })
            .await
            .unwrap();
        assert_eq!(depth, 2);
        assert!(!ctx.inside_transaction());
    }
}
