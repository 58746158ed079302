//! EventBus: synchronous, in-order lifecycle notifications. Listeners run
//! to completion before the emitting operation returns.
//!
//! An explicit collaborator injected at construction, rather than a mixin
//! on the store: listeners are small trait objects fanned out in
//! registration order.

use std::sync::Arc;

use serde_json::Value;

use crate::key::ItemKey;
use crate::kv::{DeleteOptions, PutOptions};

/// One lifecycle notification. `Options` payloads carry the caller's
/// `PutOptions`/`DeleteOptions` verbatim.
#[derive(Debug, Clone)]
pub enum Event {
    DidCreate,
    DidInitialize,
    UpgradeDidStart,
    UpgradeDidStop,
    MigrationDidStart,
    MigrationDidStop,
    DidPutItem {
        collection: String,
        key: ItemKey,
        item: Value,
        options: PutOptions,
    },
    DidDeleteItem {
        collection: String,
        key: ItemKey,
        old_item: Value,
        options: DeleteOptions,
    },
}

/// A lifecycle listener. Implementors must return promptly: the emitting
/// operation blocks on every listener before it returns.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Fan-out collaborator. Holds zero or more listeners and invokes them, in
/// registration order, for every emitted event.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> EventBus {
        self.listeners.push(listener);
        self
    }

    pub fn emit(&self, event: Event) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}
