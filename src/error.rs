//! Crate-wide error type.
//!
//! One variant per error kind the overlay can surface: configuration
//! mistakes caught before any I/O, invariant violations discovered while
//! reconciling declared schema against persisted schema, unsupported
//! migrations, transaction misuse, and errors surfaced from the underlying
//! KV engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad construction options, bad key/item/options shape, duplicate
    /// collection names -- anything caught before touching the KV engine.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A schema or data invariant the engine relies on does not hold:
    /// missing collection, no index matches a query/order, missing store
    /// descriptor, attempted downgrade.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A migration path the engine does not implement: re-adding a
    /// tombstoned collection, upgrading from a version at or below 2.
    #[error("unsupported migration: {0}")]
    UnsupportedMigration(String),

    /// `initialize`/`destroy_all` called from inside a transaction, or any
    /// other API called in a way the transaction model forbids.
    #[error("transaction misuse: {0}")]
    TransactionMisuse(String),

    /// Propagated verbatim from the KV engine.
    #[error("kv backend error: {0}")]
    Kv(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Error {
        Error::Configuration(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Error {
        Error::Invariant(msg.into())
    }

    pub fn unsupported_migration(msg: impl Into<String>) -> Error {
        Error::UnsupportedMigration(msg.into())
    }

    pub fn transaction_misuse(msg: impl Into<String>) -> Error {
        Error::TransactionMisuse(msg.into())
    }

    pub fn kv(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Kv(Box::new(err))
    }
}
