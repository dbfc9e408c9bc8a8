//! # Storage Module
//!
//! Persistence for the card collection. The rest of the service only sees the
//! [`CardStore`] trait; which implementation sits behind it is decided once at
//! startup from [`StoreConfig`].
//!
//! ## Backends
//!
//! - **Relational** (`relational`): one row per card, identifiers come from
//!   the table's auto-increment column. SQLite and MySQL are supported.
//!   Concurrent writers are serialized by the database itself.
//! - **Key-value** (`keyvalue`): the whole collection is one JSON array under
//!   a single key, with a separate atomic counter minting identifiers. Every
//!   mutation is a read-modify-write of the full blob, guarded by
//!   compare-and-swap unless `overwrite` mode is selected.
//!
//! ## Semantics shared by every backend
//!
//! - `create` ignores any caller identifier and returns the stored card.
//! - `read_all` returns cards in the backend's own order, not sorted by id.
//! - `update` and `delete` on an identifier that does not exist succeed
//!   without changing anything.

pub mod error;
pub mod keyvalue;
pub mod relational;

use std::sync::Arc;

use async_trait::async_trait;
use shared::{Card, NewCard};

use crate::config::StoreConfig;

pub use error::{StorageError, StorageResult};
pub use keyvalue::KvCardStore;

/// Storage contract for the card collection
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Create the table (or seed the collection) if it does not exist yet
    async fn ensure_schema(&self) -> StorageResult<()>;

    /// Persist a new card and return it with its assigned identifier
    async fn create(&self, card: NewCard) -> StorageResult<Card>;

    /// Return every stored card
    async fn read_all(&self) -> StorageResult<Vec<Card>>;

    /// Replace all fields of the card with the same identifier
    async fn update(&self, card: &Card) -> StorageResult<()>;

    /// Remove the card with the given identifier
    async fn delete(&self, id: i64) -> StorageResult<()>;

    /// Release the underlying connection(s). Called once at shutdown.
    async fn close(&self) -> StorageResult<()>;
}

/// Open the backend described by `config`
pub async fn open_store(config: &StoreConfig) -> StorageResult<Arc<dyn CardStore>> {
    match config {
        StoreConfig::Relational {
            url,
            max_connections,
        } => relational::open(url, *max_connections).await,
        StoreConfig::KeyValue { url, write_mode } => {
            let store = KvCardStore::open(url, *write_mode).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KvWriteMode;

    #[tokio::test]
    async fn test_open_memory_keyvalue_store() {
        let config = StoreConfig::KeyValue {
            url: "memory://".to_string(),
            write_mode: KvWriteMode::CompareAndSwap,
        };
        let store = open_store(&config).await.expect("Failed to open store");
        assert_eq!(store.backend_name(), "keyvalue");
        store.ensure_schema().await.expect("Failed to ensure schema");
        assert!(store.read_all().await.unwrap().is_empty());
        store.close().await.expect("Failed to close store");
    }

    #[tokio::test]
    async fn test_open_sqlite_store() {
        let config = StoreConfig::Relational {
            url: format!("sqlite:file:open_{}?mode=memory&cache=shared", uuid::Uuid::new_v4()),
            max_connections: 2,
        };
        let store = open_store(&config).await.expect("Failed to open store");
        assert_eq!(store.backend_name(), "sqlite");
        store.ensure_schema().await.expect("Failed to ensure schema");
        assert!(store.read_all().await.unwrap().is_empty());
        store.close().await.expect("Failed to close store");
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        let config = StoreConfig::Relational {
            url: "postgres://localhost/cards".to_string(),
            max_connections: 1,
        };
        match open_store(&config).await {
            Err(StorageError::UnsupportedUrl(url)) => assert!(url.starts_with("postgres")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("postgres urls should be rejected"),
        }
    }

    #[tokio::test]
    async fn test_open_rejects_malformed_redis_url() {
        let config = StoreConfig::KeyValue {
            url: "not a url".to_string(),
            write_mode: KvWriteMode::CompareAndSwap,
        };
        assert!(open_store(&config).await.is_err());
    }
}
