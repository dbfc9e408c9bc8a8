//! # Relational Backend
//!
//! One row per card in a `cards` table whose primary key is generated by the
//! database. Each [`CardStore`](super::CardStore) operation maps to exactly
//! one parameterized statement; row-level locking in the database is the only
//! concurrency control.
//!
//! Both dialects share the DML below (they both use `?` placeholders) and
//! differ only in their DDL and in how the generated key is read back.

mod mysql;
mod sqlite;

use std::sync::Arc;

use super::{CardStore, StorageError, StorageResult};

pub use mysql::MySqlCardStore;
pub use sqlite::SqliteCardStore;

pub(crate) const INSERT_CARD: &str = r#"
    INSERT INTO cards (name, level, attribute, race, attack, defense, effect)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

pub(crate) const SELECT_CARDS: &str = r#"
    SELECT id, name, level, attribute, race, attack, defense, effect
    FROM cards
"#;

pub(crate) const UPDATE_CARD: &str = r#"
    UPDATE cards
    SET name = ?, level = ?, attribute = ?, race = ?, attack = ?, defense = ?, effect = ?
    WHERE id = ?
"#;

pub(crate) const DELETE_CARD: &str = "DELETE FROM cards WHERE id = ?";

/// Open a relational store, picking the dialect from the URL scheme
pub async fn open(url: &str, max_connections: u32) -> StorageResult<Arc<dyn CardStore>> {
    if url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteCardStore::new(url, max_connections).await?))
    } else if url.starts_with("mysql:") {
        Ok(Arc::new(MySqlCardStore::new(url, max_connections).await?))
    } else {
        Err(StorageError::UnsupportedUrl(url.to_string()))
    }
}
