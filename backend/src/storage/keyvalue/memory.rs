use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::KeyValueClient;
use crate::storage::{StorageError, StorageResult};

/// In-process key-value map with the same atomicity guarantees as the Redis
/// client: every call is applied under one lock, nothing spans two calls.
#[derive(Default)]
pub struct MemoryClient {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueClient for MemoryClient {
    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<bool> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn incr(&self, key: &str) -> StorageResult<i64> {
        let mut entries = self.entries.lock().await;
        let current = match entries.get(key) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| StorageError::CorruptCounter {
                    key: key.to_string(),
                })?,
            None => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StorageResult<bool> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}
