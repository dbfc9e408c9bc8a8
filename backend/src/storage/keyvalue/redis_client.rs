use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::info;

use super::KeyValueClient;
use crate::storage::{StorageError, StorageResult};

const BACKEND: &str = "redis";

/// Sets KEYS[1] to ARGV[3] only if it currently holds ARGV[2]. ARGV[1] is
/// "1" when a value is expected and "0" when the key must be absent.
const COMPARE_AND_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

/// Redis session shared by every request. The connection manager
/// multiplexes commands and reconnects on its own.
pub struct RedisClient {
    conn: ConnectionManager,
    compare_and_swap: Script,
}

impl RedisClient {
    /// Open a session. Malformed URLs and unreachable hosts fail here.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StorageError::connection(BACKEND, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::connection(BACKEND, e))?;
        info!("Connected to Redis at {}", url);

        Ok(Self {
            conn,
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }
}

#[async_trait]
impl KeyValueClient for RedisClient {
    async fn ping(&self) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StorageResult<bool> {
        let mut conn = self.conn.clone();
        let written: bool = conn.set_nx(key, value).await?;
        Ok(written)
    }

    async fn incr(&self, key: &str) -> StorageResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StorageResult<bool> {
        let mut conn = self.conn.clone();
        let present = if expected.is_some() { "1" } else { "0" };
        let swapped: i32 = self
            .compare_and_swap
            .key(key)
            .arg(present)
            .arg(expected.unwrap_or(""))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}
