use thiserror::Error;

/// Failures raised by card storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the session at open
    #[error("failed to connect to {backend} backend: {source}")]
    Connection {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unsupported storage url: {0}")]
    UnsupportedUrl(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("key-value store error: {0}")]
    KeyValue(#[from] redis::RedisError),

    /// The stored card collection is not a valid JSON card array
    #[error("card collection could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("counter at key {key} does not hold an integer")]
    CorruptCounter { key: String },

    /// The collection kept changing under a compare-and-swap write
    #[error("card collection changed concurrently; gave up after {attempts} attempts")]
    Conflict { attempts: u32 },
}

impl StorageError {
    pub fn connection<E>(backend: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            backend,
            source: Box::new(source),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
