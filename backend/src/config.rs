//! # Configuration
//!
//! Command-line and environment configuration for the card service. Every
//! flag has an environment fallback, and `main` loads a `.env` file (if any)
//! before parsing so local setups can keep connection strings out of the
//! shell history.

use clap::{Parser, ValueEnum};

/// Default HTTP bind address
pub const BIND_ADDRESS_DEFAULT: &str = "0.0.0.0:5500";

/// Default relational database (SQLite file next to the binary)
pub const DATABASE_URL_DEFAULT: &str = "sqlite:cards.db";

/// Default Redis address
pub const REDIS_URL_DEFAULT: &str = "redis://127.0.0.1:6379/0";

/// Card CRUD service over a relational or key-value backend
#[derive(Parser, Debug, Clone)]
#[command(name = "cards-backend")]
#[command(version)]
pub struct Config {
    /// HTTP bind address
    #[arg(short, long, env = "CARDS_BIND", default_value = BIND_ADDRESS_DEFAULT)]
    pub bind: String,

    /// Which storage backend to serve cards from
    #[arg(long, env = "CARDS_BACKEND", value_enum, default_value_t = BackendKind::Relational)]
    pub backend: BackendKind,

    /// Relational database URL (`sqlite:` or `mysql:`)
    #[arg(long, env = "DATABASE_URL", default_value = DATABASE_URL_DEFAULT)]
    pub database_url: String,

    /// Maximum pooled relational connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Key-value store URL (`redis://`, `rediss://` or `memory://`)
    #[arg(long, env = "REDIS_URL", default_value = REDIS_URL_DEFAULT)]
    pub redis_url: String,

    /// How the key-value backend writes the card collection back
    #[arg(long, env = "CARDS_KV_WRITE_MODE", value_enum, default_value_t = KvWriteMode::CompareAndSwap)]
    pub kv_write_mode: KvWriteMode,

    /// Do not create the table / seed the collection at startup
    #[arg(long)]
    pub skip_schema: bool,

    /// Enable verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Relational,
    Keyvalue,
}

/// Write strategy for the single-blob key-value backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KvWriteMode {
    /// Only write the collection back if it is unchanged since it was read
    CompareAndSwap,
    /// Blindly overwrite the collection; concurrent mutations can be lost
    Overwrite,
}

/// The subset of configuration needed to open a card store
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Relational {
        url: String,
        max_connections: u32,
    },
    KeyValue {
        url: String,
        write_mode: KvWriteMode,
    },
}

impl Config {
    pub fn store_config(&self) -> StoreConfig {
        match self.backend {
            BackendKind::Relational => StoreConfig::Relational {
                url: self.database_url.clone(),
                max_connections: self.max_connections,
            },
            BackendKind::Keyvalue => StoreConfig::KeyValue {
                url: self.redis_url.clone(),
                write_mode: self.kv_write_mode,
            },
        }
    }

    /// Default log filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info,tower_http=info,sqlx=warn",
            1 => "debug,sqlx=info",
            _ => "trace",
        }
    }
}
