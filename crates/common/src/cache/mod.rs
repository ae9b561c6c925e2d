//! Citation cache integration
//!
//! Provides:
//! - The `CitationStore` protocol used by the loader and the NGD engine
//! - A Redis implementation (one set per CURIE plus a version marker)
//! - An in-memory implementation for tests and dry runs

mod memory;

pub use memory::MemoryCitationStore;

use crate::config::RedisConfig;
use crate::db::models::CitationEntry;
use crate::errors::{AppError, Result};
use crate::retry::with_timeout;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

/// Set-valued key-value store holding CURIE citation sets
///
/// Implementations must be safe to share across workers. Reads are expected
/// to run concurrently; loads happen with no readers attached.
#[async_trait]
pub trait CitationStore: Send + Sync {
    /// Current version marker, if any
    async fn version(&self) -> Result<Option<String>>;

    /// Set the version marker
    async fn set_version(&self, version: &str) -> Result<()>;

    /// Remove every citation set and the version marker
    async fn flush(&self) -> Result<()>;

    /// Add citation identifiers to each entry's set in one round trip
    async fn add_citations(&self, entries: &[CitationEntry]) -> Result<()>;

    /// Number of citations for a CURIE (0 when unknown)
    async fn cardinality(&self, curie: &str) -> Result<u64>;

    /// Number of citations shared by two CURIEs
    async fn intersection_cardinality(&self, curie_a: &str, curie_b: &str) -> Result<u64>;
}

/// Cache key helpers
pub mod keys {
    /// Reserved key holding the loaded KG version
    ///
    /// CURIEs always carry a `PREFIX:` part, so they never collide with it.
    pub const VERSION: &str = "version";

    /// Key of a CURIE's citation set
    pub fn citations(curie: &str) -> &str {
        curie
    }
}

/// Redis citation store
#[derive(Clone)]
pub struct RedisCitationStore {
    connection: ConnectionManager,
    command_timeout: Duration,
}

impl RedisCitationStore {
    /// Connect to Redis
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::Configuration {
            message: format!("Invalid Redis URL '{}': {}", config.url, e),
        })?;

        let connection = with_timeout(
            "Redis connect",
            Duration::from_millis(config.connect_timeout_ms),
            async { Ok(ConnectionManager::new(client).await?) },
        )
        .await?;

        info!(url = %config.url, "Connected to Redis citation cache");

        Ok(Self {
            connection,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        })
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        with_timeout("PING", self.command_timeout, async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl CitationStore for RedisCitationStore {
    async fn version(&self) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        with_timeout("GET version", self.command_timeout, async move {
            Ok(conn.get::<_, Option<String>>(keys::VERSION).await?)
        })
        .await
    }

    async fn set_version(&self, version: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        with_timeout("SET version", self.command_timeout, async move {
            conn.set::<_, _, ()>(keys::VERSION, version).await?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        with_timeout("FLUSHDB", self.command_timeout, async move {
            redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
            Ok(())
        })
        .await?;
        info!("Citation cache flushed");
        Ok(())
    }

    async fn add_citations(&self, entries: &[CitationEntry]) -> Result<()> {
        let mut pipe = redis::pipe();
        let mut commands = 0usize;
        for entry in entries.iter().filter(|e| !e.pmids.is_empty()) {
            pipe.sadd(keys::citations(&entry.curie), &entry.pmids).ignore();
            commands += 1;
        }
        if commands == 0 {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        with_timeout("SADD pipeline", self.command_timeout, async move {
            pipe.query_async::<()>(&mut conn).await?;
            Ok(())
        })
        .await?;

        debug!(commands, "Executed SADD pipeline");
        Ok(())
    }

    async fn cardinality(&self, curie: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        with_timeout("SCARD", self.command_timeout, async move {
            Ok(conn.scard::<_, u64>(keys::citations(curie)).await?)
        })
        .await
    }

    async fn intersection_cardinality(&self, curie_a: &str, curie_b: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        with_timeout("SINTERCARD", self.command_timeout, async move {
            let count = redis::cmd("SINTERCARD")
                .arg(2)
                .arg(keys::citations(curie_a))
                .arg(keys::citations(curie_b))
                .query_async::<u64>(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }
}
