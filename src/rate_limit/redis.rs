use super::lua_scripts::INCREMENT_SCRIPT;
use super::store::{RateLimitStore, StoreError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::debug;

/// Redis-backed shared counter store
pub struct RedisStore {
    /// Redis connection manager
    connection: ConnectionManager,
    increment: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(StoreError::UnexpectedReply(reply));
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn increment(&self, key: &str, window_secs: u64) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let count: i64 = self
            .increment
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;

        debug!(count, "Counter incremented");
        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();
        // -2: missing, -1: no expiry
        let ttl: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _removed: i64 = conn.del(key).await?;
        Ok(())
    }
}
