//! Shared counter store used by the limiter engine.
//!
//! The engine needs an atomic increment that starts the window expiry on
//! first use, existence checks, TTL introspection, a plain set-with-expiry
//! and a delete. Redis provides them natively; [`MemoryStore`] is the
//! single-instance equivalent.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Counter store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    #[error("ttl out of range: {0}s")]
    InvalidTtl(u64),
}

/// Trait for rate limit storage backends
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically increment `key`, starting a `window_secs` expiry on the first
    /// increment of a window. Returns the post-increment count.
    async fn increment(&self, key: &str, window_secs: u64) -> Result<i64, StoreError>;

    /// Whether `key` is present and unexpired
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining lifetime of `key` in seconds; `None` if missing or without expiry
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Set `key` to `value`, expiring after `ttl_secs`
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Remove `key`; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory store for single-instance deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        debug!(remaining = self.entries.len(), "Purged expired rate limit entries");
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expiry instant `secs` from `now`
fn deadline(now: Instant, secs: u64) -> Result<Instant, StoreError> {
    now.checked_add(Duration::from_secs(secs))
        .ok_or(StoreError::InvalidTtl(secs))
}

/// Seconds left until `deadline`, rounded up
fn remaining_secs(deadline: Instant, now: Instant) -> u64 {
    let left = deadline.saturating_duration_since(now);
    let secs = left.as_secs();
    if left.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn increment(&self, key: &str, window_secs: u64) -> Result<i64, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: now,
        });

        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = deadline(now, window_secs)?;
        }

        let count = entry
            .value
            .parse::<i64>()
            .map_err(|_| StoreError::UnexpectedReply(format!("non-integer value at {}", key)))?
            + 1;
        entry.value = count.to_string();

        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false))
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| remaining_secs(entry.expires_at, now)))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let expires_at = deadline(Instant::now(), ttl_secs)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
