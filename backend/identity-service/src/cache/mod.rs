//! Ephemeral key-value cache shared by session revocation, verification codes
//! and password-reset tokens.
//!
//! Every entry carries a TTL; the cache is the only place those records live.

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Write `value` under `key`, replacing any previous value and TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
