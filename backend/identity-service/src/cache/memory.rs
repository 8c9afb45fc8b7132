use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use super::KeyValueCache;
use crate::error::{IdentityError, Result};

/// In-process [`KeyValueCache`] for tests and local runs.
///
/// Expiry uses the tokio clock, so paused-time tests can move past a TTL with
/// `tokio::time::advance`.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, (String, Instant)>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        let now = Instant::now();
        (entry.1 > now).then(|| entry.1 - now)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdentityError::StoreUnavailable(
                "cache: connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, (_, deadline)| *deadline <= now);
        }
        None
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check_available()?;
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.live_value(key))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.live_value(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache.set_ex("email:a@example.com", "123456", 10).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(
            cache.get("email:a@example.com").await.unwrap().as_deref(),
            Some("123456")
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("email:a@example.com").await.unwrap().is_none());
        assert!(!cache.exists("email:a@example.com").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_value_and_ttl() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "old", 5).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.set_ex("k", "new", 5).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_unavailable_cache_errors() {
        let cache = MemoryCache::new();
        cache.set_unavailable(true);

        let err = cache.exists("token:abc").await.unwrap_err();
        assert_eq!(err.status_code(), 503);

        cache.set_unavailable(false);
        assert!(!cache.exists("token:abc").await.unwrap());
    }
}
