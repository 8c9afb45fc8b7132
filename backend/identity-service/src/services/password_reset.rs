/// Password reset tokens
///
/// Only generation and storage live here; sending the reset link and
/// completing the reset belong to other services.
///
/// Key format: `forgot-password:<email>`
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::KeyValueCache;
use crate::error::Result;

pub const RESET_TOKEN_LENGTH: usize = 64;

fn reset_key(email: &str) -> String {
    format!("forgot-password:{}", email)
}

/// Random 64-character alphanumeric token
pub fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct PasswordResetStore {
    cache: Arc<dyn KeyValueCache>,
    ttl_secs: u64,
}

impl PasswordResetStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Store a fresh token for `email`, replacing any earlier one.
    pub async fn issue(&self, email: &str) -> Result<String> {
        let token = generate_reset_token();
        self.cache
            .set_ex(&reset_key(email), &token, self.ttl_secs)
            .await?;
        Ok(token)
    }

    /// The live token for `email`, if any
    pub async fn lookup(&self, email: &str) -> Result<Option<String>> {
        self.cache.get(&reset_key(email)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_token_shape() {
        let token = generate_reset_token();
        assert_eq!(token.len(), RESET_TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_reset_token());
    }

    #[tokio::test]
    async fn test_issue_replaces_previous_token() {
        let store = PasswordResetStore::new(Arc::new(MemoryCache::new()), 3600);

        let first = store.issue("ann@example.com").await.unwrap();
        let second = store.issue("ann@example.com").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(
            store.lookup("ann@example.com").await.unwrap().as_deref(),
            Some(second.as_str())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expires() {
        let store = PasswordResetStore::new(Arc::new(MemoryCache::new()), 60);
        store.issue("ann@example.com").await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.lookup("ann@example.com").await.unwrap().is_none());
    }
}
