/// Session token revocation
///
/// Logout and credential changes put the presented token on a blacklist kept in
/// the shared cache. Each entry lives exactly as long as the token would have,
/// so the list never outgrows the set of still-valid tokens.
///
/// Key format: `token:<token>`
use std::sync::Arc;

use crate::cache::KeyValueCache;
use crate::error::Result;

const REVOKED_MARKER: &str = "1";

fn revocation_key(token: &str) -> String {
    format!("token:{}", token)
}

#[derive(Clone)]
pub struct TokenRevocationStore {
    cache: Arc<dyn KeyValueCache>,
}

impl TokenRevocationStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    /// Blacklist `token` for `remaining_ttl` seconds.
    ///
    /// Revoking twice only refreshes the entry. A token that has already expired
    /// is left alone since expiry invalidates it anyway.
    pub async fn revoke(&self, token: &str, remaining_ttl: i64) -> Result<()> {
        if remaining_ttl <= 0 {
            tracing::debug!("Token already expired, skipping revocation");
            return Ok(());
        }

        self.cache
            .set_ex(&revocation_key(token), REVOKED_MARKER, remaining_ttl as u64)
            .await?;

        tracing::info!(
            ttl_secs = remaining_ttl,
            "Token revoked, blacklist entry will expire with the token"
        );
        Ok(())
    }

    /// Check if a token has been revoked
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        self.cache.exists(&revocation_key(token)).await
    }
}
