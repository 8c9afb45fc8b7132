/// One-time verification codes
///
/// At most one outstanding code per (channel, identifier). Issuing a new code
/// replaces the old one and restarts its lifetime. A code is removed only when
/// the caller consumes it after a match, or when it expires.
///
/// Key format: `email:<address>` / `phone:<e164>`
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::KeyValueCache;
use crate::config::VerificationSettings;
use crate::error::Result;
use crate::validators::VERIFICATION_CODE_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationChannel {
    Email,
    Phone,
}

impl VerificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationChannel::Email => "email",
            VerificationChannel::Phone => "phone",
        }
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.as_str(), identifier)
    }
}

impl fmt::Display for VerificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a submitted code with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Matched,
    Mismatch,
    NotFound,
}

/// Six digits, each drawn uniformly from 0-9; leading zeros allowed
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..VERIFICATION_CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[derive(Clone)]
pub struct VerificationCodeStore {
    cache: Arc<dyn KeyValueCache>,
    email_ttl_secs: u64,
    phone_ttl_secs: u64,
}

impl VerificationCodeStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, settings: &VerificationSettings) -> Self {
        Self {
            cache,
            email_ttl_secs: settings.email_code_ttl_secs,
            phone_ttl_secs: settings.phone_code_ttl_secs,
        }
    }

    /// Validity window of codes on `channel`
    pub fn ttl(&self, channel: VerificationChannel) -> Duration {
        Duration::from_secs(self.ttl_secs(channel))
    }

    fn ttl_secs(&self, channel: VerificationChannel) -> u64 {
        match channel {
            VerificationChannel::Email => self.email_ttl_secs,
            VerificationChannel::Phone => self.phone_ttl_secs,
        }
    }

    /// Generate and store a fresh code, overwriting any outstanding one.
    pub async fn issue(&self, channel: VerificationChannel, identifier: &str) -> Result<String> {
        let code = generate_code();
        self.cache
            .set_ex(&channel.key(identifier), &code, self.ttl_secs(channel))
            .await?;

        tracing::debug!(channel = %channel, "Verification code issued");
        Ok(code)
    }

    /// Compare `candidate` with the stored code without consuming it.
    pub async fn check(
        &self,
        channel: VerificationChannel,
        identifier: &str,
        candidate: &str,
    ) -> Result<CodeCheck> {
        let stored = self.cache.get(&channel.key(identifier)).await?;
        Ok(match stored {
            None => CodeCheck::NotFound,
            Some(code) if code == candidate => CodeCheck::Matched,
            Some(_) => CodeCheck::Mismatch,
        })
    }

    /// Remove the outstanding code
    pub async fn consume(&self, channel: VerificationChannel, identifier: &str) -> Result<()> {
        self.cache.del(&channel.key(identifier)).await
    }
}
