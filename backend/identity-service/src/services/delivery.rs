/// Delivery capability used by the notification consumers
///
/// A deliverer takes a freshly issued code to its recipient over one transport.
/// `Err` means the notice did not go out and the message should be retried.
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;

use crate::error::Result;

/// A code ready to be sent to `identifier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationNotice {
    pub identifier: String,
    pub display_name: Option<String>,
    pub code: String,
    pub expires_in: Duration,
}

impl VerificationNotice {
    /// Validity window rounded up to whole minutes, for message text
    pub fn expires_in_minutes(&self) -> u64 {
        self.expires_in.as_secs().div_ceil(60)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, notice: &VerificationNotice) -> Result<()>;
}
