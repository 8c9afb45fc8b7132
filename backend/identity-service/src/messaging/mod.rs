//! Verification notification channels
//!
//! The request path publishes "a code must be sent to X" and returns; the
//! notification consumers pull those requests and do the sending. Delivery is
//! at-least-once: a message stays owned by the channel until it is acked,
//! requeued or dead-lettered.

mod memory;
mod redis_streams;

pub use memory::{DeadLetter, MemoryChannel};
pub use redis_streams::{RedisStreamChannel, StreamChannelConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const EMAIL_VERIFICATION_CHANNEL: &str = "email-verification";
pub const PHONE_VERIFICATION_CHANNEL: &str = "phone-verification";

/// Dead-letter stream that sits beside `channel`
pub fn dead_letter_channel(channel: &str) -> String {
    format!("{}.dlq", channel)
}

/// Body of a verification message.
///
/// `displayName` is only set for email messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl VerificationRequest {
    pub fn email(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: address.into(),
            display_name: Some(display_name.into()),
        }
    }

    pub fn phone(number: impl Into<String>) -> Self {
        Self {
            identifier: number.into(),
            display_name: None,
        }
    }
}

/// A message handed to a consumer.
///
/// `body` is the raw JSON as published; `attempt` counts prior failed
/// deliveries and travels next to the body, never inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    pub id: String,
    pub body: String,
    pub attempt: u32,
}

impl Delivery {
    pub fn decode(&self) -> serde_json::Result<VerificationRequest> {
        serde_json::from_str(&self.body)
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Create the channel (and its consumer group) if it does not exist yet.
    async fn declare(&self, channel: &str) -> Result<()>;

    async fn publish(&self, channel: &str, request: &VerificationRequest) -> Result<()>;

    /// Wait up to the channel's poll window for the next message.
    ///
    /// `Ok(None)` means the window passed with nothing to deliver.
    async fn receive(&self, channel: &str) -> Result<Option<Delivery>>;

    /// The message was handled; drop it for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Negative acknowledge: put the message back with `attempt + 1`.
    async fn requeue(&self, delivery: &Delivery) -> Result<()>;

    /// Move the message to the channel's dead-letter stream.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_body_wire_shape() {
        let body = serde_json::to_value(VerificationRequest::email("ann@example.com", "Ann"))
            .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"identifier": "ann@example.com", "displayName": "Ann"})
        );
    }

    #[test]
    fn test_phone_body_omits_display_name() {
        let body = serde_json::to_string(&VerificationRequest::phone("+15550001111")).unwrap();
        assert_eq!(body, r#"{"identifier":"+15550001111"}"#);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let delivery = Delivery {
            channel: EMAIL_VERIFICATION_CHANNEL.to_string(),
            id: "1-0".to_string(),
            body: "{not json".to_string(),
            attempt: 0,
        };
        assert!(delivery.decode().is_err());
    }

    #[test]
    fn test_dead_letter_channel_name() {
        assert_eq!(
            dead_letter_channel(PHONE_VERIFICATION_CHANNEL),
            "phone-verification.dlq"
        );
    }
}
