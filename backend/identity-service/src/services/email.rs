/// Email delivery of verification codes over SMTP
use crate::config::EmailSettings;
use crate::error::{IdentityError, Result};
use crate::services::delivery::{Deliverer, VerificationNotice};
use crate::validators::mask_email;
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::{info, warn};

/// Async email transport wrapper (SMTP or no-op)
#[derive(Clone)]
pub struct EmailService {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl EmailService {
    /// Build email service from configuration
    ///
    /// If SMTP host is empty, operates in no-op mode (logs only).
    /// Useful for development and testing without email infrastructure.
    pub fn new(config: &EmailSettings) -> Result<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::Internal(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email service will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| {
                IdentityError::Internal(format!("Failed to configure SMTP transport: {}", e))
            })?
            .port(config.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    /// Check if SMTP transport is enabled
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    fn compose(notice: &VerificationNotice) -> (String, String) {
        let greeting = match notice.display_name.as_deref() {
            Some(name) if !name.is_empty() => format!("Hi {},", name),
            _ => "Hi,".to_string(),
        };
        let subject = "Verify your email address".to_string();
        let body = format!(
            "{}\n\nYour verification code is {}.\nIt expires in {} minutes.\n\nIf you did not request this, please ignore this email.",
            greeting,
            notice.code,
            notice.expires_in_minutes()
        );
        (subject, body)
    }

    async fn send_mail(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        if let Some(transport) = &self.transport {
            let to = recipient.parse::<Mailbox>().map_err(|e| {
                IdentityError::Delivery(format!("Invalid recipient email address: {}", e))
            })?;

            let email = Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(subject)
                .header(header::ContentType::TEXT_PLAIN)
                .body(body.to_string())
                .map_err(|e| {
                    IdentityError::Internal(format!("Failed to build email message: {}", e))
                })?;

            transport
                .send(email)
                .await
                .map_err(|e| IdentityError::Delivery(format!("Failed to send email: {}", e)))?;
            info!(
                subject,
                recipient = %mask_email(recipient),
                "email sent successfully"
            );
        } else {
            info!(
                subject,
                recipient = %mask_email(recipient),
                "Email service running in no-op mode; skipping actual send"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Deliverer for EmailService {
    async fn deliver(&self, notice: &VerificationNotice) -> Result<()> {
        let (subject, body) = Self::compose(notice);
        self.send_mail(&notice.identifier, &subject, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn noop_settings() -> EmailSettings {
        EmailSettings {
            smtp_host: String::new(),
            smtp_port: 1025,
            smtp_username: None,
            smtp_password: None,
            smtp_from: "noreply@commerce.local".to_string(),
            use_starttls: false,
        }
    }

    fn notice() -> VerificationNotice {
        VerificationNotice {
            identifier: "ann@example.com".to_string(),
            display_name: Some("Ann".to_string()),
            code: "042137".to_string(),
            expires_in: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_body_carries_code_and_window() {
        let (_, body) = EmailService::compose(&notice());
        assert!(body.starts_with("Hi Ann,"));
        assert!(body.contains("042137"));
        assert!(body.contains("10 minutes"));
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut settings = noop_settings();
        settings.smtp_from = "not an address".to_string();
        assert!(EmailService::new(&settings).is_err());
    }

    #[tokio::test]
    async fn test_noop_mode_delivers_without_transport() {
        let service = EmailService::new(&noop_settings()).unwrap();
        assert!(!service.is_enabled());
        service.deliver(&notice()).await.unwrap();
    }
}
