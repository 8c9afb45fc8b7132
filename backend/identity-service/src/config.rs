//! Configuration management for the identity core
//!
//! Loads settings from environment variables, with a `.env` file picked up in
//! debug builds for local development.
//!
//! # Example
//!
//! ```no_run
//! use commerce_identity::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("session lifetime: {}h", settings.session.expiry_hours);
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::info;

use crate::messaging::{EMAIL_VERIFICATION_CHANNEL, PHONE_VERIFICATION_CHANNEL};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub session: SessionSettings,
    pub verification: VerificationSettings,
    pub notifications: NotificationSettings,
    pub email: EmailSettings,
    pub sms: SmsSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            server: ServerSettings::from_env(),
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            session: SessionSettings::from_env()?,
            verification: VerificationSettings::from_env()?,
            notifications: NotificationSettings::from_env()?,
            email: EmailSettings::from_env()?,
            sms: SmsSettings::from_env(),
        })
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", key))
}

/// [`parse_env`] for lifetimes in seconds; zero is rejected
fn parse_ttl_secs(key: &str, default: &str) -> Result<u64> {
    let secs: u64 = parse_env(key, default)?;
    anyhow::ensure!(secs > 0, "Invalid {}: must be greater than zero", key);
    Ok(secs)
}

/// Process identity, used in logs and as the default consumer name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub app_name: String,
    pub environment: String,
}

impl ServerSettings {
    fn from_env() -> Self {
        Self {
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "commerce-identity".to_string()),
            environment: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: u64,
    pub acquire_timeout: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "20")?,
            min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "2")?,
            idle_timeout: parse_env("DATABASE_IDLE_TIMEOUT", "300")?,
            acquire_timeout: parse_env("DATABASE_ACQUIRE_TIMEOUT", "10")?,
        })
    }
}

/// Redis cache and stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    pub operation_timeout_ms: u64,
}

impl RedisSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            operation_timeout_ms: parse_env("REDIS_OPERATION_TIMEOUT_MS", "2000")?,
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Session token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub jwt_secret: String,
    pub expiry_hours: u64,
}

impl SessionSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            expiry_hours: parse_env("JWT_EXPIRY_HOURS", "72")?,
        })
    }
}

/// Lifetimes of one-time codes and reset tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSettings {
    pub email_code_ttl_secs: u64,
    pub phone_code_ttl_secs: u64,
    pub password_reset_ttl_secs: u64,
}

impl VerificationSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            email_code_ttl_secs: parse_ttl_secs("EMAIL_CODE_TTL_SECS", "600")?,
            phone_code_ttl_secs: parse_ttl_secs("PHONE_CODE_TTL_SECS", "300")?,
            password_reset_ttl_secs: parse_ttl_secs("PASSWORD_RESET_TTL_SECS", "3600")?,
        })
    }
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            email_code_ttl_secs: 600,
            phone_code_ttl_secs: 300,
            password_reset_ttl_secs: 3600,
        }
    }
}

/// Notification stream and consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub email_channel: String,
    pub phone_channel: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub poll_block_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl NotificationSettings {
    fn from_env() -> Result<Self> {
        let consumer_name = env::var("NOTIFICATION_CONSUMER_NAME").unwrap_or_else(|_| {
            env::var("HOSTNAME").unwrap_or_else(|_| "identity-core-1".to_string())
        });

        Ok(Self {
            email_channel: env::var("NOTIFICATION_EMAIL_CHANNEL")
                .unwrap_or_else(|_| EMAIL_VERIFICATION_CHANNEL.to_string()),
            phone_channel: env::var("NOTIFICATION_PHONE_CHANNEL")
                .unwrap_or_else(|_| PHONE_VERIFICATION_CHANNEL.to_string()),
            consumer_group: env::var("NOTIFICATION_CONSUMER_GROUP")
                .unwrap_or_else(|_| "identity-core".to_string()),
            consumer_name,
            poll_block_ms: parse_env("NOTIFICATION_POLL_BLOCK_MS", "5000")?,
            max_attempts: parse_env("NOTIFICATION_MAX_ATTEMPTS", "5")?,
            retry_backoff_ms: parse_env("NOTIFICATION_RETRY_BACKOFF_MS", "500")?,
            max_backoff_ms: parse_env("NOTIFICATION_MAX_BACKOFF_MS", "30000")?,
        })
    }
}

/// SMTP settings; an empty host puts the email sender in log-only mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parse_env("SMTP_PORT", "1025")?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@commerce.local".to_string()),
            use_starttls: env::var("SMTP_USE_STARTTLS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        })
    }
}

/// SMS settings; without a region the SMS sender only logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsSettings {
    pub aws_region: Option<String>,
    pub sender_id: Option<String>,
}

impl SmsSettings {
    fn from_env() -> Self {
        Self {
            aws_region: env::var("AWS_REGION").ok().filter(|r| !r.is_empty()),
            sender_id: env::var("SMS_SENDER_ID").ok(),
        }
    }
}
