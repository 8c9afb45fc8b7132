/// Profile persistence for the identity core
///
/// The repository is the only writer of profile rows. Verified flags only move
/// from false to true, except that changing the email clears `email_verified`.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use sqlx::PgPool;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::models::ClientContext;
use crate::security::Role;

const EMAIL_UNIQUE_CONSTRAINT: &str = "profiles_email_key";
const PHONE_UNIQUE_CONSTRAINT: &str = "profiles_phone_number_key";

/// User agents longer than this are cut before storage
pub const MAX_USER_AGENT_LENGTH: usize = 512;

/// Profile as seen by the rest of the service; the password hash stays in
/// [`CredentialRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub role: Role,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a profile
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub role: Role,
    pub password_hash: String,
}

/// Projection limited to what credential checks need
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub role: Role,
    pub password_hash: String,
}

/// One entry of a profile's sign-in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

/// A sign-in to append to the history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoginAttempt {
    pub profile_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
}

impl NewLoginAttempt {
    /// Unparseable addresses are dropped and user agents are capped at
    /// [`MAX_USER_AGENT_LENGTH`] characters.
    pub fn from_client(profile_id: Uuid, client: &ClientContext, success: bool) -> Self {
        let ip_address = client
            .ip_address
            .as_deref()
            .and_then(|raw| raw.trim().parse::<IpAddr>().ok())
            .map(|ip| ip.to_string());
        let user_agent = client
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LENGTH).collect());

        Self {
            profile_id,
            ip_address,
            user_agent,
            success,
        }
    }
}

/// How a profile is looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Id(Uuid),
    Email(String),
    Phone(String),
}

impl Identifier {
    fn column(&self) -> &'static str {
        match self {
            Identifier::Id(_) => "id",
            Identifier::Email(_) => "email",
            Identifier::Phone(_) => "phone_number",
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Insert a profile; a taken email or phone number is a conflict.
    async fn create_profile(&self, profile: NewProfile) -> Result<Profile>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Profile>>;

    async fn get_by_identifier(&self, identifier: &Identifier) -> Result<Option<Profile>>;

    async fn get_credentials(&self, identifier: &Identifier) -> Result<Option<CredentialRecord>>;

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Replace the email and mark it unverified.
    async fn update_email(&self, id: Uuid, email: &str) -> Result<()>;

    async fn set_email_verified(&self, id: Uuid) -> Result<()>;

    async fn set_phone_verified(&self, id: Uuid) -> Result<()>;

    async fn exists_by_identifier(&self, identifier: &Identifier) -> Result<bool>;

    async fn add_login_attempt(&self, attempt: NewLoginAttempt) -> Result<()>;

    /// Newest first, at most `limit` entries.
    async fn recent_login_attempts(&self, id: Uuid, limit: u32) -> Result<Vec<LoginAttempt>>;
}

/// PostgreSQL-backed [`ProfileRepository`]
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PgProfileRepository {
    pub fn new(pool: PgPool, operation_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
        }
    }

    async fn bounded<T, F>(&self, query: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.operation_timeout, query).await {
            Ok(result) => result.map_err(map_write_error),
            Err(_) => Err(IdentityError::StoreUnavailable(
                "database: operation timed out".to_string(),
            )),
        }
    }

    fn expect_row(rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(IdentityError::UserNotFound);
        }
        Ok(())
    }
}

/// Unique violations become conflicts; everything else is a store failure
fn map_write_error(err: sqlx::Error) -> IdentityError {
    let constraint = err
        .as_database_error()
        .and_then(|db_err| db_err.constraint())
        .map(str::to_owned);

    match constraint.as_deref() {
        Some(EMAIL_UNIQUE_CONSTRAINT) => IdentityError::EmailAlreadyExists,
        Some(PHONE_UNIQUE_CONSTRAINT) => IdentityError::PhoneAlreadyExists,
        _ => err.into(),
    }
}

fn bind_identifier<'q, O>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
    identifier: &'q Identifier,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
    match identifier {
        Identifier::Id(id) => query.bind(*id),
        Identifier::Email(email) => query.bind(email.as_str()),
        Identifier::Phone(phone) => query.bind(phone.as_str()),
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn create_profile(&self, profile: NewProfile) -> Result<Profile> {
        self.bounded(
            sqlx::query_as::<_, Profile>(
                r#"
                INSERT INTO profiles (first_name, last_name, email, phone_number, role, password_hash)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, first_name, last_name, email, phone_number, role,
                          email_verified, phone_verified, created_at, updated_at
                "#,
            )
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .bind(&profile.email)
            .bind(&profile.phone_number)
            .bind(profile.role)
            .bind(&profile.password_hash)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Profile>> {
        self.get_by_identifier(&Identifier::Id(id)).await
    }

    async fn get_by_identifier(&self, identifier: &Identifier) -> Result<Option<Profile>> {
        let sql = format!(
            r#"
            SELECT id, first_name, last_name, email, phone_number, role,
                   email_verified, phone_verified, created_at, updated_at
            FROM profiles
            WHERE {} = $1
            "#,
            identifier.column()
        );

        self.bounded(
            bind_identifier(sqlx::query_as::<_, Profile>(&sql), identifier).fetch_optional(&self.pool),
        )
        .await
    }

    async fn get_credentials(&self, identifier: &Identifier) -> Result<Option<CredentialRecord>> {
        let sql = format!(
            "SELECT id, role, password_hash FROM profiles WHERE {} = $1",
            identifier.column()
        );

        self.bounded(
            bind_identifier(sqlx::query_as::<_, CredentialRecord>(&sql), identifier)
                .fetch_optional(&self.pool),
        )
        .await
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result = self
            .bounded(
                sqlx::query(
                    r#"
                    UPDATE profiles
                    SET password_hash = $1, updated_at = CURRENT_TIMESTAMP
                    WHERE id = $2
                    "#,
                )
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool),
            )
            .await?;

        Self::expect_row(result.rows_affected())
    }

    async fn update_email(&self, id: Uuid, email: &str) -> Result<()> {
        let result = self
            .bounded(
                sqlx::query(
                    r#"
                    UPDATE profiles
                    SET email = $1, email_verified = FALSE, updated_at = CURRENT_TIMESTAMP
                    WHERE id = $2
                    "#,
                )
                .bind(email)
                .bind(id)
                .execute(&self.pool),
            )
            .await?;

        Self::expect_row(result.rows_affected())
    }

    async fn set_email_verified(&self, id: Uuid) -> Result<()> {
        let result = self
            .bounded(
                sqlx::query(
                    "UPDATE profiles SET email_verified = TRUE, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
                )
                .bind(id)
                .execute(&self.pool),
            )
            .await?;

        Self::expect_row(result.rows_affected())
    }

    async fn set_phone_verified(&self, id: Uuid) -> Result<()> {
        let result = self
            .bounded(
                sqlx::query(
                    "UPDATE profiles SET phone_verified = TRUE, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
                )
                .bind(id)
                .execute(&self.pool),
            )
            .await?;

        Self::expect_row(result.rows_affected())
    }

    async fn exists_by_identifier(&self, identifier: &Identifier) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM profiles WHERE {} = $1)",
            identifier.column()
        );

        let query = sqlx::query_scalar::<_, bool>(&sql);
        let query = match identifier {
            Identifier::Id(id) => query.bind(*id),
            Identifier::Email(email) => query.bind(email.as_str()),
            Identifier::Phone(phone) => query.bind(phone.as_str()),
        };

        self.bounded(query.fetch_one(&self.pool)).await
    }

    async fn add_login_attempt(&self, attempt: NewLoginAttempt) -> Result<()> {
        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO login_attempts (profile_id, ip_address, user_agent, success)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(attempt.profile_id)
            .bind(attempt.ip_address)
            .bind(attempt.user_agent)
            .bind(attempt.success)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn recent_login_attempts(&self, id: Uuid, limit: u32) -> Result<Vec<LoginAttempt>> {
        self.bounded(
            sqlx::query_as::<_, LoginAttempt>(
                r#"
                SELECT id, profile_id, ip_address, user_agent, success, attempted_at
                FROM login_attempts
                WHERE profile_id = $1
                ORDER BY attempted_at DESC
                LIMIT $2
                "#,
            )
            .bind(id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_columns() {
        assert_eq!(Identifier::Id(Uuid::nil()).column(), "id");
        assert_eq!(Identifier::Email("a@b.io".into()).column(), "email");
        assert_eq!(Identifier::Phone("+15550001111".into()).column(), "phone_number");
    }

    #[test]
    fn test_login_attempt_normalizes_client_details() {
        let id = Uuid::new_v4();
        let client = ClientContext::new(" 203.0.113.7 ", "x".repeat(MAX_USER_AGENT_LENGTH + 10));
        let attempt = NewLoginAttempt::from_client(id, &client, false);

        assert_eq!(attempt.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(
            attempt.user_agent.map(|ua| ua.chars().count()),
            Some(MAX_USER_AGENT_LENGTH)
        );
        assert!(!attempt.success);

        let client = ClientContext::new("not-an-ip", "  ");
        let attempt = NewLoginAttempt::from_client(id, &client, true);
        assert_eq!(attempt.ip_address, None);
        assert_eq!(attempt.user_agent, None);

        let attempt = NewLoginAttempt::from_client(id, &ClientContext::new("2001:db8::1", "ua"), true);
        assert_eq!(attempt.ip_address.as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn test_non_database_error_is_store_failure() {
        let err = map_write_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, IdentityError::StoreUnavailable(_)));
    }
}
