/// Session token issuing and validation
///
/// Tokens are HS512-signed JWTs carrying a typed [`SessionClaims`] body. The
/// verifier pins the algorithm to HS512 no matter what the token header claims,
/// so a token re-signed with another algorithm (or `none`) never validates.
///
/// The signing secret is held by the [`SessionIssuer`] value; there is no global
/// key state.
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::SessionSettings;
use crate::error::{IdentityError, Result};

/// HS512 secrets shorter than this are refused at construction
pub const MIN_SECRET_LENGTH: usize = 32;

const SESSION_ALGORITHM: Algorithm = Algorithm::HS512;

/// Account role embedded in every session
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "profile_role", rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Store,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Store => "store",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "store" => Ok(Role::Store),
            other => Err(IdentityError::InvalidRole(other.to_string())),
        }
    }
}

/// Claims carried by a session token.
///
/// Deserialization is the shape check: a non-UUID `sub` or an unknown `role`
/// fails to decode and the token is rejected as a whole. `jti` is fresh per
/// mint, so two tokens for the same subject never share a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub jti: Uuid,
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub authorized: bool,
}

impl SessionClaims {
    pub fn user_id(&self) -> Uuid {
        self.sub
    }

    /// Whole seconds until expiry, rounded up. Zero or negative once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> i64 {
        let remaining_ms = self.exp * 1000 - now.timestamp_millis();
        if remaining_ms <= 0 {
            return remaining_ms.div_euclid(1000);
        }
        (remaining_ms + 999) / 1000
    }
}

/// Mints and parses session tokens with one shared HS512 secret
#[derive(Clone)]
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &[u8], lifetime: Duration) -> Result<Self> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(IdentityError::Internal(format!(
                "session secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if lifetime <= Duration::zero() {
            return Err(IdentityError::Internal(
                "session lifetime must be positive".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetime,
        })
    }

    pub fn from_settings(settings: &SessionSettings) -> Result<Self> {
        let hours = i64::try_from(settings.expiry_hours)
            .map_err(|_| IdentityError::Internal("JWT_EXPIRY_HOURS out of range".to_string()))?;
        Self::new(settings.jwt_secret.as_bytes(), Duration::hours(hours))
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Mint a token for `subject` valid for the configured lifetime from now.
    pub fn mint(&self, subject: Uuid, role: &str) -> Result<String> {
        self.mint_at(subject, role, Utc::now())
    }

    /// Mint with an explicit issue time.
    pub fn mint_at(&self, subject: Uuid, role: &str, issued_at: DateTime<Utc>) -> Result<String> {
        let role = Role::from_str(role)?;
        let claims = SessionClaims {
            jti: Uuid::new_v4(),
            sub: subject,
            role,
            iat: issued_at.timestamp(),
            exp: (issued_at + self.lifetime).timestamp(),
            authorized: true,
        };

        encode(&Header::new(SESSION_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Internal(format!("Token signing failed: {}", e)))
    }

    /// Validate signature, expiry and claim shape.
    ///
    /// Every failure is reported as `Unauthorized`.
    pub fn parse(&self, token: &str) -> Result<SessionClaims> {
        let mut validation = Validation::new(SESSION_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)?;
        if !data.claims.authorized {
            return Err(IdentityError::Unauthorized);
        }
        Ok(data.claims)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn extract_bearer(header: &str) -> Result<&str> {
    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(IdentityError::Unauthorized);
    }
    Ok(token)
}
