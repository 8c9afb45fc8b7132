use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Coarse classification used by callers to pick a response and a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape; nothing was written.
    Validation,
    /// Identifier already in use, old value equals new value, or already verified.
    Conflict,
    /// Bad credentials or an expired/invalid/revoked session token.
    Authentication,
    /// No profile, or no verification code outstanding.
    NotFound,
    /// Cache, database or channel timed out or refused the connection. Retryable.
    StoreUnavailable,
    /// The email/SMS transport could not send.
    DeliveryFailure,
    Internal,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Phone number already exists")]
    PhoneAlreadyExists,

    #[error("Old email and new email cannot be the same")]
    SameEmail,

    #[error("Old password and new password cannot be the same")]
    SamePassword,

    #[error("Email already verified")]
    EmailAlreadyVerified,

    #[error("Phone number already verified")]
    PhoneAlreadyVerified,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("You can't access this resource. Please verify your email address.")]
    EmailNotVerified,

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Verification code not found")]
    VerificationCodeNotFound,

    #[error("Invalid verification code")]
    InvalidVerificationCode,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::Validation(_)
            | IdentityError::InvalidRole(_)
            | IdentityError::InvalidVerificationCode => ErrorKind::Validation,
            IdentityError::EmailAlreadyExists
            | IdentityError::PhoneAlreadyExists
            | IdentityError::SameEmail
            | IdentityError::SamePassword
            | IdentityError::EmailAlreadyVerified
            | IdentityError::PhoneAlreadyVerified => ErrorKind::Conflict,
            IdentityError::InvalidCredentials
            | IdentityError::InvalidPassword
            | IdentityError::Unauthorized
            | IdentityError::EmailNotVerified => ErrorKind::Authentication,
            IdentityError::UserNotFound | IdentityError::VerificationCodeNotFound => {
                ErrorKind::NotFound
            }
            IdentityError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            IdentityError::Delivery(_) => ErrorKind::DeliveryFailure,
            IdentityError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status for the routing layer.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Authentication => match self {
                IdentityError::EmailNotVerified => 403,
                _ => 401,
            },
            ErrorKind::NotFound => 404,
            ErrorKind::StoreUnavailable => 503,
            ErrorKind::DeliveryFailure => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// Message safe to hand back to a client.
    pub fn public_message(&self) -> String {
        match self {
            // Don't leak internal details in production
            IdentityError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            IdentityError::Delivery(_) | IdentityError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StoreUnavailable | ErrorKind::DeliveryFailure
        )
    }
}

// Conversions from external error types
impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        IdentityError::StoreUnavailable(format!("database: {}", err))
    }
}

impl From<redis::RedisError> for IdentityError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        IdentityError::StoreUnavailable(format!("redis: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for IdentityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::debug!("JWT rejected: {}", err);
        IdentityError::Unauthorized
    }
}

impl From<validator::ValidationErrors> for IdentityError {
    fn from(err: validator::ValidationErrors) -> Self {
        IdentityError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        IdentityError::Internal(format!("serialization: {}", err))
    }
}
