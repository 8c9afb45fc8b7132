use serde::Serialize;

use crate::error::{IdentityError, Result};

/// Envelope for operations that hand back a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResponse {
    pub fn ok(token: String) -> Self {
        Self {
            success: true,
            token: Some(token),
            error: None,
        }
    }

    pub fn failed(err: &IdentityError) -> Self {
        Self {
            success: false,
            token: None,
            error: Some(err.public_message()),
        }
    }
}

impl From<Result<String>> for AuthResponse {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(token) => Self::ok(token),
            Err(err) => Self::failed(&err),
        }
    }
}

/// Envelope for operations with no payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(err: &IdentityError) -> Self {
        Self {
            success: false,
            error: Some(err.public_message()),
        }
    }
}

impl From<Result<()>> for StatusResponse {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::failed(&err),
        }
    }
}
