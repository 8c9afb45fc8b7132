use serde::Deserialize;
use validator::Validate;

/// Profile registration request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(custom(function = "crate::validators::validate_email_validator"))]
    pub email: String,
    #[validate(custom(function = "crate::validators::validate_phone_validator"))]
    pub phone_number: String,
    /// Length only, 6 to 500 characters; no composition rules
    #[validate(length(min = 6, max = 500))]
    pub password: String,
}

/// Login by email
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(custom(function = "crate::validators::validate_email_validator"))]
    pub email: String,
    #[validate(length(min = 1, max = 500))]
    pub password: String,
}

/// Password change for an authenticated profile
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, max = 500))]
    pub current_password: String,
    #[validate(length(min = 6, max = 500))]
    pub new_password: String,
    #[validate(must_match(other = "new_password"))]
    pub confirm_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailRequest {
    #[validate(custom(function = "crate::validators::validate_email_validator"))]
    pub new_email: String,
}

/// A submitted verification code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyCodeRequest {
    #[validate(custom(function = "crate::validators::validate_code_validator"))]
    pub code: String,
}

/// Where a sign-in came from, as reported by the transport layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Request for a password reset token
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(custom(function = "crate::validators::validate_email_validator"))]
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(password: &str, phone: &str) -> RegisterRequest {
        RegisterRequest {
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            email: "a@x.com".into(),
            phone_number: phone.into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_register_accepts_short_plain_password() {
        assert!(register("secret1", "+15550001").validate().is_ok());
    }

    #[test]
    fn test_register_password_length_bounds() {
        assert!(register("abc12", "+15550001").validate().is_err());
        assert!(register(&"a".repeat(500), "+15550001").validate().is_ok());
        assert!(register(&"a".repeat(501), "+15550001").validate().is_err());
    }

    #[test]
    fn test_register_rejects_bad_phone_and_email() {
        assert!(register("secret1", "5550001").validate().is_err());

        let mut req = register("secret1", "+15550001");
        req.email = "not-an-email".into();
        assert!(req.validate().is_err());

        // Single-label domains cannot be delivered to
        req.email = "ann@localhost".into();
        assert!(req.validate().is_err());

        req.email = "o'brien@example.com".into();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_every_email_field_uses_the_same_rule() {
        let login = LoginRequest {
            email: "ann@localhost".into(),
            password: "secret1".into(),
        };
        assert!(login.validate().is_err());

        let change = ChangeEmailRequest {
            new_email: "ann@localhost".into(),
        };
        assert!(change.validate().is_err());

        let forgot = ForgotPasswordRequest {
            email: "o'brien@example.com".into(),
        };
        assert!(forgot.validate().is_ok());
    }

    #[test]
    fn test_change_password_requires_confirmation_match() {
        let req = ChangePasswordRequest {
            current_password: "secret1".into(),
            new_password: "secret2".into(),
            confirm_password: "secret3".into(),
        };
        assert!(req.validate().is_err());

        let req = ChangePasswordRequest {
            confirm_password: "secret2".into(),
            ..req
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_verify_code_shape() {
        assert!(VerifyCodeRequest { code: "012345".into() }.validate().is_ok());
        assert!(VerifyCodeRequest { code: "12345".into() }.validate().is_err());
        assert!(VerifyCodeRequest { code: "12a456".into() }.validate().is_err());
    }

    #[test]
    fn test_register_deserializes_camel_case() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"firstName":"Ann","lastName":"Lee","email":"a@x.com","phoneNumber":"+15550001","password":"secret1"}"#,
        )
        .unwrap();
        assert_eq!(req.phone_number, "+15550001");
    }
}
