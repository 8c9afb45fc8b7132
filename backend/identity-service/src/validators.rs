use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

/// Input validation utilities for the identity core

// Compile regex patterns once at startup
// These patterns are hardcoded and always valid, so we use expect() with explicit reasoning
// Local part: RFC 5322 atext plus dots. Domain: dotted labels ending in an alphabetic TLD.
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~.-]{1,64}@[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*\.[a-zA-Z]{2,}$"#,
    )
    .expect("hardcoded email regex is invalid - fix source code")
});

static E164_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+[1-9][0-9]{6,14}$").expect("hardcoded E.164 regex is invalid - fix source code")
});

/// Length of every one-time verification code.
pub const VERIFICATION_CODE_LENGTH: usize = 6;

/// Validate email format (RFC 5322 simplified)
///
/// This is the only email predicate: request DTOs go through
/// [`validate_email_validator`] and the notification consumer calls this
/// directly, so an address accepted at the edge is always deliverable.
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Validate phone number in E.164 format (`+` followed by 7 to 15 digits)
pub fn validate_phone(phone: &str) -> bool {
    E164_REGEX.is_match(phone)
}

/// Exactly six ASCII digits
pub fn validate_verification_code(code: &str) -> bool {
    code.len() == VERIFICATION_CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// validator crate compatible custom validator for email addresses
pub fn validate_email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(email) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email"))
    }
}

/// validator crate compatible custom validator for phone numbers
pub fn validate_phone_validator(phone: &str) -> Result<(), ValidationError> {
    if validate_phone(phone) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_phone_number"))
    }
}

/// validator crate compatible custom validator for verification codes
pub fn validate_code_validator(code: &str) -> Result<(), ValidationError> {
    if validate_verification_code(code) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_verification_code"))
    }
}

/// Mask phone number for logging
pub fn mask_phone(phone: &str) -> String {
    if phone.len() <= 4 {
        return "****".to_string();
    }
    let visible = &phone[phone.len() - 4..];
    format!("****{}", visible)
}

/// Mask email for logging, keeping the first character of the local part and the domain
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
