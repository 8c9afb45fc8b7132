/// Identity orchestration
///
/// Registration, login and logout, credential changes, ownership verification
/// of email and phone, and request authentication. Each flow touches the
/// profile store, the shared cache and the notification channel in a fixed
/// order; none of them hold in-process locks.
///
/// Verification codes are never produced on the request path. Register and
/// the resend flows publish a request and the notification consumers issue
/// and deliver the code.
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::NotificationSettings;
use crate::db::{
    Identifier, LoginAttempt, NewLoginAttempt, NewProfile, Profile, ProfileRepository,
};
use crate::error::{IdentityError, Result};
use crate::messaging::{
    NotificationChannel, VerificationRequest, EMAIL_VERIFICATION_CHANNEL,
    PHONE_VERIFICATION_CHANNEL,
};
use crate::models::{
    ChangeEmailRequest, ChangePasswordRequest, ClientContext, ForgotPasswordRequest, LoginRequest,
    RegisterRequest, VerifyCodeRequest,
};
use crate::security::{
    extract_bearer, hash_password, verify_password, Role, SessionClaims, SessionIssuer,
    TokenRevocationStore,
};
use crate::services::password_reset::PasswordResetStore;
use crate::services::verification_codes::{CodeCheck, VerificationChannel, VerificationCodeStore};
use crate::validators::{mask_email, mask_phone};

/// Channel names verification requests are published to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRoutes {
    pub email: String,
    pub phone: String,
}

impl Default for NotificationRoutes {
    fn default() -> Self {
        Self {
            email: EMAIL_VERIFICATION_CHANNEL.to_string(),
            phone: PHONE_VERIFICATION_CHANNEL.to_string(),
        }
    }
}

impl NotificationRoutes {
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        Self {
            email: settings.email_channel.clone(),
            phone: settings.phone_channel.clone(),
        }
    }
}

/// A request that presented a valid, unrevoked session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub token: String,
    pub claims: SessionClaims,
}

impl AuthenticatedSession {
    pub fn user_id(&self) -> Uuid {
        self.claims.user_id()
    }

    pub fn role(&self) -> Role {
        self.claims.role
    }
}

/// A stored password reset token, handed to whatever sends the reset link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetTicket {
    pub email: String,
    pub token: String,
    pub expires_in: Duration,
}

#[derive(Clone)]
pub struct IdentityService {
    profiles: Arc<dyn ProfileRepository>,
    sessions: SessionIssuer,
    revocations: TokenRevocationStore,
    codes: VerificationCodeStore,
    resets: PasswordResetStore,
    notifications: Arc<dyn NotificationChannel>,
    routes: NotificationRoutes,
}

impl IdentityService {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        sessions: SessionIssuer,
        revocations: TokenRevocationStore,
        codes: VerificationCodeStore,
        resets: PasswordResetStore,
        notifications: Arc<dyn NotificationChannel>,
        routes: NotificationRoutes,
    ) -> Self {
        Self {
            profiles,
            sessions,
            revocations,
            codes,
            resets,
            notifications,
            routes,
        }
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// Create a profile and return its first session token.
    ///
    /// The email verification request is published after the profile is
    /// committed. A failed publish is logged and the registration still
    /// succeeds; the user recovers through `resend_email_verification`.
    /// The first sign-in is recorded in the profile's login history.
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientContext,
    ) -> Result<String> {
        request.validate()?;

        if self
            .profiles
            .exists_by_identifier(&Identifier::Email(request.email.clone()))
            .await?
        {
            return Err(IdentityError::EmailAlreadyExists);
        }
        if self
            .profiles
            .exists_by_identifier(&Identifier::Phone(request.phone_number.clone()))
            .await?
        {
            return Err(IdentityError::PhoneAlreadyExists);
        }

        let password_hash = hash_password(&request.password)?;

        // A concurrent register can still win the race here; the store's
        // unique constraints turn that into the same conflict errors.
        let profile = self
            .profiles
            .create_profile(NewProfile {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                phone_number: request.phone_number,
                role: Role::User,
                password_hash,
            })
            .await?;

        let token = self.sessions.mint(profile.id, profile.role.as_str())?;
        self.record_login(profile.id, client, true).await;

        info!(
            user_id = %profile.id,
            email = %mask_email(&profile.email),
            "Profile registered"
        );

        let message = VerificationRequest::email(&profile.email, &profile.first_name);
        if let Err(e) = self
            .notifications
            .publish(&self.routes.email, &message)
            .await
        {
            warn!(
                user_id = %profile.id,
                channel = %self.routes.email,
                error = %e,
                "Failed to publish email verification request"
            );
        }

        Ok(token)
    }

    /// Exchange email and password for a session token.
    ///
    /// An unknown email and a wrong password are indistinguishable to the caller.
    /// Attempts against a known profile are recorded in its login history,
    /// failed ones included.
    pub async fn login(&self, request: LoginRequest, client: &ClientContext) -> Result<String> {
        request.validate()?;

        let Some(credentials) = self
            .profiles
            .get_credentials(&Identifier::Email(request.email.clone()))
            .await?
        else {
            debug!(email = %mask_email(&request.email), "Login for unknown email");
            return Err(IdentityError::InvalidCredentials);
        };

        if !verify_password(&request.password, &credentials.password_hash)? {
            debug!(user_id = %credentials.id, "Login with wrong password");
            self.record_login(credentials.id, client, false).await;
            return Err(IdentityError::InvalidCredentials);
        }

        let token = self
            .sessions
            .mint(credentials.id, credentials.role.as_str())?;
        self.record_login(credentials.id, client, true).await;
        info!(user_id = %credentials.id, "User logged in");
        Ok(token)
    }

    /// Most recent sign-ins of the authenticated profile, newest first.
    pub async fn login_history(
        &self,
        session: &AuthenticatedSession,
        limit: u32,
    ) -> Result<Vec<LoginAttempt>> {
        self.profiles
            .recent_login_attempts(session.user_id(), limit)
            .await
    }

    /// Revoke the presented token until it would have expired anyway.
    ///
    /// A cache failure is returned so the client can retry the logout.
    pub async fn logout(&self, session: &AuthenticatedSession) -> Result<()> {
        let remaining = session.claims.remaining_ttl(Utc::now());
        self.revocations.revoke(&session.token, remaining).await?;

        info!(user_id = %session.user_id(), "User logged out");
        Ok(())
    }

    /// Replace the password and swap the presented token for a new one.
    pub async fn change_password(
        &self,
        session: &AuthenticatedSession,
        request: ChangePasswordRequest,
    ) -> Result<String> {
        request.validate()?;
        let user_id = session.user_id();

        let credentials = self
            .profiles
            .get_credentials(&Identifier::Id(user_id))
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        if !verify_password(&request.current_password, &credentials.password_hash)? {
            return Err(IdentityError::InvalidPassword);
        }
        if request.new_password == request.current_password {
            return Err(IdentityError::SamePassword);
        }

        let password_hash = hash_password(&request.new_password)?;
        self.profiles
            .update_password_hash(user_id, &password_hash)
            .await?;

        self.revoke_best_effort(session).await;
        let token = self.sessions.mint(user_id, credentials.role.as_str())?;

        info!(user_id = %user_id, "Password changed");
        Ok(token)
    }

    /// Move the profile to a new email, which starts out unverified.
    ///
    /// No verification request is published here; the user asks for one
    /// through `resend_email_verification`.
    pub async fn change_email(
        &self,
        session: &AuthenticatedSession,
        request: ChangeEmailRequest,
    ) -> Result<String> {
        request.validate()?;
        let user_id = session.user_id();
        let profile = self.require_profile(user_id).await?;

        if profile.email == request.new_email {
            return Err(IdentityError::SameEmail);
        }
        if self
            .profiles
            .exists_by_identifier(&Identifier::Email(request.new_email.clone()))
            .await?
        {
            return Err(IdentityError::EmailAlreadyExists);
        }

        self.profiles
            .update_email(user_id, &request.new_email)
            .await?;

        self.revoke_best_effort(session).await;
        let token = self.sessions.mint(user_id, profile.role.as_str())?;

        info!(
            user_id = %user_id,
            email = %mask_email(&request.new_email),
            "Email changed"
        );
        Ok(token)
    }

    pub async fn verify_email(&self, user_id: Uuid, request: VerifyCodeRequest) -> Result<()> {
        request.validate()?;
        let profile = self.require_profile(user_id).await?;
        if profile.email_verified {
            return Err(IdentityError::EmailAlreadyVerified);
        }

        self.redeem_code(VerificationChannel::Email, &profile.email, &request.code)
            .await?;
        self.profiles.set_email_verified(user_id).await?;
        self.discard_code(VerificationChannel::Email, &profile.email)
            .await;

        info!(user_id = %user_id, "Email verified");
        Ok(())
    }

    pub async fn verify_phone(&self, user_id: Uuid, request: VerifyCodeRequest) -> Result<()> {
        request.validate()?;
        let profile = self.require_profile(user_id).await?;
        if profile.phone_verified {
            return Err(IdentityError::PhoneAlreadyVerified);
        }

        self.redeem_code(
            VerificationChannel::Phone,
            &profile.phone_number,
            &request.code,
        )
        .await?;
        self.profiles.set_phone_verified(user_id).await?;
        self.discard_code(VerificationChannel::Phone, &profile.phone_number)
            .await;

        info!(user_id = %user_id, "Phone number verified");
        Ok(())
    }

    /// Queue a fresh email code. Unlike register, a publish failure is returned.
    pub async fn resend_email_verification(&self, user_id: Uuid) -> Result<()> {
        let profile = self.require_profile(user_id).await?;
        if profile.email_verified {
            return Err(IdentityError::EmailAlreadyVerified);
        }

        self.notifications
            .publish(
                &self.routes.email,
                &VerificationRequest::email(&profile.email, &profile.first_name),
            )
            .await?;

        info!(
            user_id = %user_id,
            email = %mask_email(&profile.email),
            "Email verification requested"
        );
        Ok(())
    }

    /// Queue a fresh SMS code. A publish failure is returned.
    pub async fn resend_phone_verification(&self, user_id: Uuid) -> Result<()> {
        let profile = self.require_profile(user_id).await?;
        if profile.phone_verified {
            return Err(IdentityError::PhoneAlreadyVerified);
        }

        self.notifications
            .publish(
                &self.routes.phone,
                &VerificationRequest::phone(&profile.phone_number),
            )
            .await?;

        info!(
            user_id = %user_id,
            phone = %mask_phone(&profile.phone_number),
            "Phone verification requested"
        );
        Ok(())
    }

    /// Resolve an `Authorization` header into a session.
    ///
    /// If the revocation check cannot be answered the request is refused with
    /// `StoreUnavailable` rather than let through.
    pub async fn authenticate(&self, authorization: &str) -> Result<AuthenticatedSession> {
        let token = extract_bearer(authorization)?;
        let claims = self.sessions.parse(token)?;

        if self.revocations.is_revoked(token).await? {
            debug!(user_id = %claims.sub, "Revoked token presented");
            return Err(IdentityError::Unauthorized);
        }

        Ok(AuthenticatedSession {
            token: token.to_string(),
            claims,
        })
    }

    /// Gate for operations that need a verified email address
    pub async fn ensure_email_verified(&self, user_id: Uuid) -> Result<()> {
        let profile = self.require_profile(user_id).await?;
        if !profile.email_verified {
            return Err(IdentityError::EmailNotVerified);
        }
        Ok(())
    }

    /// Generate and store a reset token for the requested email.
    ///
    /// Returns `None` for an email no profile uses so callers can answer the
    /// same way in both cases.
    pub async fn forgot_password(
        &self,
        request: ForgotPasswordRequest,
    ) -> Result<Option<PasswordResetTicket>> {
        request.validate()?;
        let email = request.email.as_str();

        if !self
            .profiles
            .exists_by_identifier(&Identifier::Email(email.to_string()))
            .await?
        {
            debug!(email = %mask_email(email), "Password reset for unknown email");
            return Ok(None);
        }

        let token = self.resets.issue(email).await?;
        info!(email = %mask_email(email), "Password reset token issued");

        Ok(Some(PasswordResetTicket {
            email: email.to_string(),
            token,
            expires_in: self.resets.ttl(),
        }))
    }

    // History is an audit trail; losing an entry never fails the sign-in
    async fn record_login(&self, profile_id: Uuid, client: &ClientContext, success: bool) {
        let attempt = NewLoginAttempt::from_client(profile_id, client, success);
        if let Err(e) = self.profiles.add_login_attempt(attempt).await {
            warn!(
                user_id = %profile_id,
                success,
                error = %e,
                "Failed to record login attempt"
            );
        }
    }

    async fn require_profile(&self, user_id: Uuid) -> Result<Profile> {
        self.profiles
            .get_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)
    }

    async fn redeem_code(
        &self,
        channel: VerificationChannel,
        identifier: &str,
        candidate: &str,
    ) -> Result<()> {
        match self.codes.check(channel, identifier, candidate).await? {
            CodeCheck::Matched => Ok(()),
            CodeCheck::Mismatch => Err(IdentityError::InvalidVerificationCode),
            CodeCheck::NotFound => Err(IdentityError::VerificationCodeNotFound),
        }
    }

    // The flag is already set; a code left behind expires on its own
    async fn discard_code(&self, channel: VerificationChannel, identifier: &str) {
        if let Err(e) = self.codes.consume(channel, identifier).await {
            warn!(channel = %channel, error = %e, "Failed to delete redeemed verification code");
        }
    }

    // The replacement token is minted regardless; the old one still dies at exp
    async fn revoke_best_effort(&self, session: &AuthenticatedSession) {
        let remaining = session.claims.remaining_ttl(Utc::now());
        if let Err(e) = self.revocations.revoke(&session.token, remaining).await {
            warn!(
                user_id = %session.user_id(),
                error = %e,
                "Failed to revoke previous session token"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::VerificationSettings;
    use crate::db::profiles::MockProfileRepository;
    use crate::db::InMemoryProfileRepository;
    use crate::messaging::MemoryChannel;

    const SECRET: &[u8] = b"unit-test-session-secret-of-32-bytes-or-more";

    struct Harness {
        service: IdentityService,
        cache: MemoryCache,
        channel: MemoryChannel,
    }

    fn harness_with(profiles: Arc<dyn ProfileRepository>) -> Harness {
        let cache = MemoryCache::new();
        let channel = MemoryChannel::default();
        let shared: Arc<dyn crate::cache::KeyValueCache> = Arc::new(cache.clone());
        let service = IdentityService::new(
            profiles,
            SessionIssuer::new(SECRET, chrono::Duration::hours(72)).unwrap(),
            TokenRevocationStore::new(shared.clone()),
            VerificationCodeStore::new(shared.clone(), &VerificationSettings::default()),
            PasswordResetStore::new(shared, 3600),
            Arc::new(channel.clone()),
            NotificationRoutes::default(),
        );
        Harness {
            service,
            cache,
            channel,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryProfileRepository::new()))
    }

    fn register_request(email: &str, phone: &str) -> RegisterRequest {
        RegisterRequest {
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            email: email.into(),
            phone_number: phone.into(),
            password: "secret1".into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_writes_nothing() {
        let mut repo = MockProfileRepository::new();
        repo.expect_exists_by_identifier()
            .withf(|id| matches!(id, Identifier::Email(_)))
            .times(1)
            .returning(|_| Ok(true));
        repo.expect_create_profile().never();
        repo.expect_add_login_attempt().never();

        let h = harness_with(Arc::new(repo));
        let result = h
            .service
            .register(register_request("a@x.com", "+15550001"), &ClientContext::default())
            .await;

        assert!(matches!(result, Err(IdentityError::EmailAlreadyExists)));
        assert_eq!(h.channel.queued(EMAIL_VERIFICATION_CHANNEL), 0);
    }

    #[tokio::test]
    async fn test_register_survives_publish_failure() {
        let h = harness();
        h.channel.set_unavailable(true);

        let token = h
            .service
            .register(register_request("a@x.com", "+15550001"), &ClientContext::default())
            .await
            .unwrap();
        assert!(h.service.sessions().parse(&token).is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_fails_closed_when_cache_down() {
        let h = harness();
        let token = h
            .service
            .register(register_request("a@x.com", "+15550001"), &ClientContext::default())
            .await
            .unwrap();

        h.cache.set_unavailable(true);
        let result = h.service.authenticate(&format!("Bearer {}", token)).await;
        assert!(matches!(result, Err(IdentityError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_logout_surfaces_cache_failure() {
        let h = harness();
        let token = h
            .service
            .register(register_request("a@x.com", "+15550001"), &ClientContext::default())
            .await
            .unwrap();
        let session = h
            .service
            .authenticate(&format!("Bearer {}", token))
            .await
            .unwrap();

        h.cache.set_unavailable(true);
        assert!(matches!(
            h.service.logout(&session).await,
            Err(IdentityError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password_survives_revocation_failure() {
        let h = harness();
        let token = h
            .service
            .register(register_request("a@x.com", "+15550001"), &ClientContext::default())
            .await
            .unwrap();
        let session = h
            .service
            .authenticate(&format!("Bearer {}", token))
            .await
            .unwrap();

        h.cache.set_unavailable(true);
        let replacement = h
            .service
            .change_password(
                &session,
                ChangePasswordRequest {
                    current_password: "secret1".into(),
                    new_password: "secret2".into(),
                    confirm_password: "secret2".into(),
                },
            )
            .await
            .unwrap();

        let claims = h.service.sessions().parse(&replacement).unwrap();
        assert_eq!(claims.sub, session.user_id());
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthorized() {
        let h = harness();
        for header in ["", "Bearer ", "Basic abc", "Bearer not-a-jwt"] {
            assert!(matches!(
                h.service.authenticate(header).await,
                Err(IdentityError::Unauthorized)
            ));
        }
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_email_issues_nothing() {
        let h = harness();
        let request = ForgotPasswordRequest {
            email: "nobody@x.com".into(),
        };
        let ticket = h.service.forgot_password(request).await.unwrap();
        assert!(ticket.is_none());
        assert!(h.cache.ttl("forgot-password:nobody@x.com").is_none());
    }

    #[tokio::test]
    async fn test_forgot_password_validates_email() {
        let h = harness();
        let request = ForgotPasswordRequest {
            email: "not-an-email".into(),
        };
        let result = h.service.forgot_password(request).await;
        assert!(matches!(result, Err(IdentityError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_survives_history_failure() {
        let mut repo = MockProfileRepository::new();
        repo.expect_exists_by_identifier().returning(|_| Ok(false));
        repo.expect_create_profile().times(1).returning(|new| {
            let now = Utc::now();
            Ok(Profile {
                id: Uuid::new_v4(),
                first_name: new.first_name,
                last_name: new.last_name,
                email: new.email,
                phone_number: new.phone_number,
                role: new.role,
                email_verified: false,
                phone_verified: false,
                created_at: now,
                updated_at: now,
            })
        });
        repo.expect_add_login_attempt()
            .withf(|attempt| attempt.success)
            .times(1)
            .returning(|_| {
                Err(IdentityError::StoreUnavailable(
                    "database: operation timed out".to_string(),
                ))
            });

        let h = harness_with(Arc::new(repo));
        let token = h
            .service
            .register(
                register_request("a@x.com", "+15550001"),
                &ClientContext::new("203.0.113.7", "curl/8.0"),
            )
            .await
            .unwrap();
        assert!(h.service.sessions().parse(&token).is_ok());
    }
}
