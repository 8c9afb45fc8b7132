/// Service layer for the identity core
///
/// - Identity orchestration (register, login, credential changes, verification)
/// - Verification code and password reset token stores
/// - Notification consumers and the email/SMS delivery adapters
pub mod delivery;
pub mod email;
pub mod identity;
pub mod notification_consumer;
pub mod password_reset;
pub mod sms;
pub mod verification_codes;

pub use delivery::{Deliverer, VerificationNotice};
pub use email::EmailService;
pub use identity::{
    AuthenticatedSession, IdentityService, NotificationRoutes, PasswordResetTicket,
};
pub use notification_consumer::{
    spawn_notification_consumer, ConsumerHandle, NotificationConsumerConfig,
};
pub use password_reset::PasswordResetStore;
pub use sms::SmsService;
pub use verification_codes::{CodeCheck, VerificationChannel, VerificationCodeStore};
