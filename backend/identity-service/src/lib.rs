/// Commerce Identity Library
///
/// Session tokens, ownership verification and the asynchronous delivery of
/// verification codes for the commerce backend.
///
/// ## Modules
///
/// - `cache`: Key-value cache (Redis, in-memory)
/// - `config`: Service configuration
/// - `db`: Profile repository (PostgreSQL, in-memory)
/// - `error`: Error types
/// - `messaging`: Verification notification channels (Redis Streams, in-memory)
/// - `models`: Request and response shapes
/// - `security`: Session tokens, password hashing, token revocation
/// - `services`: Identity flows, code stores, notification consumers, email/SMS
/// - `validators`: Input validation
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod messaging;
pub mod models;
pub mod security;
pub mod services;
pub mod validators;

// Re-export commonly used types
pub use error::{ErrorKind, IdentityError, Result};
pub use services::{AuthenticatedSession, IdentityService};
