/// Security module for authentication
///
/// Provides core security primitives for the identity core:
/// - Password hashing and verification (Argon2id)
/// - Session token minting and validation (HS512, typed claims)
/// - Token revocation (cache-backed blacklist)
pub mod password;
pub mod session;
pub mod token_revocation;

pub use password::{hash_password, verify_password};
pub use session::{extract_bearer, Role, SessionClaims, SessionIssuer};
pub use token_revocation::TokenRevocationStore;
