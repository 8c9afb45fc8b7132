/// Database operations for the identity core
pub mod memory;
pub mod profiles;

pub use memory::InMemoryProfileRepository;
pub use profiles::{
    CredentialRecord, Identifier, LoginAttempt, NewLoginAttempt, NewProfile, PgProfileRepository,
    Profile, ProfileRepository,
};
