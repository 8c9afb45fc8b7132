use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::profiles::{
    CredentialRecord, Identifier, LoginAttempt, NewLoginAttempt, NewProfile, Profile,
    ProfileRepository,
};
use crate::error::{IdentityError, Result};

#[derive(Debug, Clone)]
struct StoredProfile {
    profile: Profile,
    password_hash: String,
}

/// In-process [`ProfileRepository`] for tests and local runs.
///
/// Email and phone indexes are claimed through the map entry API, so two
/// concurrent creates for the same identifier cannot both succeed.
#[derive(Clone, Default)]
pub struct InMemoryProfileRepository {
    profiles: Arc<DashMap<Uuid, StoredProfile>>,
    emails: Arc<DashMap<String, Uuid>>,
    phones: Arc<DashMap<String, Uuid>>,
    attempts: Arc<DashMap<Uuid, Vec<LoginAttempt>>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Stored hash, for asserting on password changes
    pub fn password_hash(&self, id: Uuid) -> Option<String> {
        self.profiles.get(&id).map(|p| p.password_hash.clone())
    }

    fn resolve(&self, identifier: &Identifier) -> Option<Uuid> {
        match identifier {
            Identifier::Id(id) => self.profiles.contains_key(id).then_some(*id),
            Identifier::Email(email) => self.emails.get(email).map(|id| *id),
            Identifier::Phone(phone) => self.phones.get(phone).map(|id| *id),
        }
    }

    fn update<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut StoredProfile),
    {
        let mut stored = self
            .profiles
            .get_mut(&id)
            .ok_or(IdentityError::UserNotFound)?;
        apply(&mut stored);
        stored.profile.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn create_profile(&self, new: NewProfile) -> Result<Profile> {
        let id = Uuid::new_v4();

        match self.emails.entry(new.email.clone()) {
            Entry::Occupied(_) => return Err(IdentityError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        match self.phones.entry(new.phone_number.clone()) {
            Entry::Occupied(_) => {
                self.emails.remove(&new.email);
                return Err(IdentityError::PhoneAlreadyExists);
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let now = Utc::now();
        let profile = Profile {
            id,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone_number: new.phone_number,
            role: new.role,
            email_verified: false,
            phone_verified: false,
            created_at: now,
            updated_at: now,
        };
        self.profiles.insert(
            id,
            StoredProfile {
                profile: profile.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(profile)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(self.profiles.get(&id).map(|p| p.profile.clone()))
    }

    async fn get_by_identifier(&self, identifier: &Identifier) -> Result<Option<Profile>> {
        match self.resolve(identifier) {
            Some(id) => self.get_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn get_credentials(&self, identifier: &Identifier) -> Result<Option<CredentialRecord>> {
        Ok(self.resolve(identifier).and_then(|id| {
            self.profiles.get(&id).map(|p| CredentialRecord {
                id,
                role: p.profile.role,
                password_hash: p.password_hash.clone(),
            })
        }))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.update(id, |stored| {
            stored.password_hash = password_hash.to_string();
        })
    }

    async fn update_email(&self, id: Uuid, email: &str) -> Result<()> {
        let current = self
            .profiles
            .get(&id)
            .map(|p| p.profile.email.clone())
            .ok_or(IdentityError::UserNotFound)?;

        match self.emails.entry(email.to_string()) {
            Entry::Occupied(owner) if *owner.get() != id => {
                return Err(IdentityError::EmailAlreadyExists)
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        if current != email {
            self.emails.remove(&current);
        }

        self.update(id, |stored| {
            stored.profile.email = email.to_string();
            stored.profile.email_verified = false;
        })
    }

    async fn set_email_verified(&self, id: Uuid) -> Result<()> {
        self.update(id, |stored| stored.profile.email_verified = true)
    }

    async fn set_phone_verified(&self, id: Uuid) -> Result<()> {
        self.update(id, |stored| stored.profile.phone_verified = true)
    }

    async fn exists_by_identifier(&self, identifier: &Identifier) -> Result<bool> {
        Ok(self.resolve(identifier).is_some())
    }

    async fn add_login_attempt(&self, attempt: NewLoginAttempt) -> Result<()> {
        if !self.profiles.contains_key(&attempt.profile_id) {
            return Err(IdentityError::UserNotFound);
        }
        self.attempts
            .entry(attempt.profile_id)
            .or_default()
            .push(LoginAttempt {
                id: Uuid::new_v4(),
                profile_id: attempt.profile_id,
                ip_address: attempt.ip_address,
                user_agent: attempt.user_agent,
                success: attempt.success,
                attempted_at: Utc::now(),
            });
        Ok(())
    }

    async fn recent_login_attempts(&self, id: Uuid, limit: u32) -> Result<Vec<LoginAttempt>> {
        Ok(self
            .attempts
            .get(&id)
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
