// Shared in-process harness for the integration tests.
//
// Everything runs against the in-memory cache, channel and profile repository,
// so no PostgreSQL or Redis is needed.
#![allow(dead_code)]

use async_trait::async_trait;
use commerce_identity::cache::{KeyValueCache, MemoryCache};
use commerce_identity::config::VerificationSettings;
use commerce_identity::db::InMemoryProfileRepository;
use commerce_identity::error::{IdentityError, Result};
use commerce_identity::messaging::{MemoryChannel, NotificationChannel};
use commerce_identity::models::{ClientContext, RegisterRequest};
use commerce_identity::security::{SessionIssuer, TokenRevocationStore};
use commerce_identity::services::{
    spawn_notification_consumer, ConsumerHandle, Deliverer, IdentityService,
    NotificationConsumerConfig, NotificationRoutes, PasswordResetStore, VerificationChannel,
    VerificationCodeStore, VerificationNotice,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET: &[u8] = b"integration-test-secret-that-is-long-enough";

pub struct Harness {
    pub service: IdentityService,
    pub cache: MemoryCache,
    pub channel: MemoryChannel,
    pub profiles: InMemoryProfileRepository,
    pub codes: VerificationCodeStore,
}

impl Harness {
    pub fn new() -> Self {
        let cache = MemoryCache::new();
        let channel = MemoryChannel::new(Duration::from_millis(20));
        let profiles = InMemoryProfileRepository::new();

        let shared: Arc<dyn KeyValueCache> = Arc::new(cache.clone());
        let codes = VerificationCodeStore::new(shared.clone(), &VerificationSettings::default());

        let service = IdentityService::new(
            Arc::new(profiles.clone()),
            SessionIssuer::new(SECRET, chrono::Duration::hours(72)).unwrap(),
            TokenRevocationStore::new(shared.clone()),
            codes.clone(),
            PasswordResetStore::new(shared, 3600),
            Arc::new(channel.clone()),
            NotificationRoutes::default(),
        );

        Self {
            service,
            cache,
            channel,
            profiles,
            codes,
        }
    }

    pub fn spawn_consumer(
        &self,
        verification: VerificationChannel,
        deliverer: Arc<dyn Deliverer>,
        max_attempts: u32,
    ) -> ConsumerHandle {
        let channel: Arc<dyn NotificationChannel> = Arc::new(self.channel.clone());
        spawn_notification_consumer(
            channel,
            self.codes.clone(),
            deliverer,
            consumer_config(verification, max_attempts),
        )
    }
}

/// Caller details every test sign-in reports
pub fn client() -> ClientContext {
    ClientContext::new("203.0.113.7", "Mozilla/5.0 (X11; Linux x86_64)")
}

pub fn consumer_config(
    verification: VerificationChannel,
    max_attempts: u32,
) -> NotificationConsumerConfig {
    let channel = match verification {
        VerificationChannel::Email => "email-verification",
        VerificationChannel::Phone => "phone-verification",
    };
    NotificationConsumerConfig {
        channel: channel.to_string(),
        verification,
        max_attempts,
        retry_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        error_pause: Duration::from_millis(10),
    }
}

pub fn register_request(email: &str, phone: &str) -> RegisterRequest {
    RegisterRequest {
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        email: email.into(),
        phone_number: phone.into(),
        password: "secret1".into(),
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Deliverer that records every notice and fails the first `fail_first` calls
#[derive(Default)]
pub struct RecordingDeliverer {
    delivered: Mutex<Vec<VerificationNotice>>,
    calls: AtomicU32,
    fail_first: u32,
    delay: Duration,
}

impl RecordingDeliverer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<VerificationNotice> {
        self.delivered.lock().unwrap().clone()
    }

    /// Poll until `count` notices went out, or give up after five seconds
    pub async fn wait_for(&self, count: usize) -> Vec<VerificationNotice> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let delivered = self.delivered();
            if delivered.len() >= count || tokio::time::Instant::now() >= deadline {
                return delivered;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    async fn deliver(&self, notice: &VerificationNotice) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.fail_first {
            return Err(IdentityError::Delivery("smtp: 451 try again later".into()));
        }
        self.delivered.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Poll `check` until it holds, or give up after five seconds
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
