/// Verification notification consumers
///
/// One background task per channel pulls verification requests, issues a fresh
/// code for the identifier and hands it to that channel's deliverer:
/// 1. Delivered: the message is acked
/// 2. Failed: exponential backoff, then requeue with `attempt + 1`
/// 3. Out of attempts, or the payload can never succeed: dead-letter stream
///
/// Messages on one channel are handled strictly one at a time; channels run in
/// parallel because each has its own task.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::NotificationSettings;
use crate::error::IdentityError;
use crate::messaging::{Delivery, NotificationChannel, VerificationRequest};
use crate::services::delivery::{Deliverer, VerificationNotice};
use crate::services::verification_codes::{VerificationChannel, VerificationCodeStore};
use crate::validators::{validate_email, validate_phone};

#[derive(Debug, Clone)]
pub struct NotificationConsumerConfig {
    /// Channel (stream) name to drain
    pub channel: String,
    /// Which code namespace the channel issues into
    pub verification: VerificationChannel,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Pause after the channel itself fails before polling again
    pub error_pause: Duration,
}

impl NotificationConsumerConfig {
    pub fn email(settings: &NotificationSettings) -> Self {
        Self::from_settings(
            settings,
            settings.email_channel.clone(),
            VerificationChannel::Email,
        )
    }

    pub fn phone(settings: &NotificationSettings) -> Self {
        Self::from_settings(
            settings,
            settings.phone_channel.clone(),
            VerificationChannel::Phone,
        )
    }

    fn from_settings(
        settings: &NotificationSettings,
        channel: String,
        verification: VerificationChannel,
    ) -> Self {
        Self {
            channel,
            verification,
            max_attempts: settings.max_attempts.max(1),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            error_pause: Duration::from_secs(1),
        }
    }
}

/// Owner of a running consumer task.
///
/// Dropping the handle has the same effect as [`ConsumerHandle::shutdown`]
/// without waiting for the task to finish.
pub struct ConsumerHandle {
    channel: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the consumer to stop and wait for it.
    ///
    /// A message already in progress is finished and settled first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                error!(channel = %self.channel, error = %err, "Notification consumer panicked");
            }
        }
    }

    /// Stop immediately. An unsettled message stays with the channel and is
    /// delivered again later.
    pub fn abort(self) {
        self.handle.abort();
    }
}

/// Spawn background consumer task for one channel
pub fn spawn_notification_consumer(
    channel: Arc<dyn NotificationChannel>,
    codes: VerificationCodeStore,
    deliverer: Arc<dyn Deliverer>,
    config: NotificationConsumerConfig,
) -> ConsumerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let name = config.channel.clone();

    info!(
        channel = %config.channel,
        max_attempts = config.max_attempts,
        retry_backoff_ms = %config.retry_backoff.as_millis(),
        max_backoff_ms = %config.max_backoff.as_millis(),
        "Starting notification consumer"
    );

    let consumer = Consumer {
        channel,
        codes,
        deliverer,
        config,
    };
    let handle = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    ConsumerHandle {
        channel: name,
        shutdown_tx,
        handle,
    }
}

struct Consumer {
    channel: Arc<dyn NotificationChannel>,
    codes: VerificationCodeStore,
    deliverer: Arc<dyn Deliverer>,
    config: NotificationConsumerConfig,
}

impl Consumer {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = self.channel.receive(&self.config.channel) => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    let span = tracing::info_span!(
                        "notification",
                        channel = %delivery.channel,
                        message_id = %delivery.id,
                        attempt = delivery.attempt
                    );
                    self.process(delivery, &mut shutdown)
                        .instrument(span)
                        .await;
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        channel = %self.config.channel,
                        error = %err,
                        "Failed to receive from notification channel"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = sleep(self.config.error_pause) => {}
                    }
                }
            }
        }

        info!(channel = %self.config.channel, "Notification consumer stopped");
    }

    async fn process(&self, delivery: Delivery, shutdown: &mut watch::Receiver<bool>) {
        let outcome = match self.parse(&delivery) {
            Ok(request) => self.send(&request).await,
            Err(failure) => Err(failure),
        };

        let settled = match outcome {
            Ok(()) => {
                debug!("Verification code delivered");
                self.channel.ack(&delivery).await
            }
            Err(failure) => {
                let attempt_number = delivery.attempt.saturating_add(1);
                warn!(
                    error = %failure.message(),
                    reason = failure.reason(),
                    attempt = attempt_number,
                    "Verification delivery failed"
                );

                if failure.is_fatal() || attempt_number >= self.config.max_attempts {
                    self.channel
                        .dead_letter(&delivery, failure.message())
                        .await
                } else {
                    let backoff = calculate_backoff(
                        self.config.retry_backoff,
                        self.config.max_backoff,
                        delivery.attempt,
                    );
                    if backoff > Duration::ZERO {
                        debug!(
                            backoff_ms = %backoff.as_millis(),
                            attempt = attempt_number,
                            "Sleeping before requeueing verification request"
                        );
                        // A stop request cuts the wait short; the message is still requeued
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => {}
                            _ = sleep(backoff) => {}
                        }
                    }
                    self.channel.requeue(&delivery).await
                }
            }
        };

        if let Err(err) = settled {
            // Left unsettled; the channel hands it out again
            error!(error = %err, "Failed to settle verification request");
        }
    }

    fn parse(&self, delivery: &Delivery) -> Result<VerificationRequest, ProcessingFailure> {
        let request = delivery
            .decode()
            .map_err(|err| ProcessingFailure::new("payload_error", err.to_string()))?;

        let well_formed = match self.config.verification {
            VerificationChannel::Email => validate_email(&request.identifier),
            VerificationChannel::Phone => validate_phone(&request.identifier),
        };
        if !well_formed {
            return Err(ProcessingFailure::new(
                "invalid_identifier",
                format!("not a valid {} identifier", self.config.verification),
            ));
        }
        Ok(request)
    }

    async fn send(&self, request: &VerificationRequest) -> Result<(), ProcessingFailure> {
        let channel = self.config.verification;
        let code = self
            .codes
            .issue(channel, &request.identifier)
            .await
            .map_err(|err| ProcessingFailure::from_error("code_store_error", err))?;

        let notice = VerificationNotice {
            identifier: request.identifier.clone(),
            display_name: request.display_name.clone(),
            code,
            expires_in: self.codes.ttl(channel),
        };

        self.deliverer
            .deliver(&notice)
            .await
            .map_err(|err| ProcessingFailure::from_error("delivery_error", err))
    }
}

/// Delay before redelivering a message that has already failed `retry_count` times
fn calculate_backoff(base: Duration, max: Duration, retry_count: u32) -> Duration {
    let shift = retry_count.min(16);
    let multiplier = 1_u32 << shift;
    let backoff = base.saturating_mul(multiplier);
    if backoff > max {
        max
    } else {
        backoff
    }
}

struct ProcessingFailure {
    reason: &'static str,
    message: String,
    fatal: bool,
}

impl ProcessingFailure {
    fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            fatal: matches!(reason, "payload_error" | "invalid_identifier"),
        }
    }

    fn from_error(reason: &'static str, err: IdentityError) -> Self {
        Self {
            reason,
            fatal: !err.is_retryable(),
            message: err.to_string(),
        }
    }

    fn reason(&self) -> &'static str {
        self.reason
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }
}
