// Integration tests for the verification notification pipeline
//
// These tests run real consumer tasks against the in-memory channel:
// - Retry with backoff until delivery succeeds
// - Dead-lettering after the attempt budget, and for malformed payloads
// - Independent progress of the email and phone channels
// - Graceful shutdown and abort
//
//   cargo test --test notification_pipeline_test

mod common;

use commerce_identity::messaging::{NotificationChannel, VerificationRequest};
use commerce_identity::services::{CodeCheck, VerificationChannel};
use common::{eventually, Harness, RecordingDeliverer};
use std::time::Duration;

const EMAIL_CHANNEL: &str = "email-verification";
const PHONE_CHANNEL: &str = "phone-verification";

#[tokio::test]
async fn test_transient_failures_are_retried_until_delivered() {
    let h = Harness::new();
    let deliverer = RecordingDeliverer::failing(2);
    let consumer = h.spawn_consumer(VerificationChannel::Email, deliverer.clone(), 5);

    h.channel
        .publish(EMAIL_CHANNEL, &VerificationRequest::email("a@x.com", "Ann"))
        .await
        .unwrap();

    let delivered = deliverer.wait_for(1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(deliverer.calls(), 3);
    assert!(h.channel.dead_letters().is_empty());

    // The delivered code is the one in the store
    let check = h
        .codes
        .check(VerificationChannel::Email, "a@x.com", &delivered[0].code)
        .await
        .unwrap();
    assert_eq!(check, CodeCheck::Matched);

    assert!(eventually(|| h.channel.in_flight() == 0).await);
    consumer.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_attempts_go_to_dead_letter() {
    let h = Harness::new();
    let deliverer = RecordingDeliverer::failing(u32::MAX);
    let consumer = h.spawn_consumer(VerificationChannel::Phone, deliverer.clone(), 3);

    h.channel
        .publish(PHONE_CHANNEL, &VerificationRequest::phone("+15550001"))
        .await
        .unwrap();

    assert!(eventually(|| h.channel.dead_letters().len() == 1).await);
    let dead = h.channel.dead_letters();
    assert_eq!(dead[0].delivery.attempt, 2);
    assert_eq!(
        dead[0].delivery.decode().unwrap(),
        VerificationRequest::phone("+15550001")
    );
    assert!(dead[0].reason.contains("Delivery failed"));
    assert_eq!(deliverer.calls(), 3);
    assert_eq!(h.channel.queued(PHONE_CHANNEL), 0);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dead_lettered_immediately() {
    let h = Harness::new();
    let deliverer = RecordingDeliverer::new();
    let consumer = h.spawn_consumer(VerificationChannel::Email, deliverer.clone(), 5);

    h.channel.publish_raw(EMAIL_CHANNEL, "{not json").unwrap();
    h.channel
        .publish(EMAIL_CHANNEL, &VerificationRequest::email("not-an-email", "Ann"))
        .await
        .unwrap();

    assert!(eventually(|| h.channel.dead_letters().len() == 2).await);
    let dead = h.channel.dead_letters();
    assert!(dead.iter().all(|d| d.delivery.attempt == 0));
    assert_eq!(deliverer.calls(), 0);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_slow_email_delivery_does_not_stall_phone_channel() {
    let h = Harness::new();
    let slow_email = RecordingDeliverer::slow(Duration::from_secs(2));
    let phone = RecordingDeliverer::new();
    let email_consumer = h.spawn_consumer(VerificationChannel::Email, slow_email.clone(), 5);
    let phone_consumer = h.spawn_consumer(VerificationChannel::Phone, phone.clone(), 5);

    h.channel
        .publish(EMAIL_CHANNEL, &VerificationRequest::email("a@x.com", "Ann"))
        .await
        .unwrap();
    assert!(eventually(|| slow_email.calls() == 1).await);

    h.channel
        .publish(PHONE_CHANNEL, &VerificationRequest::phone("+15550001"))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let delivered = phone.wait_for(1).await;
    assert_eq!(delivered.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(slow_email.delivered().is_empty());

    phone_consumer.shutdown().await;
    email_consumer.abort();
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_message() {
    let h = Harness::new();
    let deliverer = RecordingDeliverer::slow(Duration::from_millis(200));
    let consumer = h.spawn_consumer(VerificationChannel::Email, deliverer.clone(), 5);

    h.channel
        .publish(EMAIL_CHANNEL, &VerificationRequest::email("a@x.com", "Ann"))
        .await
        .unwrap();
    assert!(eventually(|| deliverer.calls() == 1).await);

    consumer.shutdown().await;

    assert_eq!(deliverer.delivered().len(), 1);
    assert_eq!(h.channel.in_flight(), 0);
    assert_eq!(h.channel.queued(EMAIL_CHANNEL), 0);
}

#[tokio::test]
async fn test_idle_consumer_stops_promptly() {
    let h = Harness::new();
    let consumer = h.spawn_consumer(VerificationChannel::Phone, RecordingDeliverer::new(), 5);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!consumer.is_finished());

    let stopped = tokio::time::timeout(Duration::from_secs(1), consumer.shutdown()).await;
    assert!(stopped.is_ok());
}

#[tokio::test]
async fn test_abort_leaves_unsettled_message_with_channel() {
    let h = Harness::new();
    let deliverer = RecordingDeliverer::slow(Duration::from_secs(10));
    let consumer = h.spawn_consumer(VerificationChannel::Email, deliverer.clone(), 5);

    h.channel
        .publish(EMAIL_CHANNEL, &VerificationRequest::email("a@x.com", "Ann"))
        .await
        .unwrap();
    assert!(eventually(|| deliverer.calls() == 1).await);

    consumer.abort();

    assert_eq!(h.channel.in_flight(), 1);
    assert!(deliverer.delivered().is_empty());
    assert!(h.channel.dead_letters().is_empty());
}

#[tokio::test]
async fn test_channel_outage_is_survived() {
    let h = Harness::new();
    let deliverer = RecordingDeliverer::new();
    h.channel.set_unavailable(true);
    let consumer = h.spawn_consumer(VerificationChannel::Phone, deliverer.clone(), 5);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!consumer.is_finished());

    h.channel.set_unavailable(false);
    h.channel
        .publish(PHONE_CHANNEL, &VerificationRequest::phone("+15550001"))
        .await
        .unwrap();

    assert_eq!(deliverer.wait_for(1).await.len(), 1);
    consumer.shutdown().await;
}
