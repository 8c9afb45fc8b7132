use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::{Delivery, NotificationChannel, VerificationRequest};
use crate::error::{IdentityError, Result};

/// A message that was given up on
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub reason: String,
}

#[derive(Default)]
struct Queue {
    ready: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

impl Queue {
    fn push(&self, delivery: Delivery) {
        if let Ok(mut ready) = self.ready.lock() {
            ready.push_back(delivery);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Delivery> {
        self.ready.lock().ok()?.pop_front()
    }

    fn len(&self) -> usize {
        self.ready.lock().map(|r| r.len()).unwrap_or_default()
    }
}

/// In-process FIFO channel for tests and local runs.
///
/// Received messages are tracked as in flight until settled, mirroring a
/// consumer group's pending list.
#[derive(Clone)]
pub struct MemoryChannel {
    queues: Arc<DashMap<String, Arc<Queue>>>,
    in_flight: Arc<DashMap<String, Delivery>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    next_id: Arc<AtomicU64>,
    poll_window: Duration,
    unavailable: Arc<AtomicBool>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl MemoryChannel {
    pub fn new(poll_window: Duration) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            poll_window,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail with `StoreUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Enqueue an arbitrary body, bypassing serialization.
    pub fn publish_raw(&self, channel: &str, body: &str) -> Result<()> {
        self.check_available()?;
        self.enqueue(channel, body.to_string(), 0);
        Ok(())
    }

    /// Messages waiting to be received on `channel`
    pub fn queued(&self, channel: &str) -> usize {
        self.queues.get(channel).map(|q| q.len()).unwrap_or_default()
    }

    /// Messages received but not yet settled
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn queue(&self, channel: &str) -> Arc<Queue> {
        self.queues
            .entry(channel.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn enqueue(&self, channel: &str, body: String, attempt: u32) {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.queue(channel).push(Delivery {
            channel: channel.to_string(),
            id,
            body,
            attempt,
        });
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdentityError::StoreUnavailable(
                "channel: connection refused".to_string(),
            ));
        }
        Ok(())
    }

    fn settle(&self, delivery: &Delivery) {
        self.in_flight.remove(&delivery.id);
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    async fn declare(&self, channel: &str) -> Result<()> {
        self.check_available()?;
        self.queue(channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, request: &VerificationRequest) -> Result<()> {
        self.check_available()?;
        self.enqueue(channel, serde_json::to_string(request)?, 0);
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Option<Delivery>> {
        self.check_available()?;
        let queue = self.queue(channel);
        let deadline = tokio::time::Instant::now() + self.poll_window;

        loop {
            if let Some(delivery) = queue.pop() {
                self.in_flight
                    .insert(delivery.id.clone(), delivery.clone());
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, queue.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        self.settle(delivery);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        self.enqueue(
            &delivery.channel,
            delivery.body.clone(),
            delivery.attempt.saturating_add(1),
        );
        self.settle(delivery);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        self.check_available()?;
        if let Ok(mut dead) = self.dead_letters.lock() {
            dead.push(DeadLetter {
                delivery: delivery.clone(),
                reason: reason.to_string(),
            });
        }
        self.settle(delivery);
        Ok(())
    }
}
