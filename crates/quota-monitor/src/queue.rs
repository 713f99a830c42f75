//! Durable, at-least-once delivery queue placed between the fan-out bus and a
//! consumer.
//!
//! A received message becomes invisible for the visibility timeout. It is removed
//! only when the receiver acknowledges it with the lease it was given; otherwise
//! it becomes visible again once the lease expires and is redelivered. Messages
//! received `max_receive_count` times without acknowledgement are moved to the
//! dead-letter list of the queue instead of being redelivered forever.

use crate::bus::Subscriber;
use crate::config::MAX_BATCH_SIZE;
use async_trait::async_trait;
use log::{debug, warn};
use quota_types::status::{DeadLetter, QueueStats};
use quota_types::StorageEvent;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// Handle identifying one receive of one message. Needed to acknowledge it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Error, Debug, Serialize)]
pub enum QueueError {
    #[error("Queue '{name}' is full ({capacity} messages)")]
    Full { name: String, capacity: usize },

    /// The lease expired and the message was received again, or it was already
    /// acknowledged.
    #[error("Lease {lease} is not held on queue '{name}'")]
    UnknownLease { name: String, lease: LeaseToken },
}

/// A message handed to a receiver.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub lease: LeaseToken,
    pub event: StorageEvent,
    /// Number of times the message has been received, this time included.
    pub receive_count: u32,
}

struct Message {
    event: StorageEvent,
    receive_count: u32,
    visible_at: Instant,
    lease: Option<LeaseToken>,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    messages: BTreeMap<u64, Message>,
    leases: HashMap<LeaseToken, u64>,
    dead_letters: Vec<DeadLetter>,
    delivered_total: u64,
    acked_total: u64,
}

pub struct DeliveryQueue {
    name: String,
    visibility_timeout: Duration,
    max_receive_count: u32,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new(
        name: impl Into<String>,
        visibility_timeout: Duration,
        max_receive_count: u32,
        capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            max_receive_count: max_receive_count.max(1),
            capacity,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn enqueue(&self, event: StorageEvent) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.messages.len() >= self.capacity {
            return Err(QueueError::Full {
                name: self.name.clone(),
                capacity: self.capacity,
            });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.messages.insert(
            id,
            Message {
                event,
                receive_count: 0,
                visible_at: Instant::now(),
                lease: None,
            },
        );
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Receives up to `max` visible messages (clamped to `1..=MAX_BATCH_SIZE`).
    ///
    /// Waits up to `wait` for a message to become visible, then returns an empty
    /// batch. Ordering between messages is best-effort.
    pub async fn receive(&self, max: usize, wait: Duration) -> Vec<Delivery> {
        let max = max.clamp(1, MAX_BATCH_SIZE);
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let (batch, next_visible, more_visible) = self.try_receive(max).await;
            if !batch.is_empty() {
                if more_visible {
                    self.notify.notify_one();
                }
                return batch;
            }
            if Instant::now() >= deadline {
                return batch;
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Leases up to `max` visible messages. Also returns when the next invisible
    /// message turns visible and whether visible messages were left behind.
    async fn try_receive(&self, max: usize) -> (Vec<Delivery>, Option<Instant>, bool) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let QueueState {
            messages,
            leases,
            dead_letters,
            delivered_total,
            ..
        } = &mut *state;

        let mut batch = Vec::new();
        let mut exhausted = Vec::new();
        let mut more_visible = false;
        for (id, message) in messages.iter_mut() {
            if message.visible_at > now {
                continue;
            }
            if batch.len() >= max {
                more_visible = true;
                break;
            }
            if let Some(expired) = message.lease.take() {
                leases.remove(&expired);
            }
            if message.receive_count >= self.max_receive_count {
                exhausted.push(*id);
                continue;
            }
            message.receive_count += 1;
            message.visible_at = now + self.visibility_timeout;
            let lease = LeaseToken::new();
            message.lease = Some(lease);
            leases.insert(lease, *id);
            *delivered_total += 1;
            if message.receive_count > 1 {
                debug!(
                    "Redelivering event {} on queue '{}' (receive #{})",
                    message.event.event_id, self.name, message.receive_count
                );
            }
            batch.push(Delivery {
                lease,
                event: message.event.clone(),
                receive_count: message.receive_count,
            });
        }

        for id in exhausted {
            if let Some(message) = messages.remove(&id) {
                warn!(
                    "Moving event {} ({:?} '{}') to the dead-letter list of queue '{}' after {} receives",
                    message.event.event_id,
                    message.event.event_type,
                    message.event.key,
                    self.name,
                    message.receive_count
                );
                dead_letters.push(DeadLetter {
                    event: message.event,
                    receive_count: message.receive_count,
                    dead_lettered_at: chrono::Utc::now(),
                });
            }
        }

        let next_visible = messages
            .values()
            .map(|message| message.visible_at)
            .filter(|at| *at > now)
            .min();
        (batch, next_visible, more_visible)
    }

    /// Removes the message received under `lease`.
    pub async fn ack(&self, lease: LeaseToken) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.leases.remove(&lease) {
            Some(id) => {
                state.messages.remove(&id);
                state.acked_total += 1;
                Ok(())
            }
            None => Err(QueueError::UnknownLease {
                name: self.name.clone(),
                lease,
            }),
        }
    }

    /// Gives up the lease, making the message visible again right away.
    pub async fn nack(&self, lease: LeaseToken) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(id) = state.leases.remove(&lease) else {
            return Err(QueueError::UnknownLease {
                name: self.name.clone(),
                lease,
            });
        };
        if let Some(message) = state.messages.get_mut(&id) {
            message.lease = None;
            message.visible_at = Instant::now();
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn stats(&self) -> QueueStats {
        let now = Instant::now();
        let state = self.state.lock().await;
        let visible = state
            .messages
            .values()
            .filter(|message| message.visible_at <= now)
            .count();
        QueueStats {
            name: self.name.clone(),
            visible,
            in_flight: state.messages.len() - visible,
            dead_lettered: state.dead_letters.len(),
            delivered_total: state.delivered_total,
            acked_total: state.acked_total,
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl Subscriber for DeliveryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: StorageEvent) -> Result<(), QueueError> {
        self.enqueue(event).await
    }
}

#[cfg(test)]
mod test {
    use super::{DeliveryQueue, QueueError};
    use quota_types::StorageEvent;
    use std::sync::Arc;
    use std::time::Duration;

    const VISIBILITY: Duration = Duration::from_secs(30);

    fn queue(max_receive_count: u32) -> DeliveryQueue {
        DeliveryQueue::new("test", VISIBILITY, max_receive_count, 100)
    }

    fn event(key: &str) -> StorageEvent {
        StorageEvent::created("b", key, 1, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_message_is_redelivered_after_visibility_timeout() {
        let queue = queue(5);
        queue.enqueue(event("a")).await.unwrap();

        let first = queue.receive(10, Duration::ZERO).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);

        // Invisible while leased.
        assert!(queue.receive(10, Duration::ZERO).await.is_empty());
        assert_eq!(queue.stats().await.in_flight, 1);

        tokio::time::advance(VISIBILITY).await;
        let second = queue.receive(10, Duration::ZERO).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_eq!(second[0].event.event_id, first[0].event.event_id);

        // The first lease is stale now.
        assert!(matches!(
            queue.ack(first[0].lease).await,
            Err(QueueError::UnknownLease { .. })
        ));
        queue.ack(second[0].lease).await.unwrap();
        tokio::time::advance(VISIBILITY * 2).await;
        assert!(queue.receive(10, Duration::ZERO).await.is_empty());

        let stats = queue.stats().await;
        assert_eq!(stats.delivered_total, 2);
        assert_eq!(stats.acked_total, 1);
        assert_eq!(stats.visible + stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_makes_message_visible_immediately() {
        let queue = queue(5);
        queue.enqueue(event("a")).await.unwrap();
        let batch = queue.receive(1, Duration::ZERO).await;
        queue.nack(batch[0].lease).await.unwrap();
        let again = queue.receive(1, Duration::ZERO).await;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_capped_at_ten() {
        let queue = queue(5);
        for i in 0..25 {
            queue.enqueue(event(&format!("k{i}"))).await.unwrap();
        }
        assert_eq!(queue.receive(50, Duration::ZERO).await.len(), 10);
        assert_eq!(queue.receive(3, Duration::ZERO).await.len(), 3);
        assert_eq!(queue.receive(0, Duration::ZERO).await.len(), 1);
        assert_eq!(queue.stats().await.visible, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn repeatedly_failing_message_is_dead_lettered() {
        let queue = queue(2);
        queue.enqueue(event("poison")).await.unwrap();
        for _ in 0..2 {
            let batch = queue.receive(10, Duration::ZERO).await;
            assert_eq!(batch.len(), 1);
            queue.nack(batch[0].lease).await.unwrap();
        }
        assert!(queue.receive(10, Duration::ZERO).await.is_empty());
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].event.key, "poison");
        assert_eq!(dead[0].receive_count, 2);
        assert_eq!(queue.stats().await.dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_events() {
        let queue = DeliveryQueue::new("small", VISIBILITY, 5, 1);
        queue.enqueue(event("a")).await.unwrap();
        assert!(matches!(
            queue.enqueue(event("b")).await,
            Err(QueueError::Full { capacity: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_wakes_on_enqueue() {
        let queue = Arc::new(queue(5));
        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(10, Duration::from_secs(20)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(event("late")).await.unwrap();
        let batch = receiver.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event.key, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_empty_after_wait() {
        let queue = queue(5);
        let started = tokio::time::Instant::now();
        assert!(queue.receive(10, Duration::from_secs(5)).await.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
