//! Fan-out of storage events to every registered subscriber.

use crate::queue::QueueError;
use async_trait::async_trait;
use futures_util::future::join_all;
use log::warn;
use quota_types::StorageEvent;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Receiver of every event published on a [`FanoutBus`].
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: StorageEvent) -> Result<(), QueueError>;
}

/// Result of publishing one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Names of the subscribers that did not accept the event.
    pub failed: Vec<String>,
}

/// Delivers each published event to every subscriber independently: a subscriber
/// that rejects an event does not keep it from the others.
#[derive(Default)]
pub struct FanoutBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl FanoutBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.write().await.push(subscriber);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn publish(&self, event: StorageEvent) -> PublishReport {
        let subscribers = self.subscribers.read().await.clone();
        let results = join_all(
            subscribers
                .iter()
                .map(|subscriber| subscriber.deliver(event.clone())),
        )
        .await;

        let mut report = PublishReport::default();
        for (subscriber, result) in subscribers.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "Subscriber '{}' did not accept event {} for '{}': {e}",
                        subscriber.name(),
                        event.event_id,
                        event.key
                    );
                    report.failed.push(subscriber.name().to_string());
                }
            }
        }
        report
    }
}
