//! Queue consumers and the worker loop that drains a [`DeliveryQueue`] into one.
//!
//! Every message is acknowledged individually: a failing item is nacked and
//! redelivered without affecting the other items of its batch. An item that does
//! not finish within the processing timeout is abandoned and its lease left to
//! expire.

use crate::queue::DeliveryQueue;
use crate::source::SourceError;
use crate::store::StoreError;
use async_trait::async_trait;
use log::{debug, info, warn};
use quota_types::StorageEvent;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub mod ledger;
pub mod logger;

pub use ledger::SizeLedgerConsumer;
pub use logger::StructuredLoggerConsumer;

#[derive(Clone, Error, Debug, Serialize)]
pub enum ConsumerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Processes events one at a time. Implementations must tolerate the same event
/// being processed more than once.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, event: &StorageEvent) -> Result<(), ConsumerError>;
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub batch_size: usize,
    /// Long-poll wait of a single receive.
    pub poll_timeout: Duration,
    /// Time budget of a single message.
    pub processing_timeout: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub acked: usize,
    pub nacked: usize,
    pub abandoned: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.acked + self.nacked + self.abandoned
    }
}

/// Receives one batch from `queue` and processes it with `consumer`.
pub async fn drain_once(
    queue: &DeliveryQueue,
    consumer: &dyn Consumer,
    settings: &WorkerSettings,
) -> BatchOutcome {
    let batch = queue
        .receive(settings.batch_size, settings.poll_timeout)
        .await;
    let mut outcome = BatchOutcome::default();
    for delivery in batch {
        let event = &delivery.event;
        match tokio::time::timeout(settings.processing_timeout, consumer.process(event)).await {
            Ok(Ok(())) => match queue.ack(delivery.lease).await {
                Ok(()) => outcome.acked += 1,
                Err(e) => {
                    // Processed after the lease expired: the redelivered copy will
                    // be processed again.
                    warn!(
                        "{}: processed event {} too late: {e}",
                        consumer.name(),
                        event.event_id
                    );
                    outcome.abandoned += 1;
                }
            },
            Ok(Err(e)) => {
                warn!(
                    "{}: failed to process event {} for '{}' (receive #{}), returning it to '{}': {e}",
                    consumer.name(),
                    event.event_id,
                    event.key,
                    delivery.receive_count,
                    queue.name()
                );
                if let Err(e) = queue.nack(delivery.lease).await {
                    debug!(
                        "{}: nack of event {} had no effect: {e}",
                        consumer.name(),
                        event.event_id
                    );
                }
                outcome.nacked += 1;
            }
            Err(_elapsed) => {
                warn!(
                    "{}: abandoning event {} for '{}' after {} ms, it will be redelivered",
                    consumer.name(),
                    event.event_id,
                    event.key,
                    settings.processing_timeout.as_millis()
                );
                outcome.abandoned += 1;
            }
        }
    }
    outcome
}

/// Drains `queue` into `consumer` until `shutdown` turns true or its sender is dropped.
pub async fn run_worker(
    worker_id: usize,
    queue: Arc<DeliveryQueue>,
    consumer: Arc<dyn Consumer>,
    settings: WorkerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(
        "{} worker #{worker_id}: started on '{}'",
        consumer.name(),
        queue.name()
    );
    while !*shutdown.borrow() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = drain_once(&queue, consumer.as_ref(), &settings) => {}
        }
    }
    info!("{} worker #{worker_id}: stopped", consumer.name());
}
