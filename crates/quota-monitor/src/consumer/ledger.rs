use crate::clock::Clock;
use crate::consumer::{Consumer, ConsumerError};
use crate::source::{EventSource, SourceError};
use crate::store::{with_timeout, HistoryStore};
use async_trait::async_trait;
use log::debug;
use quota_types::{SizeObservation, StorageEvent};
use std::sync::Arc;
use std::time::Duration;

/// Records the total size of the subject after every event.
///
/// The size is re-read from the source instead of derived from the event, so
/// duplicate or reordered events only add redundant samples.
pub struct SizeLedgerConsumer {
    source: Arc<dyn EventSource>,
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl SizeLedgerConsumer {
    pub fn new(
        source: Arc<dyn EventSource>,
        history: Arc<dyn HistoryStore>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            source,
            history,
            clock,
            store_timeout,
        }
    }

    /// Total size and object count of the subject. A listing that finds nothing
    /// at all counts as empty.
    async fn current_totals(&self) -> Result<(u64, u64), SourceError> {
        match self.source.list().await {
            Ok(objects) => Ok((
                objects.iter().map(|object| object.size).sum(),
                objects.len() as u64,
            )),
            Err(SourceError::NotFound { .. }) => Ok((0, 0)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Consumer for SizeLedgerConsumer {
    fn name(&self) -> &str {
        "size-ledger"
    }

    async fn process(&self, event: &StorageEvent) -> Result<(), ConsumerError> {
        let (size_bytes, object_count) = self.current_totals().await?;
        let observation = SizeObservation::new(
            self.source.subject(),
            self.clock.now_millis(),
            size_bytes,
            object_count,
        );
        with_timeout(
            "history append",
            self.store_timeout,
            self.history.append(observation),
        )
        .await?;
        debug!(
            "size-ledger: {} bytes in {object_count} objects after {:?} '{}'",
            size_bytes, event.event_type, event.key
        );
        Ok(())
    }
}
