use crate::clock::Clock;
use crate::consumer::{Consumer, ConsumerError};
use crate::logging::SIZE_DELTA_TARGET;
use crate::store::{with_timeout, LogStream};
use async_trait::async_trait;
use log::info;
use quota_types::{DeltaLogRecord, StorageEvent, StorageEventType};
use std::sync::Arc;
use std::time::Duration;

/// Turns every event into a signed [`DeltaLogRecord`], stamped with the time it
/// was emitted, and appends it to the log stream.
///
/// Every delivery produces a record, duplicates included.
pub struct StructuredLoggerConsumer {
    log_stream: Arc<dyn LogStream>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl StructuredLoggerConsumer {
    pub fn new(
        log_stream: Arc<dyn LogStream>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            log_stream,
            clock,
            store_timeout,
        }
    }

    /// Size to account for `event`. A removal reported without a size takes the
    /// magnitude of the last delta logged for the same key.
    async fn resolve_size(&self, event: &StorageEvent) -> Result<u64, ConsumerError> {
        if event.event_type != StorageEventType::Removed || event.size != 0 {
            return Ok(event.size);
        }
        let last = with_timeout(
            "log stream lookup",
            self.store_timeout,
            self.log_stream.last_for_key(&event.subject, &event.key),
        )
        .await?;
        Ok(last.map_or(0, |record| record.size_delta.unsigned_abs()))
    }
}

#[async_trait]
impl Consumer for StructuredLoggerConsumer {
    fn name(&self) -> &str {
        "delta-logger"
    }

    async fn process(&self, event: &StorageEvent) -> Result<(), ConsumerError> {
        let size = self.resolve_size(event).await?;
        let record = DeltaLogRecord::for_event(event, size, self.clock.now_millis());
        let line = serde_json::to_string(&record);
        with_timeout(
            "log stream append",
            self.store_timeout,
            self.log_stream.append(record),
        )
        .await?;
        // Only appended records are printed, so a redelivery after a failed
        // append does not duplicate the line.
        if let Ok(line) = line {
            info!(target: SIZE_DELTA_TARGET, "{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::StructuredLoggerConsumer;
    use crate::clock::ManualClock;
    use crate::consumer::Consumer;
    use crate::consumer::ConsumerError;
    use crate::logging::SIZE_DELTA_TARGET;
    use crate::store::{LogStream, MemoryLogStream, StoreError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use quota_types::{DeltaLogRecord, StorageEvent};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, Once};
    use std::time::Duration;

    /// Keeps every line written under the size delta target.
    struct Recorder;

    static RECORDER: Recorder = Recorder;
    static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    impl log::Log for Recorder {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.target() == SIZE_DELTA_TARGET
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                LINES.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    fn record_size_delta_lines() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            log::set_logger(&RECORDER).unwrap();
            log::set_max_level(log::LevelFilter::Info);
        });
    }

    fn lines_mentioning(key: &str) -> usize {
        LINES
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(key))
            .count()
    }

    /// Fails the first append, then behaves like [`MemoryLogStream`].
    #[derive(Default)]
    struct FailsOnce {
        failed: AtomicBool,
        inner: MemoryLogStream,
    }

    #[async_trait]
    impl LogStream for FailsOnce {
        async fn append(&self, record: DeltaLogRecord) -> Result<(), StoreError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Unavailable {
                    message: "throttled".to_string(),
                });
            }
            self.inner.append(record).await
        }

        async fn query_range(
            &self,
            ts_from: i64,
            ts_to: i64,
        ) -> Result<Vec<DeltaLogRecord>, StoreError> {
            self.inner.query_range(ts_from, ts_to).await
        }

        async fn last_for_key(
            &self,
            subject: &str,
            key: &str,
        ) -> Result<Option<DeltaLogRecord>, StoreError> {
            self.inner.last_for_key(subject, key).await
        }
    }

    fn logger(log: Arc<MemoryLogStream>, clock: Arc<ManualClock>) -> StructuredLoggerConsumer {
        StructuredLoggerConsumer::new(log, clock, Duration::from_secs(1))
    }

    async fn deltas(log: &MemoryLogStream) -> Vec<(String, i64, i64)> {
        log.query_range(i64::MIN, i64::MAX)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.key, r.size_delta, r.timestamp))
            .collect()
    }

    #[tokio::test]
    async fn signed_delta_stamped_with_emission_time() {
        let log = Arc::new(MemoryLogStream::new());
        let clock = Arc::new(ManualClock::new(10_000));
        let logger = logger(log.clone(), clock.clone());

        // `observedAt` is ignored in favor of the emission time.
        logger
            .process(&StorageEvent::created("b", "a", 18, 1))
            .await
            .unwrap();
        clock.advance(2_000);
        logger
            .process(&StorageEvent::removed("b", "a", 18, 2))
            .await
            .unwrap();

        assert_eq!(
            deltas(&log).await,
            vec![("a".to_string(), 18, 10_000), ("a".to_string(), -18, 12_000)]
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_logs_twice() {
        let log = Arc::new(MemoryLogStream::new());
        let logger = logger(log.clone(), Arc::new(ManualClock::new(0)));
        let event = StorageEvent::created("b", "a", 4, 0);
        logger.process(&event).await.unwrap();
        logger.process(&event).await.unwrap();
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn removal_without_size_uses_last_logged_size() {
        let log = Arc::new(MemoryLogStream::new());
        let logger = logger(log.clone(), Arc::new(ManualClock::new(0)));
        logger
            .process(&StorageEvent::created("b", "a", 27, 0))
            .await
            .unwrap();
        logger
            .process(&StorageEvent::removed("b", "a", 0, 0))
            .await
            .unwrap();
        logger
            .process(&StorageEvent::removed("b", "never-seen", 0, 0))
            .await
            .unwrap();

        let logged: Vec<i64> = deltas(&log).await.into_iter().map(|(_, d, _)| d).collect();
        assert_eq!(logged, vec![27, -27, 0]);
    }

    #[tokio::test]
    async fn line_is_printed_only_once_appended() {
        record_size_delta_lines();
        let log = Arc::new(FailsOnce::default());
        let logger = StructuredLoggerConsumer::new(
            log.clone(),
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(1),
        );
        let event = StorageEvent::created("b", "retried-after-failed-append", 9, 0);

        assert!(matches!(
            logger.process(&event).await,
            Err(ConsumerError::Store(StoreError::Unavailable { .. }))
        ));
        assert_eq!(lines_mentioning("retried-after-failed-append"), 0);

        logger.process(&event).await.unwrap();
        assert_eq!(lines_mentioning("retried-after-failed-append"), 1);
        assert_eq!(log.inner.len().await, 1);
    }
}
