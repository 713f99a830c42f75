//! Windowed sum of the size deltas in the log stream.
//!
//! The metric is recomputed from the log on every evaluation; nothing is carried
//! over between evaluations.

use crate::store::{with_timeout, LogStream, StoreError};
use quota_types::DeltaLogRecord;
use std::sync::Arc;
use std::time::Duration;

/// The net size change over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatedMetric {
    pub value: i64,
    /// Inclusive start of the window (epoch milliseconds).
    pub window_from: i64,
    /// Exclusive end of the window.
    pub window_to: i64,
    /// Number of records summed.
    pub records: usize,
}

/// Sums the deltas of the records with `from <= timestamp < to`.
pub fn sum_window(records: &[DeltaLogRecord], from: i64, to: i64) -> i64 {
    records
        .iter()
        .filter(|record| record.timestamp >= from && record.timestamp < to)
        .fold(0i64, |sum, record| sum.saturating_add(record.size_delta))
}

pub struct MetricAggregator {
    log_stream: Arc<dyn LogStream>,
    window: Duration,
    store_timeout: Duration,
}

impl MetricAggregator {
    pub fn new(log_stream: Arc<dyn LogStream>, window: Duration, store_timeout: Duration) -> Self {
        Self {
            log_stream,
            window,
            store_timeout,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Net size change over `[now - window, now)`. An empty window yields 0.
    pub async fn aggregate(&self, now: i64) -> Result<AggregatedMetric, StoreError> {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let window_from = now.saturating_sub(window_ms);
        let records = with_timeout(
            "log stream query",
            self.store_timeout,
            self.log_stream.query_range(window_from, now),
        )
        .await?;
        Ok(AggregatedMetric {
            value: sum_window(&records, window_from, now),
            window_from,
            window_to: now,
            records: records.len(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::{sum_window, MetricAggregator};
    use crate::clock::{Clock, ManualClock};
    use crate::consumer::{Consumer, StructuredLoggerConsumer};
    use crate::store::{LogStream, MemoryLogStream};
    use proptest::prelude::*;
    use quota_types::{DeltaLogRecord, StorageEvent};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(size_delta: i64, timestamp: i64) -> DeltaLogRecord {
        DeltaLogRecord {
            subject: "b".to_string(),
            key: "k".to_string(),
            size_delta,
            timestamp,
        }
    }

    #[tokio::test]
    async fn empty_window_is_zero() {
        let aggregator = MetricAggregator::new(
            Arc::new(MemoryLogStream::new()),
            Duration::from_secs(30),
            Duration::from_secs(1),
        );
        let metric = aggregator.aggregate(100_000).await.unwrap();
        assert_eq!(metric.value, 0);
        assert_eq!(metric.records, 0);
        assert_eq!(metric.window_from, 70_000);
    }

    #[tokio::test]
    async fn only_trailing_window_counts() {
        let log = Arc::new(MemoryLogStream::new());
        for (delta, ts) in [(100, 69_999), (5, 70_000), (30, 80_000), (-7, 99_999), (50, 100_000)] {
            log.append(record(delta, ts)).await.unwrap();
        }
        let aggregator = MetricAggregator::new(log, Duration::from_secs(30), Duration::from_secs(1));
        let metric = aggregator.aggregate(100_000).await.unwrap();
        assert_eq!(metric.value, 28);
        assert_eq!(metric.records, 3);
    }

    proptest! {
        /// With every event logged exactly once, the window sum is the total size
        /// created minus the total size removed.
        #[test]
        fn window_sum_conserves_size(
            created in prop::collection::vec(0i64..10_000, 0..20),
            removed in prop::collection::vec(0i64..10_000, 0..20),
            offsets in prop::collection::vec(0i64..30_000, 40),
        ) {
            let now = 1_000_000;
            let from = now - 30_000;
            let mut records = Vec::new();
            for (i, size) in created.iter().enumerate() {
                records.push(record(*size, from + offsets[i]));
            }
            for (i, size) in removed.iter().enumerate() {
                records.push(record(-*size, from + offsets[20 + i]));
            }
            let expected: i64 = created.iter().sum::<i64>() - removed.iter().sum::<i64>();
            prop_assert_eq!(sum_window(&records, from, now), expected);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Puts and deletes logged by the delta logger aggregate to the bytes
        /// created minus the bytes removed.
        #[test]
        fn logged_events_aggregate_to_net_size(
            created in prop::collection::vec(0u64..10_000, 0..12),
            removed in prop::collection::vec(1u64..10_000, 0..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let clock = Arc::new(ManualClock::new(1_000_000));
                let log = Arc::new(MemoryLogStream::new());
                let logger =
                    StructuredLoggerConsumer::new(log.clone(), clock.clone(), Duration::from_secs(1));

                for (i, size) in created.iter().enumerate() {
                    let key = format!("new{i}");
                    let event = StorageEvent::created("b", key, *size, clock.now_millis());
                    logger.process(&event).await.unwrap();
                    clock.advance(10);
                }
                for (i, size) in removed.iter().enumerate() {
                    let key = format!("old{i}");
                    let event = StorageEvent::removed("b", key, *size, clock.now_millis());
                    logger.process(&event).await.unwrap();
                    clock.advance(10);
                }

                let aggregator =
                    MetricAggregator::new(log, Duration::from_secs(30), Duration::from_secs(1));
                let metric = aggregator.aggregate(clock.now_millis()).await.unwrap();
                let expected =
                    created.iter().sum::<u64>() as i64 - removed.iter().sum::<u64>() as i64;
                prop_assert_eq!(metric.value, expected);
                prop_assert_eq!(metric.records, created.len() + removed.len());
                Ok(())
            })?;
        }
    }
}
