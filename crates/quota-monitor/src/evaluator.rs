//! Periodic alarm evaluation.

use crate::aggregator::{AggregatedMetric, MetricAggregator};
use crate::alarm::{AlarmTransition, ThresholdAlarm};
use crate::clock::Clock;
use crate::remediation::{AlarmNotification, RemediationTrigger};
use crate::store::StoreError;
use chrono::DateTime;
use log::{debug, error, info};
use quota_types::status::MonitorStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;

/// Aggregates the metric, updates the alarm and fires remediation on each raise.
pub struct Evaluator {
    aggregator: MetricAggregator,
    alarm: ThresholdAlarm,
    trigger: RemediationTrigger,
    clock: Arc<dyn Clock>,
    status: Arc<RwLock<MonitorStatus>>,
}

impl Evaluator {
    pub fn new(
        aggregator: MetricAggregator,
        alarm: ThresholdAlarm,
        trigger: RemediationTrigger,
        clock: Arc<dyn Clock>,
        status: Arc<RwLock<MonitorStatus>>,
    ) -> Self {
        Self {
            aggregator,
            alarm,
            trigger,
            clock,
            status,
        }
    }

    pub fn alarm(&self) -> &ThresholdAlarm {
        &self.alarm
    }

    /// Runs one evaluation. On error the alarm is left untouched and the failure
    /// is counted in the status.
    pub async fn evaluate_once(
        &mut self,
    ) -> Result<(AggregatedMetric, Option<AlarmTransition>), StoreError> {
        let now = self.clock.now_millis();
        let metric = match self.aggregator.aggregate(now).await {
            Ok(metric) => metric,
            Err(e) => {
                self.status.write().await.failed_evaluations += 1;
                return Err(e);
            }
        };

        let transition = self.alarm.evaluate(metric.value);
        match transition {
            Some(AlarmTransition::Raised) => {
                info!(
                    "Alarm raised: size change over the last {} s is {} (threshold {})",
                    self.aggregator.window().as_secs(),
                    metric.value,
                    self.alarm.threshold()
                );
                self.trigger.fire(AlarmNotification {
                    raised_at: now,
                    metric: metric.value,
                });
            }
            Some(AlarmTransition::Cleared) => {
                info!(
                    "Alarm cleared: size change over the last {} s is {}",
                    self.aggregator.window().as_secs(),
                    metric.value
                );
            }
            None => debug!(
                "Alarm {}: metric {} over {} records",
                self.alarm.state(),
                metric.value,
                metric.records
            ),
        }

        let mut status = self.status.write().await;
        status.alarm_state = self.alarm.state();
        status.last_metric = Some(metric.value);
        status.last_evaluated_at = DateTime::from_timestamp_millis(now);
        Ok((metric, transition))
    }

    /// Evaluates every `period` until shutdown. Failed evaluations are skipped.
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.evaluate_once().await {
                        error!("Skipping alarm evaluation: {e}");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Alarm evaluator stopped");
    }
}

#[cfg(test)]
mod test {
    use super::Evaluator;
    use crate::aggregator::MetricAggregator;
    use crate::alarm::{AlarmTransition, ThresholdAlarm};
    use crate::clock::ManualClock;
    use crate::remediation::remediation_channel;
    use crate::store::{LogStream, MemoryLogStream, StoreError};
    use async_trait::async_trait;
    use quota_types::status::{AlarmState, MonitorStatus};
    use quota_types::DeltaLogRecord;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::RwLock;

    struct BrokenLog;

    #[async_trait]
    impl LogStream for BrokenLog {
        async fn append(&self, _record: DeltaLogRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query_range(&self, _: i64, _: i64) -> Result<Vec<DeltaLogRecord>, StoreError> {
            Err(StoreError::Unavailable {
                message: "log stream offline".to_string(),
            })
        }

        async fn last_for_key(&self, _: &str, _: &str) -> Result<Option<DeltaLogRecord>, StoreError> {
            Ok(None)
        }
    }

    fn record(size_delta: i64, timestamp: i64) -> DeltaLogRecord {
        DeltaLogRecord {
            subject: "b".to_string(),
            key: "k".to_string(),
            size_delta,
            timestamp,
        }
    }

    #[tokio::test]
    async fn raise_fires_remediation_once() {
        let log = Arc::new(MemoryLogStream::new());
        let clock = Arc::new(ManualClock::new(100_000));
        let status = Arc::new(RwLock::new(MonitorStatus::default()));
        let (trigger, mut notifications) = remediation_channel(8);
        let mut evaluator = Evaluator::new(
            MetricAggregator::new(log.clone(), Duration::from_secs(30), Duration::from_secs(1)),
            ThresholdAlarm::new(20),
            trigger,
            clock.clone(),
            status.clone(),
        );

        log.append(record(25, 99_000)).await.unwrap();
        let (metric, transition) = evaluator.evaluate_once().await.unwrap();
        assert_eq!(metric.value, 25);
        assert_eq!(transition, Some(AlarmTransition::Raised));
        // Still above threshold: no new notification.
        let (_, transition) = evaluator.evaluate_once().await.unwrap();
        assert_eq!(transition, None);

        let notification = notifications.try_recv().unwrap();
        assert_eq!(notification.metric, 25);
        assert_eq!(notification.raised_at, 100_000);
        assert!(notifications.try_recv().is_err());

        // The record leaves the window.
        clock.advance(30_000);
        let (metric, transition) = evaluator.evaluate_once().await.unwrap();
        assert_eq!(metric.value, 0);
        assert_eq!(transition, Some(AlarmTransition::Cleared));

        let status = status.read().await;
        assert_eq!(status.alarm_state, AlarmState::Ok);
        assert_eq!(status.last_metric, Some(0));
        assert_eq!(
            status.last_evaluated_at.map(|t| t.timestamp_millis()),
            Some(130_000)
        );
    }

    #[tokio::test]
    async fn failed_evaluation_keeps_state() {
        let status = Arc::new(RwLock::new(MonitorStatus::default()));
        let (trigger, _notifications) = remediation_channel(8);
        let mut evaluator = Evaluator::new(
            MetricAggregator::new(Arc::new(BrokenLog), Duration::from_secs(30), Duration::from_secs(1)),
            ThresholdAlarm::new(20),
            trigger,
            Arc::new(ManualClock::new(0)),
            status.clone(),
        );
        assert!(evaluator.evaluate_once().await.is_err());
        assert!(evaluator.evaluate_once().await.is_err());
        assert_eq!(evaluator.alarm().state(), AlarmState::Ok);
        let status = status.read().await;
        assert_eq!(status.failed_evaluations, 2);
        assert_eq!(status.last_metric, None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_keeps_evaluating_after_failures() {
        let status = Arc::new(RwLock::new(MonitorStatus::default()));
        let (trigger, _notifications) = remediation_channel(8);
        let evaluator = Evaluator::new(
            MetricAggregator::new(Arc::new(BrokenLog), Duration::from_secs(30), Duration::from_secs(1)),
            ThresholdAlarm::new(20),
            trigger,
            Arc::new(ManualClock::new(0)),
            status.clone(),
        );
        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(evaluator.run(Duration::from_secs(30), rx));
        // Ticks at 0, 30 and 60 seconds.
        tokio::time::sleep(Duration::from_secs(61)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(status.read().await.failed_evaluations, 3);
    }
}
