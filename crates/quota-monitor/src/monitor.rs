//! Assembly of the complete pipeline:
//!
//! ```text
//! source ─▶ bus ─┬▶ size-ledger queue ──▶ size ledger ──▶ history store
//!   ▲            └▶ delta-logger queue ─▶ delta logger ─▶ log stream
//!   │                                                        │
//!   └── cleaner ◀── remediation trigger ◀── alarm ◀── aggregator
//! ```

use crate::aggregator::MetricAggregator;
use crate::alarm::ThresholdAlarm;
use crate::bus::FanoutBus;
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::consumer::{
    drain_once, run_worker, BatchOutcome, Consumer, SizeLedgerConsumer, StructuredLoggerConsumer,
    WorkerSettings,
};
use crate::evaluator::Evaluator;
use crate::queue::DeliveryQueue;
use crate::remediation::{remediation_channel, run_cleaner, Cleaner, RemediationTrigger};
use crate::render::Renderer;
use crate::source::ObjectStoreSource;
use crate::store::{HistoryStore, LogStream, MemoryHistoryStore, MemoryLogStream};
use log::{info, warn};
use object_store::ObjectStore;
use quota_types::status::{MonitorStatus, QueueStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

pub const SIZE_LEDGER_QUEUE: &str = "size-ledger";
pub const DELTA_LOGGER_QUEUE: &str = "delta-logger";

/// Alarm notifications waiting for the cleaner.
const REMEDIATION_CHANNEL_CAPACITY: usize = 16;

pub struct Monitor {
    pub config: MonitorConfig,
    pub clock: Arc<dyn Clock>,
    pub source: Arc<ObjectStoreSource>,
    pub history: Arc<dyn HistoryStore>,
    pub log_stream: Arc<dyn LogStream>,
    pub ledger_queue: Arc<DeliveryQueue>,
    pub logger_queue: Arc<DeliveryQueue>,
    pub ledger: Arc<SizeLedgerConsumer>,
    pub logger: Arc<StructuredLoggerConsumer>,
    pub renderer: Arc<Renderer>,
    pub status: Arc<RwLock<MonitorStatus>>,
}

impl Monitor {
    /// Builds the pipeline with in-memory history and log stores.
    pub async fn new(
        config: MonitorConfig,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_stores(
            config,
            store,
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(MemoryLogStream::new()),
            clock,
        )
        .await
    }

    pub async fn with_stores(
        config: MonitorConfig,
        store: Arc<dyn ObjectStore>,
        history: Arc<dyn HistoryStore>,
        log_stream: Arc<dyn LogStream>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = Arc::new(FanoutBus::new());
        let queue = |name: &str| {
            Arc::new(DeliveryQueue::new(
                name,
                config.visibility_timeout(),
                config.max_receive_count,
                config.queue_capacity,
            ))
        };
        let ledger_queue = queue(SIZE_LEDGER_QUEUE);
        let logger_queue = queue(DELTA_LOGGER_QUEUE);
        bus.subscribe(ledger_queue.clone()).await;
        bus.subscribe(logger_queue.clone()).await;

        let source = Arc::new(ObjectStoreSource::new(
            config.subject.clone(),
            store,
            bus,
            clock.clone(),
        ));
        let ledger = Arc::new(SizeLedgerConsumer::new(
            source.clone(),
            history.clone(),
            clock.clone(),
            config.store_timeout(),
        ));
        let logger = Arc::new(StructuredLoggerConsumer::new(
            log_stream.clone(),
            clock.clone(),
            config.store_timeout(),
        ));
        let renderer = Arc::new(Renderer::new(
            history.clone(),
            source.clone(),
            clock.clone(),
            config.artifact_key.clone(),
            config.render_window(),
            config.store_timeout(),
        ));
        let status = Arc::new(RwLock::new(MonitorStatus {
            subject: config.subject.clone(),
            threshold: config.threshold,
            window_secs: config.window_secs,
            ..Default::default()
        }));

        Self {
            config,
            clock,
            source,
            history,
            log_stream,
            ledger_queue,
            logger_queue,
            ledger,
            logger,
            renderer,
            status,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            batch_size: self.config.batch_size,
            poll_timeout: self.config.poll_timeout(),
            processing_timeout: self.config.processing_timeout(),
        }
    }

    /// An evaluator over the log stream that starts with the alarm in OK.
    pub fn evaluator(&self, trigger: RemediationTrigger) -> Evaluator {
        Evaluator::new(
            MetricAggregator::new(
                self.log_stream.clone(),
                self.config.window(),
                self.config.store_timeout(),
            ),
            ThresholdAlarm::new(self.config.threshold),
            trigger,
            self.clock.clone(),
            self.status.clone(),
        )
    }

    pub fn cleaner(&self) -> Cleaner {
        Cleaner::new(self.source.clone(), self.config.artifact_key.clone())
    }

    pub fn queue(&self, name: &str) -> Option<&Arc<DeliveryQueue>> {
        match name {
            SIZE_LEDGER_QUEUE => Some(&self.ledger_queue),
            DELTA_LOGGER_QUEUE => Some(&self.logger_queue),
            _ => None,
        }
    }

    pub async fn queue_stats(&self) -> Vec<QueueStats> {
        vec![self.ledger_queue.stats().await, self.logger_queue.stats().await]
    }

    /// Processes everything currently visible in both queues without waiting for
    /// more. Returns the combined outcome per queue.
    pub async fn drain(&self) -> (BatchOutcome, BatchOutcome) {
        let settings = WorkerSettings {
            poll_timeout: Duration::ZERO,
            ..self.worker_settings()
        };
        let ledger = drain_queue(&self.ledger_queue, self.ledger.as_ref(), &settings).await;
        let logger = drain_queue(&self.logger_queue, self.logger.as_ref(), &settings).await;
        (ledger, logger)
    }

    /// Spawns the worker pools, the evaluator and the cleaner.
    pub fn start(&self) -> MonitorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let settings = self.worker_settings();
        let mut tasks = Vec::new();

        let pools: [(Arc<DeliveryQueue>, Arc<dyn Consumer>); 2] = [
            (self.ledger_queue.clone(), self.ledger.clone() as Arc<dyn Consumer>),
            (self.logger_queue.clone(), self.logger.clone() as Arc<dyn Consumer>),
        ];
        for (queue, consumer) in pools {
            for worker_id in 0..self.config.workers_per_queue {
                tasks.push(tokio::spawn(run_worker(
                    worker_id,
                    queue.clone(),
                    consumer.clone(),
                    settings.clone(),
                    shutdown_rx.clone(),
                )));
            }
        }

        let (trigger, notifications) = remediation_channel(REMEDIATION_CHANNEL_CAPACITY);
        tasks.push(tokio::spawn(
            self.evaluator(trigger)
                .run(self.config.evaluation_period(), shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(run_cleaner(
            self.cleaner(),
            notifications,
            self.status.clone(),
            shutdown_rx,
        )));

        info!(
            "Monitoring '{}': {} workers per queue, alarm when the size change over {} s exceeds {}",
            self.config.subject,
            self.config.workers_per_queue,
            self.config.window_secs,
            self.config.threshold
        );
        MonitorHandle { shutdown, tasks }
    }
}

async fn drain_queue(
    queue: &DeliveryQueue,
    consumer: &dyn Consumer,
    settings: &WorkerSettings,
) -> BatchOutcome {
    let mut total = BatchOutcome::default();
    loop {
        let outcome = drain_once(queue, consumer, settings).await;
        if outcome.total() == 0 {
            return total;
        }
        total.acked += outcome.acked;
        total.nacked += outcome.nacked;
        total.abandoned += outcome.abandoned;
        // Nacked items are visible again immediately; stop instead of spinning
        // on an item that keeps failing.
        if outcome.nacked > 0 {
            return total;
        }
    }
}

/// Background tasks of a started [`Monitor`].
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signals every task to stop and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {e}");
            }
        }
    }
}
