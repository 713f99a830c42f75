//! Remediation: the alarm notification channel and the cleaner it drives.
//!
//! The cleaner deletes through the [`EventSource`], so each removal publishes a
//! REMOVED event and is accounted by the pipeline like any other mutation.

use crate::source::{EventSource, SourceError};
use log::{error, info, warn};
use quota_types::status::{MonitorStatus, RemediationOutcome};
use quota_types::ObjectSummary;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};

/// Sent once for every OK to ALARM transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmNotification {
    /// Epoch milliseconds of the evaluation that raised the alarm.
    pub raised_at: i64,
    pub metric: i64,
}

/// Sending half of the single-subscriber alarm notification channel.
#[derive(Clone)]
pub struct RemediationTrigger {
    sender: mpsc::Sender<AlarmNotification>,
}

/// Creates the trigger and the receiver the cleaner listens on.
pub fn remediation_channel(
    capacity: usize,
) -> (RemediationTrigger, mpsc::Receiver<AlarmNotification>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (RemediationTrigger { sender }, receiver)
}

impl RemediationTrigger {
    /// Queues `notification` without waiting. Returns whether it was accepted.
    pub fn fire(&self, notification: AlarmNotification) -> bool {
        match self.sender.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Remediation is already backed up, dropping alarm raised at {}",
                    notification.raised_at
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                error!(
                    "Cleaner is not running, alarm raised at {} is not remediated",
                    notification.raised_at
                );
                false
            }
        }
    }
}

/// Picks the object to delete: the largest one, the lexicographically smallest
/// key among equals. Keys starting with `exclude_prefix` are skipped unless
/// nothing else is left.
pub fn select_victim<'a>(
    objects: &'a [ObjectSummary],
    exclude_prefix: &str,
) -> Option<&'a ObjectSummary> {
    let preferred = objects
        .iter()
        .filter(|object| exclude_prefix.is_empty() || !object.key.starts_with(exclude_prefix));
    largest(preferred).or_else(|| largest(objects.iter()))
}

fn largest<'a>(
    candidates: impl Iterator<Item = &'a ObjectSummary>,
) -> Option<&'a ObjectSummary> {
    candidates.max_by(|a, b| a.size.cmp(&b.size).then_with(|| b.key.cmp(&a.key)))
}

pub struct Cleaner {
    source: Arc<dyn EventSource>,
    exclude_prefix: String,
}

impl Cleaner {
    pub fn new(source: Arc<dyn EventSource>, exclude_prefix: impl Into<String>) -> Self {
        Self {
            source,
            exclude_prefix: exclude_prefix.into(),
        }
    }

    /// Deletes the largest object in the source.
    pub async fn clean(&self) -> Result<RemediationOutcome, SourceError> {
        let objects = self.source.list().await?;
        let Some(victim) = select_victim(&objects, &self.exclude_prefix) else {
            info!("Remediation: '{}' is empty, nothing to delete", self.source.subject());
            return Ok(RemediationOutcome::Empty);
        };
        match self.source.delete(&victim.key).await {
            Ok(size) => {
                info!(
                    "Remediation: deleted '{}' ({size} bytes) from '{}'",
                    victim.key,
                    self.source.subject()
                );
                Ok(RemediationOutcome::Deleted {
                    key: victim.key.clone(),
                    size,
                })
            }
            Err(SourceError::NotFound { .. }) => {
                info!("Remediation: '{}' was deleted concurrently", victim.key);
                Ok(RemediationOutcome::Vanished {
                    key: victim.key.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Runs the cleaner once per received notification until shutdown.
pub async fn run_cleaner(
    cleaner: Cleaner,
    mut notifications: mpsc::Receiver<AlarmNotification>,
    status: Arc<RwLock<MonitorStatus>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let notification = tokio::select! {
            notification = notifications.recv() => notification,
            _ = shutdown.changed() => None,
        };
        let Some(notification) = notification else {
            break;
        };
        info!(
            "Remediation triggered by alarm raised at {} (metric {})",
            notification.raised_at, notification.metric
        );
        match cleaner.clean().await {
            Ok(outcome) => {
                let mut status = status.write().await;
                status.remediations += 1;
                status.last_remediation = Some(outcome);
            }
            Err(e) => error!("Remediation failed: {e}"),
        }
    }
    info!("Cleaner stopped");
}
