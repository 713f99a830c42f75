//! Runtime status reported by `GET /v0/status`.

use crate::StorageEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use utoipa::ToSchema;

/// State of the threshold alarm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    #[default]
    Ok,
    Alarm,
}

impl Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Alarm => write!(f, "ALARM"),
        }
    }
}

/// Result of one run of the cleaner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// The store held no objects.
    Empty,
    /// The largest candidate object was deleted.
    Deleted { key: String, size: u64 },
    /// The chosen object disappeared before it could be deleted.
    Vanished { key: String },
}

/// Counters of a single delivery queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    pub name: String,
    /// Messages ready to be received.
    pub visible: usize,
    /// Messages received but neither acknowledged nor expired.
    pub in_flight: usize,
    pub dead_lettered: usize,
    /// Total number of receives, redeliveries included.
    pub delivered_total: u64,
    pub acked_total: u64,
}

/// A message removed from its delivery queue after too many unsuccessful receives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub event: StorageEvent,
    pub receive_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Alarm evaluation and remediation status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MonitorStatus {
    pub subject: String,
    pub alarm_state: AlarmState,
    pub threshold: i64,
    pub window_secs: u64,
    /// Metric computed by the most recent successful evaluation.
    pub last_metric: Option<i64>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Number of evaluation periods skipped because of an error.
    pub failed_evaluations: u64,
    pub remediations: u64,
    pub last_remediation: Option<RemediationOutcome>,
    #[serde(default)]
    pub queues: Vec<QueueStats>,
}
