use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One row of the size history: the total size of a subject sampled at a point in time.
///
/// Rows are keyed by `(subject, timestamp)` and are append-only. Several rows per subject
/// form a time series of samples; consecutive rows are not deltas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SizeObservation {
    /// Bucket (collection) identifier.
    pub subject: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Total size of all objects in the subject.
    pub size_bytes: u64,
    /// Number of objects in the subject.
    pub object_count: u64,
}

impl SizeObservation {
    pub fn new(
        subject: impl Into<String>,
        timestamp: i64,
        size_bytes: u64,
        object_count: u64,
    ) -> Self {
        Self {
            subject: subject.into(),
            timestamp,
            size_bytes,
            object_count,
        }
    }
}
