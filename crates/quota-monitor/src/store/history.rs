use crate::store::StoreError;
use async_trait::async_trait;
use quota_types::SizeObservation;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Time series of [`SizeObservation`]s keyed by `(subject, timestamp)`.
///
/// Rows are never updated or deleted by the pipeline. Concurrent writers need no
/// coordination: a second row with the same key replaces the first.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, observation: SizeObservation) -> Result<(), StoreError>;

    /// Rows of `subject` with `ts_from <= timestamp <= ts_to`, in timestamp order.
    async fn query_range(
        &self,
        subject: &str,
        ts_from: i64,
        ts_to: i64,
    ) -> Result<Vec<SizeObservation>, StoreError>;

    /// Largest size ever recorded for `subject`.
    async fn max_size(&self, subject: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .query_range(subject, i64::MIN, i64::MAX)
            .await?
            .into_iter()
            .map(|observation| observation.size_bytes)
            .max())
    }
}

/// History store held in process memory.
#[derive(Default)]
pub struct MemoryHistoryStore {
    rows: RwLock<BTreeMap<(String, i64), SizeObservation>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, observation: SizeObservation) -> Result<(), StoreError> {
        let key = (observation.subject.clone(), observation.timestamp);
        self.rows.write().await.insert(key, observation);
        Ok(())
    }

    async fn query_range(
        &self,
        subject: &str,
        ts_from: i64,
        ts_to: i64,
    ) -> Result<Vec<SizeObservation>, StoreError> {
        if ts_from > ts_to {
            return Err(StoreError::InvalidRange {
                from: ts_from,
                to: ts_to,
            });
        }
        let rows = self.rows.read().await;
        Ok(rows
            .range((subject.to_string(), ts_from)..=(subject.to_string(), ts_to))
            .map(|(_, observation)| observation.clone())
            .collect())
    }
}
