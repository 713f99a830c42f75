use crate::store::StoreError;
use async_trait::async_trait;
use quota_types::DeltaLogRecord;
use tokio::sync::RwLock;

/// Append-only, queryable stream of [`DeltaLogRecord`]s.
#[async_trait]
pub trait LogStream: Send + Sync {
    async fn append(&self, record: DeltaLogRecord) -> Result<(), StoreError>;

    /// Records with `ts_from <= timestamp < ts_to`.
    async fn query_range(&self, ts_from: i64, ts_to: i64)
        -> Result<Vec<DeltaLogRecord>, StoreError>;

    /// Most recently appended record for `key` in `subject`.
    async fn last_for_key(
        &self,
        subject: &str,
        key: &str,
    ) -> Result<Option<DeltaLogRecord>, StoreError>;
}

/// Log stream held in process memory, in append order.
#[derive(Default)]
pub struct MemoryLogStream {
    records: RwLock<Vec<DeltaLogRecord>>,
}

impl MemoryLogStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl LogStream for MemoryLogStream {
    async fn append(&self, record: DeltaLogRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn query_range(
        &self,
        ts_from: i64,
        ts_to: i64,
    ) -> Result<Vec<DeltaLogRecord>, StoreError> {
        if ts_from > ts_to {
            return Err(StoreError::InvalidRange {
                from: ts_from,
                to: ts_to,
            });
        }
        // Concurrent writers may append slightly out of timestamp order, so the
        // whole stream is scanned instead of bisected.
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.timestamp >= ts_from && record.timestamp < ts_to)
            .cloned()
            .collect())
    }

    async fn last_for_key(
        &self,
        subject: &str,
        key: &str,
    ) -> Result<Option<DeltaLogRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .find(|record| record.subject == subject && record.key == key)
            .cloned())
    }
}
