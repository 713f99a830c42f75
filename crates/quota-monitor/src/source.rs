//! The monitored object store. Every successful mutation publishes one
//! [`StorageEvent`] on the fan-out bus.

use crate::bus::FanoutBus;
use crate::clock::Clock;
use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use log::debug;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use quota_types::error::{DetailedError, ErrorResponse};
use quota_types::{ObjectSummary, StorageEvent};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Clone, Error, Debug, Serialize)]
pub enum SourceError {
    #[error("Object '{key}' does not exist")]
    NotFound { key: String },

    #[error("Invalid object key '{key}': {message}")]
    InvalidKey { key: String, message: String },

    #[error("Object store error: {message}")]
    ObjectStore { message: String },
}

impl From<object_store::Error> for SourceError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => Self::NotFound { key: path },
            other => Self::ObjectStore {
                message: other.to_string(),
            },
        }
    }
}

impl DetailedError for SourceError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::NotFound { .. } => Cow::from("UnknownObject"),
            Self::InvalidKey { .. } => Cow::from("InvalidObjectKey"),
            Self::ObjectStore { .. } => Cow::from("ObjectStoreError"),
        }
    }
}

impl ResponseError for SourceError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidKey { .. } => StatusCode::BAD_REQUEST,
            Self::ObjectStore { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}

/// Keyed collection of objects that reports its own mutations.
///
/// Concurrent writes to the same key are serialized: the last writer wins, and
/// of two concurrent deletes of one object only the first succeeds.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// The collection this source holds.
    fn subject(&self) -> &str;

    /// Stores `data` under `key` and returns its size. Replacing an existing
    /// object also reports the removal of the previous version.
    async fn put(&self, key: &str, data: Bytes) -> Result<u64, SourceError>;

    async fn get(&self, key: &str) -> Result<Bytes, SourceError>;

    async fn size_of(&self, key: &str) -> Result<u64, SourceError>;

    /// Removes `key` and returns the size it had. [`SourceError::NotFound`] if
    /// there is no such object, including when a concurrent delete won.
    async fn delete(&self, key: &str) -> Result<u64, SourceError>;

    async fn list(&self) -> Result<Vec<ObjectSummary>, SourceError>;
}

/// [`EventSource`] backed by an [`ObjectStore`].
pub struct ObjectStoreSource {
    subject: String,
    store: Arc<dyn ObjectStore>,
    bus: Arc<FanoutBus>,
    clock: Arc<dyn Clock>,
    /// Held from the existence check until the event is published.
    mutation_lock: Mutex<()>,
}

impl ObjectStoreSource {
    pub fn new(
        subject: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        bus: Arc<FanoutBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subject: subject.into(),
            store,
            bus,
            clock,
            mutation_lock: Mutex::new(()),
        }
    }

    fn path(key: &str) -> Result<Path, SourceError> {
        if key.is_empty() {
            return Err(SourceError::InvalidKey {
                key: key.to_string(),
                message: "key cannot be empty".to_string(),
            });
        }
        Path::parse(key).map_err(|e| SourceError::InvalidKey {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn publish(&self, event: StorageEvent) {
        debug!(
            "Publishing {:?} event {} for '{}' ({} bytes)",
            event.event_type, event.event_id, event.key, event.size
        );
        // Subscribers that reject the event are reported by the bus.
        let _ = self.bus.publish(event).await;
    }
}

#[async_trait]
impl EventSource for ObjectStoreSource {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<u64, SourceError> {
        let path = Self::path(key)?;
        let size = data.len() as u64;
        let _guard = self.mutation_lock.lock().await;
        let replaced = match self.store.head(&path).await {
            Ok(meta) => Some(meta.size as u64),
            Err(object_store::Error::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        self.store.put(&path, PutPayload::from(data)).await?;
        let now = self.clock.now_millis();
        if let Some(old_size) = replaced {
            self.publish(StorageEvent::removed(&self.subject, key, old_size, now))
                .await;
        }
        self.publish(StorageEvent::created(&self.subject, key, size, now))
            .await;
        Ok(size)
    }

    async fn get(&self, key: &str) -> Result<Bytes, SourceError> {
        let path = Self::path(key)?;
        Ok(self.store.get(&path).await?.bytes().await?)
    }

    async fn size_of(&self, key: &str) -> Result<u64, SourceError> {
        let path = Self::path(key)?;
        Ok(self.store.head(&path).await?.size as u64)
    }

    async fn delete(&self, key: &str) -> Result<u64, SourceError> {
        let path = Self::path(key)?;
        let _guard = self.mutation_lock.lock().await;
        // `ObjectStore::delete` succeeds on missing keys, so existence is
        // checked under the lock.
        let size = self.store.head(&path).await?.size as u64;
        self.store.delete(&path).await?;
        self.publish(StorageEvent::removed(
            &self.subject,
            key,
            size,
            self.clock.now_millis(),
        ))
        .await;
        Ok(size)
    }

    async fn list(&self) -> Result<Vec<ObjectSummary>, SourceError> {
        let objects: Vec<_> = self.store.list(None).try_collect().await?;
        Ok(objects
            .into_iter()
            .map(|meta| ObjectSummary::new(meta.location.to_string(), meta.size as u64))
            .collect())
    }
}
