//! Append-only stores read and written by the pipeline: the size history and the
//! structured delta log.

use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use quota_types::error::{DetailedError, ErrorResponse};
use serde::Serialize;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod history;
pub mod log_stream;

pub use history::{HistoryStore, MemoryHistoryStore};
pub use log_stream::{LogStream, MemoryLogStream};

/// An error returned by the history store or the log stream.
#[derive(Clone, Error, Debug, Serialize)]
pub enum StoreError {
    /// The call did not return within its time budget.
    #[error("{operation} did not complete within {} ms", .timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The store could not be reached.
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    /// A range query whose start lies after its end.
    #[error("Invalid time range: start ({from}) is after end ({to})")]
    InvalidRange { from: i64, to: i64 },
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

impl DetailedError for StoreError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::Timeout { .. } => Cow::from("StoreTimeout"),
            Self::Unavailable { .. } => Cow::from("StoreUnavailable"),
            Self::InvalidRange { .. } => Cow::from("InvalidTimeRange"),
        }
    }
}

impl ResponseError for StoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRange { .. } => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}

/// Runs a store call with a time budget, mapping expiry to [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Timeout { operation, timeout }),
    }
}

#[cfg(test)]
mod test {
    use super::{with_timeout, StoreError};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let result: Result<(), StoreError> = with_timeout(
            "history append",
            Duration::from_millis(100),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            },
        )
        .await;
        let error = result.unwrap_err();
        assert!(error.is_transient());
        assert_eq!(
            error.to_string(),
            "history append did not complete within 100 ms"
        );
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout("log query", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
