//! This module implements [`enum MonitorError`], the top-level error type
//! returned by HTTP endpoints.
//!
//! ```text
//! MonitorError (this module)
//! ├─ source::SourceError (errors of the monitored object store)
//! ├─ store::StoreError (errors of the history store and the log stream)
//! ├─ api::ApiError (errors caused by request parameters)
//! ```
//!
//! The response body is a JSON serialization of `quota_types::error::ErrorResponse`.

use crate::api::error::ApiError;
use crate::source::SourceError;
use crate::store::StoreError;
use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use quota_types::error::{DetailedError, ErrorResponse};
use serde::Serialize;
use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt::{Display, Error as FmtError, Formatter},
};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MonitorError {
    SourceError {
        #[serde(flatten)]
        source_error: SourceError,
    },
    StoreError {
        #[serde(flatten)]
        store_error: StoreError,
    },
    ApiError {
        #[serde(flatten)]
        api_error: ApiError,
    },
}

impl StdError for MonitorError {}

impl From<SourceError> for MonitorError {
    fn from(source_error: SourceError) -> Self {
        Self::SourceError { source_error }
    }
}

impl From<StoreError> for MonitorError {
    fn from(store_error: StoreError) -> Self {
        Self::StoreError { store_error }
    }
}

impl From<ApiError> for MonitorError {
    fn from(api_error: ApiError) -> Self {
        Self::ApiError { api_error }
    }
}

impl Display for MonitorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::SourceError { source_error } => source_error.fmt(f),
            Self::StoreError { store_error } => store_error.fmt(f),
            Self::ApiError { api_error } => api_error.fmt(f),
        }
    }
}

impl ResponseError for MonitorError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::SourceError { source_error } => source_error.status_code(),
            Self::StoreError { store_error } => store_error.status_code(),
            Self::ApiError { api_error } => api_error.status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}

impl DetailedError for MonitorError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::SourceError { source_error } => source_error.error_code(),
            Self::StoreError { store_error } => store_error.error_code(),
            Self::ApiError { api_error } => api_error.error_code(),
        }
    }
}
