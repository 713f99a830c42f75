use actix_web::{
    body::BoxBody, http::StatusCode, HttpResponse, HttpResponseBuilder, ResponseError,
};
use quota_types::error::{DetailedError, ErrorResponse};
use serde::Serialize;
use std::time::Duration;
use std::{borrow::Cow, error::Error as StdError, fmt, fmt::Display};

/// Errors caused by the parameters of an HTTP request.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApiError {
    InvalidWindow { from: i64, to: i64 },
    UnknownQueue { name: String },
    LockTimeout { value: String, timeout: Duration },
}

impl DetailedError for ApiError {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::InvalidWindow { .. } => Cow::from("InvalidWindow"),
            Self::UnknownQueue { .. } => Cow::from("UnknownQueue"),
            Self::LockTimeout { .. } => Cow::from("LockTimeout"),
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWindow { from, to } => {
                write!(f, "Invalid window: 'from' ({from}) is after 'to' ({to})")
            }
            Self::UnknownQueue { name } => {
                write!(f, "Unknown queue '{name}'; valid queues are: 'size-ledger' or 'delta-logger'")
            }
            Self::LockTimeout { value, timeout } => {
                write!(
                    f,
                    "Unable to read {value} within {} ms",
                    timeout.as_millis()
                )
            }
        }
    }
}

impl From<ApiError> for ErrorResponse {
    fn from(val: ApiError) -> Self {
        ErrorResponse::from(&val)
    }
}

impl StdError for ApiError {}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidWindow { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownQueue { .. } => StatusCode::NOT_FOUND,
            Self::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponseBuilder::new(self.status_code()).json(ErrorResponse::from_error(self))
    }
}
