use actix_web::http::StatusCode;
use actix_web::ResponseError;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{borrow::Cow, error::Error as StdError};
use utoipa::ToSchema;

/// Body returned by every HTTP endpoint of the monitor on error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message.
    #[schema(example = "Invalid window: 'from' (300) is after 'to' (150)")]
    pub message: String,
    /// Name identifying the type of error.
    #[schema(example = "InvalidWindow")]
    pub error_code: Cow<'static, str>,
    /// Error metadata, whose shape depends on `error_code`.
    #[schema(value_type = Object)]
    pub details: JsonValue,
}

/// Implemented by every error that can be turned into an [`ErrorResponse`].
///
/// The message comes from `Display`, the status code from `ResponseError` and the
/// details from the `Serialize` implementation.
pub trait DetailedError: StdError + ResponseError + Serialize {
    /// Identifying name of the error.
    fn error_code(&self) -> Cow<'static, str>;
}

impl<E> From<&E> for ErrorResponse
where
    E: DetailedError,
{
    fn from(error: &E) -> ErrorResponse {
        Self::from_error(error)
    }
}

impl ErrorResponse {
    /// Builds the response and logs it at a level matching who caused it:
    /// client errors and unavailability at `info`, everything else at `error`.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        let response = Self::from_error_nolog(error);
        let status = error.status_code();
        if status.is_client_error() || status == StatusCode::SERVICE_UNAVAILABLE {
            info!(
                "[HTTP error] {} {}: {}",
                status, response.error_code, response.message
            );
        } else {
            error!(
                "[HTTP error (caused by implementation)] {} {}: {}",
                status, response.error_code, response.message
            );
        }
        response
    }

    pub fn from_error_nolog<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        let details = serde_json::to_value(error).unwrap_or_else(|e| {
            JsonValue::String(format!("Failed to serialize error. Details: '{e}'"))
        });
        Self {
            message: error.to_string(),
            error_code: error.error_code(),
            details,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DetailedError, ErrorResponse};
    use actix_web::{http::StatusCode, ResponseError};
    use serde::Serialize;
    use std::borrow::Cow;
    use std::fmt;

    #[derive(Debug, Serialize)]
    struct UnknownThing {
        name: String,
    }

    impl fmt::Display for UnknownThing {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Unknown thing '{}'", self.name)
        }
    }

    impl std::error::Error for UnknownThing {}

    impl ResponseError for UnknownThing {
        fn status_code(&self) -> StatusCode {
            StatusCode::NOT_FOUND
        }
    }

    impl DetailedError for UnknownThing {
        fn error_code(&self) -> Cow<'static, str> {
            Cow::from("UnknownThing")
        }
    }

    #[test]
    fn response_carries_message_code_and_details() {
        let error = UnknownThing {
            name: "plot".to_string(),
        };
        let response = ErrorResponse::from(&error);
        assert_eq!(response.message, "Unknown thing 'plot'");
        assert_eq!(response.error_code, "UnknownThing");
        assert_eq!(response.details["name"], "plot");
    }
}
