//! Request and response types of the render endpoint.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters of `GET /v0/render`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct RenderParameters {
    /// Subject whose history is rendered.
    pub subject: Option<String>,
    /// Start of the window (epoch milliseconds, inclusive).
    /// Defaults to the trailing render window ending at `to`.
    pub from: Option<i64>,
    /// End of the window (epoch milliseconds, inclusive). Defaults to now.
    pub to: Option<i64>,
}

/// Outcome of a successful render request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub subject: String,
    /// Key of the stored chart, or `None` when the window held no observations.
    pub artifact_ref: Option<String>,
    /// Largest size ever observed for the subject.
    pub max_ever: u64,
    /// Number of observations drawn.
    pub points_in_window: usize,
    pub window_from: i64,
    pub window_to: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
