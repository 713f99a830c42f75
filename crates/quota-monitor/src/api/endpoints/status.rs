use crate::api::error::ApiError;
use crate::api::main::ServerState;
use crate::error::MonitorError;
use actix_web::{
    get,
    web::{self, Data as WebData},
    HttpResponse,
};
use std::time::Duration;

/// Upper bound on waiting for the status lock held by the evaluator or cleaner.
pub const STATUS_READ_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Alarm state, last evaluation and per-queue statistics.
#[utoipa::path(
    context_path = "/v0",
    responses(
        (status = OK, description = "Current monitor status", body = MonitorStatus),
        (status = SERVICE_UNAVAILABLE, description = "Status temporarily unavailable", body = ErrorResponse)
    ),
    tag = "Status"
)]
#[get("/status")]
pub(crate) async fn get_status(state: WebData<ServerState>) -> Result<HttpResponse, MonitorError> {
    let mut status =
        match tokio::time::timeout(STATUS_READ_LOCK_TIMEOUT, state.monitor.status.read()).await {
            Ok(status) => status.clone(),
            Err(_elapsed) => {
                return Err(MonitorError::from(ApiError::LockTimeout {
                    value: "monitor status".to_string(),
                    timeout: STATUS_READ_LOCK_TIMEOUT,
                }));
            }
        };
    status.queues = state.monitor.queue_stats().await;
    Ok(HttpResponse::Ok().json(status))
}

#[utoipa::path(
    context_path = "/v0",
    params(("name" = String, Path, description = "Queue name: `size-ledger` or `delta-logger`")),
    responses(
        (status = OK, description = "Messages moved out of the queue after too many receives", body = [DeadLetter]),
        (status = NOT_FOUND, description = "Unknown queue", body = ErrorResponse)
    ),
    tag = "Status"
)]
#[get("/queues/{name}/dead_letters")]
pub(crate) async fn get_dead_letters(
    state: WebData<ServerState>,
    path: web::Path<String>,
) -> Result<HttpResponse, MonitorError> {
    let name = path.into_inner();
    let Some(queue) = state.monitor.queue(&name) else {
        return Err(ApiError::UnknownQueue { name }.into());
    };
    Ok(HttpResponse::Ok().json(queue.dead_letters().await))
}
