//! Object store boundary used by the driver.

use crate::api::main::ServerState;
use crate::error::MonitorError;
use crate::source::EventSource;
use actix_web::{
    delete, get, put,
    web::{self, Bytes, Data as WebData},
    HttpResponse,
};
use quota_types::ObjectSummary;

#[utoipa::path(
    context_path = "/v0",
    params(("key" = String, Path, description = "Object key")),
    request_body(content = String, content_type = "application/octet-stream", description = "Object content"),
    responses(
        (status = CREATED, description = "Object stored", body = ObjectSummary),
        (status = BAD_REQUEST, description = "Invalid object key", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "Object store unavailable", body = ErrorResponse)
    ),
    tag = "Objects"
)]
#[put("/objects/{key}")]
pub(crate) async fn put_object(
    state: WebData<ServerState>,
    path: web::Path<String>,
    body: Bytes,
) -> Result<HttpResponse, MonitorError> {
    let key = path.into_inner();
    let size = state.monitor.source.put(&key, body).await?;
    Ok(HttpResponse::Created().json(ObjectSummary::new(key, size)))
}

#[utoipa::path(
    context_path = "/v0",
    params(("key" = String, Path, description = "Object key")),
    responses(
        (status = OK, description = "Object deleted", body = ObjectSummary),
        (status = NOT_FOUND, description = "Object does not exist", body = ErrorResponse)
    ),
    tag = "Objects"
)]
#[delete("/objects/{key}")]
pub(crate) async fn delete_object(
    state: WebData<ServerState>,
    path: web::Path<String>,
) -> Result<HttpResponse, MonitorError> {
    let key = path.into_inner();
    let size = state.monitor.source.delete(&key).await?;
    Ok(HttpResponse::Ok().json(ObjectSummary::new(key, size)))
}

#[utoipa::path(
    context_path = "/v0",
    responses(
        (status = OK, description = "Objects currently stored", body = [ObjectSummary]),
        (status = SERVICE_UNAVAILABLE, description = "Object store unavailable", body = ErrorResponse)
    ),
    tag = "Objects"
)]
#[get("/objects")]
pub(crate) async fn list_objects(
    state: WebData<ServerState>,
) -> Result<HttpResponse, MonitorError> {
    Ok(HttpResponse::Ok().json(state.monitor.source.list().await?))
}

#[utoipa::path(
    context_path = "/v0",
    params(("key" = String, Path, description = "Object key")),
    responses(
        (status = OK, description = "Object content", content_type = "application/octet-stream", body = String),
        (status = NOT_FOUND, description = "Object does not exist", body = ErrorResponse)
    ),
    tag = "Objects"
)]
#[get("/objects/{key}")]
pub(crate) async fn get_object(
    state: WebData<ServerState>,
    path: web::Path<String>,
) -> Result<HttpResponse, MonitorError> {
    let content = state.monitor.source.get(&path.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(content))
}
