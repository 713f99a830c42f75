use crate::api::main::ServerState;
use crate::error::MonitorError;
use crate::source::EventSource;
use actix_web::{
    get,
    web::{self, Data as WebData},
    HttpResponse,
};
use quota_types::render::RenderParameters;

/// Render the size history of a subject.
///
/// The chart is stored as an object under the artifact key and can be fetched
/// with `GET /v0/artifacts/{key}`. A window without observations is not an
/// error: the response then carries no artifact reference.
#[utoipa::path(
    context_path = "/v0",
    params(RenderParameters),
    responses(
        (status = OK, description = "History rendered", body = RenderResponse),
        (status = BAD_REQUEST, description = "Invalid window", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "History store unreachable", body = ErrorResponse)
    ),
    tag = "Render"
)]
#[get("/render")]
pub(crate) async fn render(
    state: WebData<ServerState>,
    query: web::Query<RenderParameters>,
) -> Result<HttpResponse, MonitorError> {
    let RenderParameters { subject, from, to } = query.into_inner();
    let response = state.monitor.renderer.render(subject, from, to).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[utoipa::path(
    context_path = "/v0",
    params(("key" = String, Path, description = "Artifact key returned by the render endpoint")),
    responses(
        (status = OK, description = "Rendered chart", content_type = "image/svg+xml", body = String),
        (status = NOT_FOUND, description = "No such artifact", body = ErrorResponse)
    ),
    tag = "Render"
)]
#[get("/artifacts/{key}")]
pub(crate) async fn get_artifact(
    state: WebData<ServerState>,
    path: web::Path<String>,
) -> Result<HttpResponse, MonitorError> {
    let chart = state.monitor.source.get(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().content_type("image/svg+xml").body(chart))
}
