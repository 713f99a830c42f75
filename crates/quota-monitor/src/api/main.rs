use crate::api::endpoints;
use crate::config::MonitorConfig;
use crate::monitor::Monitor;
use actix_http::body::BoxBody;
use actix_http::StatusCode;
use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::Method;
use actix_web::{get, web, web::Data as WebData, App, HttpResponse, HttpServer, Scope};
use anyhow::{Context, Result as AnyResult};
use futures_util::FutureExt;
use log::{error, info, log, trace, Level};
use std::net::TcpListener;
use std::sync::Arc;
use tokio::signal;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storage quota monitor API",
        description = r"
The monitor watches a bucket of objects. Every object created or removed is
accounted twice: as a new total size sample in the size history, and as a signed
size delta in the delta log.

When the sum of the deltas over the trailing window exceeds the threshold, the
alarm is raised once and the largest object is deleted. That deletion flows
through the same pipeline and normally brings the alarm back to OK.
"
    ),
    paths(
        endpoints::objects::put_object,
        endpoints::objects::delete_object,
        endpoints::objects::list_objects,
        endpoints::objects::get_object,
        endpoints::render::render,
        endpoints::render::get_artifact,
        endpoints::status::get_status,
        endpoints::status::get_dead_letters,
    ),
    components(schemas(
        quota_types::error::ErrorResponse,
        quota_types::ObjectSummary,
        quota_types::StorageEvent,
        quota_types::StorageEventType,
        quota_types::render::RenderResponse,
        quota_types::status::AlarmState,
        quota_types::status::DeadLetter,
        quota_types::status::MonitorStatus,
        quota_types::status::QueueStats,
        quota_types::status::RemediationOutcome,
    )),
    tags(
        (name = "Objects", description = "Create, read and delete objects of the monitored bucket."),
        (name = "Render", description = "Render the size history."),
        (name = "Status", description = "Alarm, remediation and queue status."),
    ),
)]
pub struct ApiDoc;

pub struct ServerState {
    pub monitor: Arc<Monitor>,
}

impl ServerState {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}

// The scope for all API endpoints, under the /v0 prefix.
pub(crate) fn api_scope() -> Scope {
    web::scope("/v0")
        .service(endpoints::objects::put_object)
        .service(endpoints::objects::delete_object)
        .service(endpoints::objects::list_objects)
        .service(endpoints::objects::get_object)
        .service(endpoints::render::render)
        .service(endpoints::render::get_artifact)
        .service(endpoints::status::get_status)
        .service(endpoints::status::get_dead_letters)
}

pub(crate) fn public_scope() -> Scope {
    web::scope("").service(healthz).service(openapi_json)
}

/// Logs the responses of the HTTP server.
pub fn log_response(
    res: Result<ServiceResponse<BoxBody>, actix_web::Error>,
) -> Result<ServiceResponse<BoxBody>, actix_web::Error> {
    match &res {
        Ok(response) => {
            let req = response.request();
            let level = if response.status().is_success()
                || response.status().is_informational()
                || response.status().is_redirection()
            {
                if req.method() == Method::GET && req.path() == "/healthz" {
                    Level::Trace
                } else {
                    Level::Debug
                }
            } else if response.status().is_client_error()
                || response.status() == StatusCode::SERVICE_UNAVAILABLE
            {
                Level::Info
            } else {
                Level::Error
            };
            log!(
                level,
                "Response: {} (size: {:?}) to request {} {}",
                response.status(),
                response.response().body().size(),
                req.method(),
                req.path()
            );
        }
        Err(e) => {
            error!("Service response error: {e}");
        }
    }
    res
}

/// Serves the HTTP API until Ctrl+C or SIGTERM.
pub async fn run(config: &MonitorConfig, monitor: Arc<Monitor>) -> AnyResult<()> {
    let listener = TcpListener::bind((config.bind_address.clone(), config.http_port))
        .with_context(|| {
            format!(
                "HTTP server unable to bind listener to {}:{} -- is the port occupied?",
                config.bind_address, config.http_port
            )
        })?;
    let state = WebData::new(ServerState::new(monitor));
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap_fn(|req, srv| {
                trace!("Request: {} {}", req.method(), req.path());
                srv.call(req).map(log_response)
            })
            .service(api_scope())
            .service(public_scope())
    })
    .workers(config.http_workers)
    .listen(listener)
    .context("HTTP server unable to listen")?
    .run();
    info!(
        "HTTP server: ready on {}:{} ({} workers)",
        config.bind_address, config.http_port, config.http_workers
    );

    // Arrange for graceful shutdown on Ctrl+C and SIGTERM
    let server_handle_ctrlc = server.handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping HTTP server...");
            server_handle_ctrlc.stop(true).await;
        }
    });
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        let mut term_stream =
            unix_signal(SignalKind::terminate()).context("unable to install SIGTERM handler")?;
        let server_handle_term = server.handle();
        tokio::spawn(async move {
            term_stream.recv().await;
            info!("SIGTERM received, stopping HTTP server...");
            server_handle_term.stop(true).await;
        });
    }

    server.await?;
    Ok(())
}

/// This is an internal endpoint and as such is not exposed via OpenAPI
#[get("/healthz")]
async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" }))
}

#[get("/api-doc/openapi.json")]
async fn openapi_json() -> HttpResponse {
    HttpResponse::Ok().json(ApiDoc::openapi())
}
