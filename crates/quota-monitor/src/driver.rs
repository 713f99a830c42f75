//! External load driver: writes a few objects through the HTTP boundary of the
//! monitor and renders the resulting history.

use clap::Parser;
use log::info;
use quota_types::error::ErrorResponse;
use quota_types::render::RenderResponse;
use quota_types::ObjectSummary;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Objects written by the scenario, in order.
pub const SCENARIO: [(&str, &str); 3] = [
    ("assignment1.txt", "Empty Assignment 1"),
    ("assignment2.txt", "Empty Assignment 2222222222"),
    ("assignment3.txt", "33"),
];

#[derive(Parser, Debug, Clone)]
#[command(
    name = "quota-driver",
    about = "Generates load against a running quota monitor.",
    version
)]
pub struct DriverConfig {
    /// Base URL of the monitor.
    #[arg(long, env = "QUOTA_HOST", default_value_t = String::from("http://127.0.0.1:8080"))]
    pub host: String,

    /// Pause (in milliseconds) between two writes.
    #[arg(long, env = "QUOTA_DRIVER_PAUSE_MS", default_value_t = 2_000)]
    pub pause_ms: u64,

    /// Time (in milliseconds) given to the pipeline after the last write before
    /// the history is rendered.
    #[arg(long, env = "QUOTA_DRIVER_SETTLE_MS", default_value_t = 5_000)]
    pub settle_ms: u64,

    /// Subject to render. The monitor's own subject is used when omitted.
    #[arg(long, env = "QUOTA_SUBJECT")]
    pub subject: Option<String>,

    /// Timeout (in seconds) of a single HTTP request.
    #[arg(long, env = "QUOTA_DRIVER_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(ThisError, Debug)]
pub enum DriverError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("monitor responded with {status}: {message}")]
    Status { status: u16, message: String },
}

pub struct Driver {
    client: reqwest::Client,
    host: String,
}

impl Driver {
    pub fn new(host: &str, timeout: Duration) -> Result<Self, DriverError> {
        let client = reqwest::ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    pub async fn put_object(
        &self,
        key: &str,
        content: &str,
    ) -> Result<ObjectSummary, DriverError> {
        let response = self
            .client
            .put(format!("{}/v0/objects/{key}", self.host))
            .body(content.to_string())
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn render(&self, subject: Option<&str>) -> Result<RenderResponse, DriverError> {
        let mut request = self.client.get(format!("{}/v0/render", self.host));
        if let Some(subject) = subject {
            request = request.query(&[("subject", subject)]);
        }
        Ok(check(request.send().await?).await?.json().await?)
    }
}

/// Turns a non-success response into [`DriverError::Status`], keeping the
/// server's message when the body is an [`ErrorResponse`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, DriverError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    Err(DriverError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Writes the scenario objects with a pause between them, waits for the pipeline
/// to settle and renders the history.
pub async fn run_scenario(config: &DriverConfig) -> Result<RenderResponse, DriverError> {
    let driver = Driver::new(&config.host, Duration::from_secs(config.timeout_secs))?;
    for (i, (key, content)) in SCENARIO.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(config.pause_ms)).await;
        }
        let created = driver.put_object(key, content).await?;
        info!("Stored {} ({} bytes)", created.key, created.size);
    }
    tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
    driver.render(config.subject.as_deref()).await
}

#[cfg(test)]
mod test {
    use super::{run_scenario, Driver, DriverConfig, DriverError};
    use clap::{CommandFactory, Parser};
    use quota_types::render::RenderResponse;
    use quota_types::ObjectSummary;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rendered() -> RenderResponse {
        RenderResponse {
            subject: "quota-bucket".to_string(),
            artifact_ref: Some("plot".to_string()),
            max_ever: 47,
            points_in_window: 3,
            window_from: 0,
            window_to: 30_000,
            message: None,
        }
    }

    #[test]
    fn every_option_has_an_environment_variable() {
        for arg in DriverConfig::command().get_arguments() {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            assert!(
                arg.get_env().is_some(),
                "--{} has no environment variable",
                arg.get_id()
            );
        }
    }

    #[tokio::test]
    async fn scenario_writes_objects_then_renders() {
        let server = MockServer::start().await;
        for (key, content, size) in [
            ("assignment1.txt", "Empty Assignment 1", 18),
            ("assignment2.txt", "Empty Assignment 2222222222", 27),
            ("assignment3.txt", "33", 2),
        ] {
            Mock::given(method("PUT"))
                .and(path(format!("/v0/objects/{key}")))
                .and(body_string(content))
                .respond_with(
                    ResponseTemplate::new(201).set_body_json(ObjectSummary::new(key, size)),
                )
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/v0/render"))
            .and(query_param("subject", "quota-bucket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rendered()))
            .expect(1)
            .mount(&server)
            .await;

        let host = server.uri();
        let config = DriverConfig::parse_from([
            "quota-driver",
            "--host",
            host.as_str(),
            "--pause-ms",
            "0",
            "--settle-ms",
            "0",
            "--subject",
            "quota-bucket",
        ]);
        let response = run_scenario(&config).await.unwrap();
        assert_eq!(response, rendered());
    }

    #[tokio::test]
    async fn error_response_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/render"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "message": "History store call 'query_range' timed out after 5s",
                "error_code": "StoreTimeout",
                "details": {}
            })))
            .mount(&server)
            .await;

        let driver = Driver::new(&server.uri(), Duration::from_secs(5)).unwrap();
        match driver.render(None).await {
            Err(DriverError::Status { status, message }) => {
                assert_eq!(status, 503);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_monitor_is_an_http_error() {
        let driver = Driver::new("http://127.0.0.1:1/", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            driver.put_object("a", "b").await,
            Err(DriverError::Http(_))
        ));
    }
}
