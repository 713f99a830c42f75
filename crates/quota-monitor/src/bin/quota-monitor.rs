/// A binary that runs the monitoring pipeline together with its HTTP API.
use clap::Parser;
use colored::Colorize;
use object_store::memory::InMemory;
use quota_monitor::api::main::ApiDoc;
use quota_monitor::clock::SystemClock;
use quota_monitor::config::MonitorConfig;
use quota_monitor::monitor::Monitor;
use std::sync::Arc;
use utoipa::OpenApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let name = "[quota-monitor]".cyan();
    quota_monitor::logging::init_logging(name);

    let config = MonitorConfig::parse();
    if config.dump_openapi {
        let openapi_json = ApiDoc::openapi().to_pretty_json()?;
        tokio::fs::write("openapi.json", openapi_json.as_bytes()).await?;
        return Ok(());
    }
    config.validate()?;

    let monitor = Arc::new(
        Monitor::new(
            config.clone(),
            Arc::new(InMemory::new()),
            Arc::new(SystemClock),
        )
        .await,
    );
    let handle = monitor.start();
    let served = quota_monitor::api::main::run(&config, monitor).await;
    handle.shutdown().await;
    served
}
