/// Writes the demo objects to a running monitor and prints the rendered history.
use clap::Parser;
use colored::Colorize;
use quota_monitor::driver::{run_scenario, DriverConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quota_monitor::logging::init_logging("[quota-driver]".green());

    let config = DriverConfig::parse();
    let rendered = run_scenario(&config).await?;
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}
