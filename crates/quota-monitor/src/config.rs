use anyhow::{bail, Result as AnyResult};
use clap::Parser;
use serde::Deserialize;
use std::thread;
use std::time::Duration;

/// Largest batch a consumer may receive from its delivery queue at once.
pub const MAX_BATCH_SIZE: usize = 10;

/// Determines the default amount of HTTP worker threads to spawn.
fn default_http_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_subject() -> String {
    "quota-bucket".to_string()
}

fn default_artifact_key() -> String {
    "plot".to_string()
}

/// Parses a batch size and checks it lies within `1..=MAX_BATCH_SIZE`.
fn parse_batch_size(s: &str) -> Result<usize, String> {
    let size = s
        .parse::<usize>()
        .map_err(|e| format!("Invalid batch size '{s}': {e}"))?;
    if size == 0 || size > MAX_BATCH_SIZE {
        return Err(format!(
            "Invalid batch size {size}: must be between 1 and {MAX_BATCH_SIZE}"
        ));
    }
    Ok(size)
}

/// Configuration of the monitor, read from command-line arguments or the environment.
#[derive(Parser, Deserialize, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct MonitorConfig {
    /// Bucket (collection) whose objects are monitored.
    #[serde(default = "default_subject")]
    #[arg(long, env = "QUOTA_SUBJECT", default_value_t = default_subject())]
    pub subject: String,

    /// Length of the trailing window (in seconds) over which size deltas are summed.
    #[arg(long, env = "QUOTA_WINDOW_SECS", default_value_t = 30)]
    pub window_secs: u64,

    /// The alarm is raised when the windowed sum of size deltas exceeds this value.
    #[arg(long, env = "QUOTA_THRESHOLD", default_value_t = 20, allow_negative_numbers = true)]
    pub threshold: i64,

    /// How often (in seconds) the alarm evaluates the windowed metric.
    #[arg(long, env = "QUOTA_EVALUATION_PERIOD_SECS", default_value_t = 30)]
    pub evaluation_period_secs: u64,

    /// Time (in seconds) a received message stays invisible to other workers
    /// before it is redelivered, unless it is acknowledged first.
    #[arg(long, env = "QUOTA_VISIBILITY_TIMEOUT_SECS", default_value_t = 30)]
    pub visibility_timeout_secs: u64,

    /// Maximum number of messages a consumer receives at once (1 to 10).
    #[arg(long, env = "QUOTA_BATCH_SIZE", default_value_t = MAX_BATCH_SIZE, value_parser = parse_batch_size)]
    pub batch_size: usize,

    /// Number of times a message may be received before it is moved to the
    /// dead-letter list of its queue.
    #[arg(long, env = "QUOTA_MAX_RECEIVE_COUNT", default_value_t = 5)]
    pub max_receive_count: u32,

    /// Maximum number of messages buffered per delivery queue.
    #[arg(long, env = "QUOTA_QUEUE_CAPACITY", default_value_t = 100_000)]
    pub queue_capacity: usize,

    /// Time budget (in seconds) for processing one message. A message that is
    /// not processed in time is abandoned and redelivered after its lease expires.
    #[arg(long, env = "QUOTA_PROCESSING_TIMEOUT_SECS", default_value_t = 30)]
    pub processing_timeout_secs: u64,

    /// How long (in seconds) an idle worker waits for messages before polling again.
    #[arg(long, env = "QUOTA_POLL_TIMEOUT_SECS", default_value_t = 5)]
    pub poll_timeout_secs: u64,

    /// Number of concurrent workers draining each delivery queue.
    #[arg(long, env = "QUOTA_WORKERS_PER_QUEUE", default_value_t = 2)]
    pub workers_per_queue: usize,

    /// Timeout (in milliseconds) of a single history store or log stream call.
    #[arg(long, env = "QUOTA_STORE_TIMEOUT_MS", default_value_t = 5_000)]
    pub store_timeout_ms: u64,

    /// Window (in seconds) rendered when a render request does not specify one.
    #[arg(long, env = "QUOTA_RENDER_WINDOW_SECS", default_value_t = 30)]
    pub render_window_secs: u64,

    /// Key under which the rendered chart is stored. Objects whose key starts
    /// with it are not considered for remediation.
    #[serde(default = "default_artifact_key")]
    #[arg(long, env = "QUOTA_ARTIFACT_KEY", default_value_t = default_artifact_key())]
    pub artifact_key: String,

    /// IP address on which the HTTP server binds.
    #[arg(long, env = "QUOTA_BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    /// Port of the HTTP server.
    #[arg(long, env = "QUOTA_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// How many HTTP worker threads to spawn.
    #[arg(long, env = "QUOTA_HTTP_WORKERS", default_value_t = default_http_workers())]
    pub http_workers: usize,

    /// [Developers only] dump the OpenAPI specification to `openapi.json` and
    /// exit immediately.
    #[serde(skip)]
    #[arg(long, env = "QUOTA_DUMP_OPENAPI")]
    pub dump_openapi: bool,
}

impl MonitorConfig {
    /// Rejects settings with which the pipeline cannot make progress.
    pub fn validate(&self) -> AnyResult<()> {
        if self.window_secs == 0 {
            bail!("window must be at least one second");
        }
        if self.evaluation_period_secs == 0 {
            bail!("evaluation period must be at least one second");
        }
        if self.visibility_timeout_secs == 0 {
            bail!("visibility timeout must be at least one second");
        }
        if self.processing_timeout_secs == 0 {
            bail!("processing timeout must be at least one second");
        }
        if self.workers_per_queue == 0 {
            bail!("at least one worker per queue is required");
        }
        if self.max_receive_count == 0 {
            bail!("maximum receive count must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue capacity must be at least 1");
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            bail!("batch size must be between 1 and {MAX_BATCH_SIZE}");
        }
        if self.artifact_key.is_empty() {
            bail!("artifact key cannot be empty");
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn evaluation_period(&self) -> Duration {
        Duration::from_secs(self.evaluation_period_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn render_window(&self) -> Duration {
        Duration::from_secs(self.render_window_secs)
    }

    /// Configuration with every option at its default value.
    pub fn with_defaults() -> Self {
        Self::parse_from(["quota-monitor"])
    }
}
