//! Rendering of the size history as an SVG line chart.
//!
//! The chart is stored in the event source under the artifact key, so writing it
//! is an ordinary mutation that the pipeline accounts for.

use crate::api::error::ApiError;
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::source::EventSource;
use crate::store::{with_timeout, HistoryStore};
use bytes::Bytes;
use log::info;
use quota_types::render::RenderResponse;
use quota_types::SizeObservation;
use std::sync::Arc;
use std::time::Duration;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 400.0;
const MARGIN: f64 = 60.0;

pub const NO_DATA_MESSAGE: &str = "No data yet";

pub struct Renderer {
    history: Arc<dyn HistoryStore>,
    source: Arc<dyn EventSource>,
    clock: Arc<dyn Clock>,
    artifact_key: String,
    default_window: Duration,
    store_timeout: Duration,
}

impl Renderer {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        source: Arc<dyn EventSource>,
        clock: Arc<dyn Clock>,
        artifact_key: impl Into<String>,
        default_window: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            history,
            source,
            clock,
            artifact_key: artifact_key.into(),
            default_window,
            store_timeout,
        }
    }

    /// Draws the observations of `subject` with `from <= timestamp <= to` and
    /// stores the chart. `to` defaults to now and `from` to the default window
    /// before `to`.
    pub async fn render(
        &self,
        subject: Option<String>,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<RenderResponse, MonitorError> {
        let subject = subject.unwrap_or_else(|| self.source.subject().to_string());
        let to = to.unwrap_or_else(|| self.clock.now_millis());
        let window_ms = i64::try_from(self.default_window.as_millis()).unwrap_or(i64::MAX);
        let from = from.unwrap_or_else(|| to.saturating_sub(window_ms));
        if from > to {
            return Err(ApiError::InvalidWindow { from, to }.into());
        }

        let points = with_timeout(
            "history query",
            self.store_timeout,
            self.history.query_range(&subject, from, to),
        )
        .await?;
        let max_ever = with_timeout(
            "history query",
            self.store_timeout,
            self.history.max_size(&subject),
        )
        .await?
        .unwrap_or(0);

        let mut response = RenderResponse {
            subject,
            artifact_ref: None,
            max_ever,
            points_in_window: points.len(),
            window_from: from,
            window_to: to,
            message: None,
        };
        if points.is_empty() {
            response.message = Some(NO_DATA_MESSAGE.to_string());
            return Ok(response);
        }

        let chart = render_svg(&response.subject, &points, max_ever);
        self.source
            .put(&self.artifact_key, Bytes::from(chart))
            .await?;
        info!(
            "Rendered {} observations of '{}' to '{}'",
            points.len(),
            response.subject,
            self.artifact_key
        );
        response.artifact_ref = Some(self.artifact_key.clone());
        Ok(response)
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Line chart of size over seconds since the first point, with a dashed line at
/// the historical high. `points` must be sorted by timestamp.
pub fn render_svg(subject: &str, points: &[SizeObservation], max_ever: u64) -> String {
    let first_ts = points.first().map_or(0, |p| p.timestamp);
    let last_ts = points.last().map_or(0, |p| p.timestamp);
    let x_range = ((last_ts - first_ts) as f64 / 1000.0).max(1.0);
    let y_max = points
        .iter()
        .map(|p| p.size_bytes)
        .chain(std::iter::once(max_ever))
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let plot_width = WIDTH - 2.0 * MARGIN;
    let plot_height = HEIGHT - 2.0 * MARGIN;
    let x = |ts: i64| MARGIN + ((ts - first_ts) as f64 / 1000.0) / x_range * plot_width;
    let y = |bytes: u64| HEIGHT - MARGIN - bytes as f64 / y_max * plot_height;

    let polyline = points
        .iter()
        .map(|p| format!("{:.1},{:.1}", x(p.timestamp), y(p.size_bytes)))
        .collect::<Vec<_>>()
        .join(" ");
    let high = y(max_ever);
    let bottom = HEIGHT - MARGIN;
    let right = WIDTH - MARGIN;

    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n"
    ));
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"30\" text-anchor=\"middle\" font-size=\"16\">Size of {}</text>\n",
        WIDTH / 2.0,
        escape_xml(subject)
    ));
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN}\" y1=\"{bottom}\" x2=\"{right}\" y2=\"{bottom}\" stroke=\"black\"/>\n"
    ));
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN}\" y1=\"{MARGIN}\" x2=\"{MARGIN}\" y2=\"{bottom}\" stroke=\"black\"/>\n"
    ));
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"12\">Seconds since first point ({:.0} s shown)</text>\n",
        WIDTH / 2.0,
        HEIGHT - 20.0,
        x_range
    ));
    svg.push_str(&format!(
        "  <text x=\"20\" y=\"{}\" transform=\"rotate(-90 20 {})\" text-anchor=\"middle\" font-size=\"12\">Bytes</text>\n",
        HEIGHT / 2.0,
        HEIGHT / 2.0
    ));
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN}\" y1=\"{high:.1}\" x2=\"{right}\" y2=\"{high:.1}\" stroke=\"red\" stroke-dasharray=\"6 4\"/>\n"
    ));
    svg.push_str(&format!(
        "  <text x=\"{right}\" y=\"{:.1}\" text-anchor=\"end\" font-size=\"12\" fill=\"red\">Historical high: {max_ever} bytes</text>\n",
        high - 6.0
    ));
    svg.push_str(&format!(
        "  <polyline fill=\"none\" stroke=\"steelblue\" stroke-width=\"2\" points=\"{polyline}\"/>\n"
    ));
    svg.push_str("</svg>\n");
    svg
}
