//! Frame consumer and error reporter wired into the feed client.

use tickstream_telemetry::Metrics;
use tickstream_ws::{ErrorReporter, Frame, MessageConsumer};
use tracing::{debug, trace, warn};

/// Longest text preview written to the log.
const PREVIEW_CHARS: usize = 160;

/// Logs each frame and counts it by kind.
#[derive(Debug, Default)]
pub struct LoggingConsumer;

impl MessageConsumer for LoggingConsumer {
    fn on_message(&self, frame: &Frame) {
        Metrics::ws_message(frame.kind());
        match frame {
            Frame::Text(text) => debug!(len = text.len(), preview = %preview(text), "Feed message"),
            Frame::Binary(data) => debug!(len = data.len(), "Feed binary frame"),
            Frame::Ping(_) => trace!("Feed ping"),
        }
    }
}

/// Reports transport errors to the log and the error counter.
#[derive(Debug, Default)]
pub struct MetricsReporter;

impl ErrorReporter for MetricsReporter {
    fn report(&self, message: &str) {
        Metrics::ws_error();
        warn!(error = %message, "Feed transport error");
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
