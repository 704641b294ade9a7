//! Prometheus metrics and structured logging for tickstream.
//!
//! - Prometheus metrics for the feed connection
//! - Structured JSON logging with tracing

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{Metrics, StatsPublisher};
