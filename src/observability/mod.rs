//! Observability for pagelog
//!
//! - Structured logging (JSON lines)
//! - Monotonic counters
//!
//! Observability is read-only: nothing here influences execution.

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{LogMetrics, MetricsSnapshot};
