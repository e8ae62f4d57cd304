//! Observability: structured logging and per-session metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogSettings};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{mqtt_span, session_span};
