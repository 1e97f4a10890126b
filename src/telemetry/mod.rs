//! Telemetry: structured logging, metrics facade hooks and the injected
//! diagnostics sink for filter accuracy reports.

mod logging;
mod metrics;
mod sink;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_block_delivery, record_listener_count, record_queue_depth, record_registration,
    record_removal,
};
pub use sink::{DiagnosticSink, TracingSink};
