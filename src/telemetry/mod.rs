//! Telemetry
//!
//! Metrics for token service operations. Logging goes through `tracing`;
//! refresh token replays are emitted on the `security` target.

pub mod metrics;

pub use metrics::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, TokenMetrics,
};

/// `tracing` target for security-relevant events.
pub const SECURITY_TARGET: &str = "security";
