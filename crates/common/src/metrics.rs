//! Metrics collection for QP Driver
//!
//! This module provides Prometheus metrics for observability. The registry
//! is owned by the runtime context rather than a process-wide static, so
//! tests get fresh counters per instance.

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics registry for QP Driver
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub dispatch: DispatchMetrics,
}

/// Dispatch and handler counters
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Messages that fell through to the default handler
    pub default_handler_invocations: IntCounter,

    /// Steering-policy requests processed end to end
    pub steering_requests_processed: IntCounter,

    /// Per-UE lookups skipped (missing record, decode failure, timeout)
    pub ue_lookups_skipped: IntCounter,

    /// Outbound sends that exhausted all retry attempts
    pub send_failures: IntCounter,

    /// Individual failed send attempts that were retried
    pub send_retries: IntCounter,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let default_handler_invocations = IntCounter::new(
            "qpdriver_default_handler_invocations_total",
            "Messages received with no registered handler",
        )
        .unwrap();

        let steering_requests_processed = IntCounter::new(
            "qpdriver_steering_requests_total",
            "Traffic steering requests processed",
        )
        .unwrap();

        let ue_lookups_skipped = IntCounter::new(
            "qpdriver_ue_lookups_skipped_total",
            "Per-UE shared-data lookups skipped due to missing or invalid records",
        )
        .unwrap();

        let send_failures = IntCounter::new(
            "qpdriver_send_failures_total",
            "Prediction requests dropped after exhausting send retries",
        )
        .unwrap();

        let send_retries = IntCounter::new(
            "qpdriver_send_retries_total",
            "Failed send attempts that were retried",
        )
        .unwrap();

        registry.register(Box::new(default_handler_invocations.clone())).unwrap();
        registry.register(Box::new(steering_requests_processed.clone())).unwrap();
        registry.register(Box::new(ue_lookups_skipped.clone())).unwrap();
        registry.register(Box::new(send_failures.clone())).unwrap();
        registry.register(Box::new(send_retries.clone())).unwrap();

        let dispatch = DispatchMetrics {
            default_handler_invocations,
            steering_requests_processed,
            ue_lookups_skipped,
            send_failures,
            send_retries,
        };

        MetricsRegistry { registry, dispatch }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
