//! Telemetry (§4.12): a metrics instrument table rendered in the
//! Prometheus text exposition format, and a selective span processor that
//! buffers spans and only exports those belonging to a selected trace.
//!
//! The real OTLP exporter is an external collaborator (out of scope); this
//! module owns only the in-process instrument/selection bookkeeping, so a
//! Prometheus-text encoder is written directly here rather than reaching
//! for a full metrics-export crate the rest of the stack has no other use
//! for.

mod metrics;
mod span_processor;

pub use metrics::{InstrumentKind, MetricsRegistry};
pub use span_processor::{SelectiveSpanProcessor, SpanRecord};

use std::time::Instant;

/// Registers the standard instruments every connector exposes (§4.12).
pub fn register_standard_instruments(registry: &MetricsRegistry) {
    registry.define("callback_duration_seconds", InstrumentKind::Histogram, "s", "on-startup/on-shutdown callback duration");
    registry.define("request_duration_seconds", InstrumentKind::Histogram, "s", "inbound request handling duration");
    registry.define("response_size_bytes", InstrumentKind::Histogram, "By", "outbound response body size");
    registry.define("client_timeout_count", InstrumentKind::Counter, "1", "requests that timed out waiting for a response");
    registry.define("ack_roundtrip_latency_seconds", InstrumentKind::Histogram, "s", "time to first ack after publish");
    registry.define("log_message_count", InstrumentKind::Counter, "1", "log records emitted, by level");
    registry.define("uptime_seconds", InstrumentKind::Gauge, "s", "seconds since startup completed");
    registry.define("cache_memory_bytes", InstrumentKind::Gauge, "By", "distributed cache memory usage");
    registry.define("cache_elements", InstrumentKind::Gauge, "1", "distributed cache element count");
    registry.define("cache_operations_count", InstrumentKind::Counter, "1", "distributed cache operations performed");
}

/// Tracks the moment startup completed so `uptime_seconds` can be
/// computed on demand by the on-observe hook (§4.12 "populate gauges that
/// are measured on demand").
pub struct UptimeClock {
    started_at: Instant,
}

impl UptimeClock {
    pub fn start_now() -> Self {
        Self { started_at: Instant::now() }
    }

    pub fn seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_instruments_are_all_registered() {
        let registry = MetricsRegistry::new();
        register_standard_instruments(&registry);
        assert!(registry.describe("uptime_seconds").is_some());
        assert!(registry.describe("cache_operations_count").is_some());
    }
}
