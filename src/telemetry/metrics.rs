//! Metric instrument table: kind, unit, description, buckets (for
//! histograms), lazily instantiated on first observation (§4.12).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    Gauge,
    Histogram,
}

impl InstrumentKind {
    fn prometheus_type(self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Gauge => "gauge",
            InstrumentKind::Histogram => "histogram",
        }
    }
}

const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

struct Instrument {
    kind: InstrumentKind,
    unit: String,
    description: String,
    buckets: Vec<f64>,
    counter_value: f64,
    gauge_value: f64,
    bucket_counts: Vec<u64>,
    histogram_sum: f64,
    histogram_count: u64,
    instantiated: bool,
}

impl Instrument {
    fn new(kind: InstrumentKind, unit: &str, description: &str) -> Self {
        let buckets = DEFAULT_BUCKETS.to_vec();
        let bucket_counts = vec![0; buckets.len()];
        Self {
            kind,
            unit: unit.to_string(),
            description: description.to_string(),
            buckets,
            counter_value: 0.0,
            gauge_value: 0.0,
            bucket_counts,
            histogram_sum: 0.0,
            histogram_count: 0,
            instantiated: false,
        }
    }
}

/// Instrument table keyed by metric name, guarded by a plain
/// [`std::sync::Mutex`] since observations are quick, non-blocking
/// arithmetic, never a suspension point (§5 "Shared-resource policy").
#[derive(Default)]
pub struct MetricsRegistry {
    instruments: Mutex<HashMap<String, Instrument>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: &str, kind: InstrumentKind, unit: &str, description: &str) {
        let mut instruments = self.instruments.lock().expect("metrics registry poisoned");
        instruments
            .entry(name.to_string())
            .or_insert_with(|| Instrument::new(kind, unit, description));
    }

    pub fn describe(&self, name: &str) -> Option<(InstrumentKind, String)> {
        let instruments = self.instruments.lock().expect("metrics registry poisoned");
        instruments.get(name).map(|i| (i.kind, i.description.clone()))
    }

    pub fn incr_counter(&self, name: &str, delta: f64) {
        let mut instruments = self.instruments.lock().expect("metrics registry poisoned");
        if let Some(instrument) = instruments.get_mut(name) {
            instrument.counter_value += delta;
            instrument.instantiated = true;
        }
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut instruments = self.instruments.lock().expect("metrics registry poisoned");
        if let Some(instrument) = instruments.get_mut(name) {
            instrument.gauge_value = value;
            instrument.instantiated = true;
        }
    }

    pub fn observe_histogram(&self, name: &str, value: f64) {
        let mut instruments = self.instruments.lock().expect("metrics registry poisoned");
        if let Some(instrument) = instruments.get_mut(name) {
            instrument.histogram_sum += value;
            instrument.histogram_count += 1;
            for (bucket, count) in instrument.buckets.clone().iter().zip(instrument.bucket_counts.iter_mut()) {
                if value <= *bucket {
                    *count += 1;
                }
            }
            instrument.instantiated = true;
        }
    }

    /// Renders every instantiated instrument in the Prometheus text
    /// exposition format (§4.7 `ANY :888/metrics`).
    pub fn render_prometheus(&self) -> String {
        let instruments = self.instruments.lock().expect("metrics registry poisoned");
        let mut out = String::new();
        let mut names: Vec<&String> = instruments.keys().collect();
        names.sort();
        for name in names {
            let instrument = &instruments[name];
            if !instrument.instantiated {
                continue;
            }
            let _ = writeln!(out, "# HELP {name} {} ({})", instrument.description, instrument.unit);
            let _ = writeln!(out, "# TYPE {name} {}", instrument.kind.prometheus_type());
            match instrument.kind {
                InstrumentKind::Counter => {
                    let _ = writeln!(out, "{name} {}", instrument.counter_value);
                }
                InstrumentKind::Gauge => {
                    let _ = writeln!(out, "{name} {}", instrument.gauge_value);
                }
                InstrumentKind::Histogram => {
                    let mut cumulative = 0u64;
                    for (bucket, count) in instrument.buckets.iter().zip(instrument.bucket_counts.iter()) {
                        cumulative += count;
                        let _ = writeln!(out, "{name}_bucket{{le=\"{bucket}\"}} {cumulative}");
                    }
                    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", instrument.histogram_count);
                    let _ = writeln!(out, "{name}_sum {}", instrument.histogram_sum);
                    let _ = writeln!(out, "{name}_count {}", instrument.histogram_count);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninstantiated_instruments_are_not_rendered() {
        let registry = MetricsRegistry::new();
        registry.define("request_duration_seconds", InstrumentKind::Histogram, "s", "duration");
        assert!(!registry.render_prometheus().contains("request_duration_seconds"));
    }

    #[test]
    fn counter_and_gauge_render_their_current_value() {
        let registry = MetricsRegistry::new();
        registry.define("client_timeout_count", InstrumentKind::Counter, "1", "timeouts");
        registry.define("uptime_seconds", InstrumentKind::Gauge, "s", "uptime");
        registry.incr_counter("client_timeout_count", 3.0);
        registry.set_gauge("uptime_seconds", 42.0);

        let rendered = registry.render_prometheus();
        assert!(rendered.contains("client_timeout_count 3"));
        assert!(rendered.contains("uptime_seconds 42"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        registry.define("request_duration_seconds", InstrumentKind::Histogram, "s", "duration");
        registry.observe_histogram("request_duration_seconds", 0.02);
        registry.observe_histogram("request_duration_seconds", 0.2);

        let rendered = registry.render_prometheus();
        assert!(rendered.contains("request_duration_seconds_count 2"));
        assert!(rendered.contains("le=\"+Inf\"} 2"));
    }
}
