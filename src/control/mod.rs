//! Control plane endpoints (§4.7): fixed port `888`, auto-subscribed at
//! startup with pervasive delivery, plus mirrored on the `all` pseudo-host
//! so fleet-wide broadcasts reach every instance.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ConfigRegistry;
use crate::error::HandlerError;
use crate::handler::{Handler, HandlerResponse};
use crate::telemetry::{MetricsRegistry, SelectiveSpanProcessor};

pub const CONTROL_PORT: &str = "888";
pub const BROADCAST_HOST: &str = "all";

/// `GET :888/ping` → `{"pong":0}`.
pub fn ping_handler() -> Handler {
    Arc::new(|_ctx| Box::pin(async move { Ok(HandlerResponse::ok(br#"{"pong":0}"#.to_vec())) }))
}

/// `ANY :888/metrics` → runs the on-observe hook to populate on-demand
/// gauges (§4.12 "An on-observe hook runs just before each periodic
/// export to populate gauges that are measured on demand"), then renders
/// the metrics registry in Prometheus text format. `observe` is supplied
/// by the connector, which owns the gauges and the registered
/// on-observe-metrics callback list this handler can't see.
pub fn metrics_handler<F, Fut>(registry: Arc<MetricsRegistry>, observe: F) -> Handler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let observe = Arc::new(observe);
    Arc::new(move |_ctx| {
        let registry = registry.clone();
        let observe = observe.clone();
        Box::pin(async move {
            observe().await;
            let mut body = registry.render_prometheus();
            if body.is_empty() {
                body.push('\n');
            }
            Ok(HandlerResponse::ok(body.into_bytes()))
        })
    })
}

/// `ANY :888/trace?id=<traceID>` → marks the named trace for export.
pub fn trace_handler(processor: Arc<Mutex<SelectiveSpanProcessor>>) -> Handler {
    Arc::new(move |ctx| {
        let processor = processor.clone();
        Box::pin(async move {
            let trace_id = query_param(&ctx.url, "id")
                .ok_or_else(|| HandlerError::new(400, "missing id query parameter"))?;
            processor.lock().await.select(&trace_id);
            Ok(HandlerResponse::no_content())
        })
    })
}

/// `ANY :888/config-refresh` → triggers a pull from the configurator and
/// invokes on-config-changed callbacks for values that actually changed.
/// `refresh` is supplied by the connector, which owns the YAML layering,
/// the configurator POST, and the callback list this handler can't see.
pub fn config_refresh_handler<F, Fut>(refresh: F) -> Handler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    let refresh = Arc::new(refresh);
    Arc::new(move |_ctx| {
        let refresh = refresh.clone();
        Box::pin(async move {
            refresh().await?;
            Ok(HandlerResponse::no_content())
        })
    })
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == name {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Convenience bundle the connector registers all four endpoints from, so
/// startup has one call site instead of four (§4.8 step 9).
pub struct ControlEndpoints {
    pub config: Arc<ConfigRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    pub spans: Arc<Mutex<SelectiveSpanProcessor>>,
}

impl ControlEndpoints {
    /// Returns `(method, path, handler)` triples ready for
    /// `SubscriptionRegistry::declare` at host `:888`.
    pub fn routes<F, Fut, G, GFut>(&self, refresh: F, observe: G) -> Vec<(&'static str, &'static str, Handler)>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
        G: Fn() -> GFut + Send + Sync + 'static,
        GFut: std::future::Future<Output = ()> + Send + 'static,
    {
        vec![
            ("GET", "/ping", ping_handler()),
            ("ANY", "/config-refresh", config_refresh_handler(refresh)),
            ("ANY", "/metrics", metrics_handler(self.metrics.clone(), observe)),
            ("ANY", "/trace", trace_handler(self.spans.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RequestContext;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn ctx(url: &str) -> RequestContext {
        RequestContext {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            body: vec![],
            baggage: BTreeMap::new(),
            actor: None,
            remaining_budget: Duration::from_secs(1),
            call_depth: 0,
        }
    }

    #[tokio::test]
    async fn ping_replies_with_pong_body() {
        let handler = ping_handler();
        let resp = handler(ctx("/ping")).await.unwrap();
        assert_eq!(resp.body, br#"{"pong":0}"#);
    }

    #[tokio::test]
    async fn metrics_renders_registry_snapshot() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.define("client_timeout_count", crate::telemetry::InstrumentKind::Counter, "1", "timeouts");
        registry.incr_counter("client_timeout_count", 1.0);

        let handler = metrics_handler(registry, || async {});
        let resp = handler(ctx("/metrics")).await.unwrap();
        assert!(String::from_utf8(resp.body).unwrap().contains("client_timeout_count 1"));
    }

    #[tokio::test]
    async fn metrics_handler_runs_the_observe_hook_before_rendering() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.define("uptime_seconds", crate::telemetry::InstrumentKind::Gauge, "s", "uptime");
        let observed = registry.clone();
        let handler = metrics_handler(registry, move || {
            let registry = observed.clone();
            async move {
                registry.set_gauge("uptime_seconds", 7.0);
            }
        });
        let resp = handler(ctx("/metrics")).await.unwrap();
        assert!(String::from_utf8(resp.body).unwrap().contains("uptime_seconds 7"));
    }

    #[tokio::test]
    async fn trace_without_id_is_a_400() {
        let processor = Arc::new(Mutex::new(SelectiveSpanProcessor::new(8, Duration::from_secs(60))));
        let handler = trace_handler(processor);
        let err = handler(ctx("/trace")).await.unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[tokio::test]
    async fn trace_with_id_marks_it_selected() {
        let processor = Arc::new(Mutex::new(SelectiveSpanProcessor::new(8, Duration::from_secs(60))));
        let handler = trace_handler(processor.clone());
        let resp = handler(ctx("/trace?id=abc123")).await.unwrap();
        assert_eq!(resp.status, 204);
        processor.lock().await.on_end(crate::telemetry::SpanRecord {
            trace_id: "abc123".to_string(),
            span_id: "s1".to_string(),
            name: "op".to_string(),
        });
        let exported = processor.lock().await.drain_exported();
        assert_eq!(exported.len(), 1);
    }
}
