//! Subscription registry (§4.2): declared routes, method/port/path
//! validation, and the declared -> active -> inactive state machine, backed
//! by a `tokio::sync::Mutex`-guarded collection with idempotent
//! insert/remove and symmetric activate/deactivate.

mod trie;

pub(crate) use trie::PatternTrie;

use crate::codec::{encode_subscription_subject, parse_path, PathSegment};
use crate::error::ConnectorError;
use crate::handler::Handler;
use crate::transport::{SubscriptionHandle, Transport};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

lazy_static::lazy_static! {
    static ref METHOD_RE: Regex = Regex::new(r"^[A-Z]+$").unwrap();
}

/// Delivery policy for a subscription (§3 "Subscription"): pervasive
/// (every instance), load-balanced (queue named after the hostname), or a
/// custom queue group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Queue {
    Pervasive,
    Named(String),
}

impl Queue {
    pub fn as_option(&self) -> Option<&str> {
        match self {
            Queue::Pervasive => None,
            Queue::Named(name) => Some(name.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Declared,
    Active,
    Inactive,
}

/// Options accepted by `Subscribe` beyond `(method, path, handler)`.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub host: Option<String>,
    pub port: Option<String>,
    pub queue: Option<String>,
    pub actor_constraint: Option<String>,
}

pub struct Subscription {
    pub host: String,
    pub port: String,
    pub method: String,
    pub path: String,
    pub queue: Queue,
    pub handler: Handler,
    pub actor_constraint: Option<String>,
    pub(crate) segments: Vec<PathSegment>,
    pub state: SubscriptionState,
    wide_handle: Option<SubscriptionHandle>,
    direct_handle: Option<SubscriptionHandle>,
}

impl Subscription {
    /// Canonical `host:port/path` form that uniquely identifies a
    /// subscription within a Connector (§3).
    pub fn canonical_key(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.path.trim_start_matches('/'))
    }
}

fn validate_method(method: &str) -> Result<(), ConnectorError> {
    if method.eq_ignore_ascii_case("any") || METHOD_RE.is_match(method) {
        Ok(())
    } else {
        Err(ConnectorError::InvalidPath(format!(
            "method must match [A-Z]+ or ANY, got {method:?}"
        )))
    }
}

fn validate_port(port: &str) -> Result<(), ConnectorError> {
    port.parse::<u32>()
        .map(|_| ())
        .map_err(|_| ConnectorError::InvalidPath(format!("port must be numeric, got {port:?}")))
}

pub struct SubscriptionRegistry {
    connector_hostname: String,
    entries: Mutex<HashMap<String, Subscription>>,
    trie: Mutex<PatternTrie>,
}

impl SubscriptionRegistry {
    pub fn new(connector_hostname: impl Into<String>) -> Self {
        Self {
            connector_hostname: connector_hostname.into(),
            entries: Mutex::new(HashMap::new()),
            trie: Mutex::new(PatternTrie::new()),
        }
    }

    /// Declares a subscription. Does not activate transport bindings; the
    /// caller (`Connector::subscribe`) decides whether to activate
    /// immediately (already started) or defer to `Startup` (§4.2).
    pub async fn declare(
        &self,
        method: &str,
        path: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<String, ConnectorError> {
        validate_method(method)?;
        let host = options.host.unwrap_or_else(|| self.connector_hostname.clone());
        let port = options.port.unwrap_or_else(|| "0".to_string());
        validate_port(&port)?;
        let segments = parse_path(path)?;

        let queue = match options.queue {
            Some(name) => Queue::Named(name),
            None => Queue::Pervasive,
        };

        let subscription = Subscription {
            host,
            port,
            method: normalize_method(method),
            path: path.trim_start_matches('/').to_string(),
            queue,
            handler,
            actor_constraint: options.actor_constraint,
            segments: segments.clone(),
            state: SubscriptionState::Declared,
            wide_handle: None,
            direct_handle: None,
        };
        let key = subscription.canonical_key();

        let mut entries = self.entries.lock().await;
        if entries.contains_key(&key) {
            return Err(ConnectorError::DuplicateSubscription(key));
        }
        let mut trie = self.trie.lock().await;
        trie.insert(&subscription.method, &segments, key.clone());
        entries.insert(key.clone(), subscription);
        Ok(key)
    }

    /// Activates a declared subscription against the transport: two
    /// bindings, one by reversed host (wide, queue per options) and one by
    /// `<instance-id>.<reversed-host>` (direct, always sharing the same
    /// queue policy so it targets exactly this instance when that queue
    /// has only one member) (§4.2). `build_ingress` is supplied by the
    /// connector (it has the identity/defragmenter/telemetry state the
    /// registry does not) and is called once per binding to get a fresh
    /// raw-bytes callback that spawns the async dispatch pipeline.
    pub async fn activate(
        &self,
        key: &str,
        plane: &str,
        instance_id: &str,
        transport: &dyn Transport,
        build_ingress: impl Fn() -> crate::transport::MessageHandler,
        settle_delay: Duration,
    ) -> Result<(), ConnectorError> {
        let (method, port, host, path, queue) = {
            let entries = self.entries.lock().await;
            let sub = entries
                .get(key)
                .ok_or_else(|| ConnectorError::UnknownSubscription(key.to_string()))?;
            (
                sub.method.clone(),
                sub.port.clone(),
                sub.host.clone(),
                sub.path.clone(),
                sub.queue.clone(),
            )
        };

        let wide_subject = encode_subscription_subject(plane, &method, &host, &port, &path)?;
        let direct_subject = format!("{instance_id}.{wide_subject}");

        let wide_handle = transport
            .subscribe(&wide_subject, queue.as_option(), build_ingress())
            .await
            .map_err(ConnectorError::Transport)?;

        let direct_handle = transport
            .subscribe(&direct_subject, queue.as_option(), build_ingress())
            .await
            .map_err(ConnectorError::Transport)?;

        tokio::time::sleep(settle_delay).await;

        let mut entries = self.entries.lock().await;
        if let Some(sub) = entries.get_mut(key) {
            sub.wide_handle = Some(wide_handle);
            sub.direct_handle = Some(direct_handle);
            sub.state = SubscriptionState::Active;
        }
        debug!(event = "subscription_activated", key, wide_subject, direct_subject);
        Ok(())
    }

    pub async fn deactivate(
        &self,
        key: &str,
        transport: &dyn Transport,
        settle_delay: Duration,
    ) -> Result<(), ConnectorError> {
        let (wide, direct) = {
            let mut entries = self.entries.lock().await;
            let sub = entries
                .get_mut(key)
                .ok_or_else(|| ConnectorError::UnknownSubscription(key.to_string()))?;
            sub.state = SubscriptionState::Inactive;
            (sub.wide_handle.take(), sub.direct_handle.take())
        };
        if let Some(h) = wide {
            transport.unsubscribe(h).await.map_err(ConnectorError::Transport)?;
        }
        if let Some(h) = direct {
            transport.unsubscribe(h).await.map_err(ConnectorError::Transport)?;
        }
        tokio::time::sleep(settle_delay).await;
        Ok(())
    }

    /// `Unsubscribe(method, path)` (§4.2): deactivates both transport
    /// bindings and removes the declared entry. Looks the subscription up
    /// by its declared method and path on this connector's own hostname,
    /// whatever port it was actually declared on, rather than assuming
    /// port `0`.
    pub async fn unsubscribe(
        &self,
        method: &str,
        path: &str,
        transport: &dyn Transport,
        settle_delay: Duration,
    ) -> Result<(), ConnectorError> {
        let normalized_method = normalize_method(method);
        let trimmed_path = path.trim_start_matches('/');
        let key = {
            let entries = self.entries.lock().await;
            entries
                .values()
                .find(|sub| sub.host == self.connector_hostname && sub.method == normalized_method && sub.path == trimmed_path)
                .map(|sub| sub.canonical_key())
                .ok_or_else(|| ConnectorError::UnknownSubscription(format!("{normalized_method} {trimmed_path}")))?
        };
        self.deactivate(&key, transport, settle_delay).await?;
        let mut entries = self.entries.lock().await;
        entries.remove(&key);
        let mut trie = self.trie.lock().await;
        trie.remove(&key);
        Ok(())
    }

    pub async fn deactivate_all(&self, transport: &dyn Transport, settle_delay: Duration) {
        let keys: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        for key in keys {
            let _ = self.deactivate(&key, transport, settle_delay).await;
        }
    }

    pub async fn declared_keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Looks up the local subscription matching a concrete `(method, host,
    /// port, path)` for the short-circuit path (§4.4) and for dispatching
    /// an inbound frame to its handler without re-parsing the subject.
    pub async fn find_match(&self, method: &str, path: &str) -> Option<String> {
        let trie = self.trie.lock().await;
        trie.find(method, path)
    }

    pub async fn with_subscription<R>(&self, key: &str, f: impl FnOnce(&Subscription) -> R) -> Option<R> {
        let entries = self.entries.lock().await;
        entries.get(key).map(f)
    }
}

fn normalize_method(method: &str) -> String {
    if method.eq_ignore_ascii_case("any") {
        "ANY".to_string()
    } else {
        method.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResponse;

    fn noop_handler() -> Handler {
        Arc::new(|_| Box::pin(async { Ok(HandlerResponse::ok("ok")) }))
    }

    fn noop_ingress() -> crate::transport::MessageHandler {
        Arc::new(|_| ())
    }

    #[tokio::test]
    async fn declare_rejects_duplicate_canonical_key() {
        let registry = SubscriptionRegistry::new("beta");
        registry
            .declare("GET", "/echo", noop_handler(), SubscribeOptions::default())
            .await
            .unwrap();
        let err = registry
            .declare("GET", "/echo", noop_handler(), SubscribeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::DuplicateSubscription(_)));
    }

    #[tokio::test]
    async fn declare_rejects_bad_method() {
        let registry = SubscriptionRegistry::new("beta");
        let err = registry
            .declare("get!", "/echo", noop_handler(), SubscribeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn declare_defaults_host_to_connector_hostname() {
        let registry = SubscriptionRegistry::new("beta");
        let key = registry
            .declare("GET", "/echo", noop_handler(), SubscribeOptions::default())
            .await
            .unwrap();
        assert_eq!(key, "beta:0/echo");
    }

    #[tokio::test]
    async fn unsubscribe_finds_the_real_declared_port() {
        let registry = SubscriptionRegistry::new("beta");
        let transport = crate::transport::InMemoryBus::new(1024, Duration::from_millis(1));
        registry
            .declare(
                "GET",
                "/echo",
                noop_handler(),
                SubscribeOptions { port: Some("9090".to_string()), ..Default::default() },
            )
            .await
            .unwrap();
        registry
            .activate("beta:9090/echo", "p1", "inst-1", &transport, noop_ingress, Duration::from_millis(0))
            .await
            .unwrap();

        registry.unsubscribe("GET", "/echo", &transport, Duration::from_millis(0)).await.unwrap();

        assert!(registry.declared_keys().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_unknown_route_is_an_error() {
        let registry = SubscriptionRegistry::new("beta");
        let transport = crate::transport::InMemoryBus::new(1024, Duration::from_millis(1));
        let err = registry.unsubscribe("GET", "/nope", &transport, Duration::from_millis(0)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownSubscription(_)));
    }
}
