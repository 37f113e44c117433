//! The `Connector`: the single object a service embeds. Owns identity,
//! every shared map/lock named in §3, and orchestrates startup, shutdown,
//! inbound dispatch, and outbound publish by wiring together the
//! otherwise-independent `subscription`, `fragment`, `publisher`,
//! `locality`, `config`, `ticker`, `telemetry`, `resources`, and `control`
//! modules (§4.8 step 9: "build the lifetime context ... activate all
//! declared subscriptions").

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::encode_response_subject;
use crate::config::{ConfigRegistry, DefineConfigOptions};
use crate::control::{ControlEndpoints, BROADCAST_HOST, CONTROL_PORT};
use crate::env::{self, MICROBUS_DEPLOYMENT, MICROBUS_LOCALITY, MICROBUS_PLANE, MICROBUS_SHORT_CIRCUIT};
use crate::error::{ConnectorError, ConnectorResult, HandlerError};
use crate::fragment::{split_frame, Defragmenter};
use crate::frame::{headers, Frame, OpCode};
use crate::handler::{handle_request, ActorClaims, Handler, HandlerPipelineDeps, HandlerResponse, RequestContext};
use crate::lifecycle::LifecycleState;
use crate::locality::{KnownResponderTracker, LocalityRouter};
use crate::publisher::{Identity, Publisher, PublisherConfig, PublishRequest};
use crate::resources::{LocalizedStrings, ResourceFs, ServedAsset};
use crate::subscription::{SubscribeOptions, SubscriptionRegistry};
use crate::telemetry::{register_standard_instruments, MetricsRegistry, SelectiveSpanProcessor, UptimeClock};
use crate::ticker::TickerRegistry;
use crate::transport::{SubscriptionHandle, Transport};

const COMPONENT_TAG: &str = "connector";
const SHUTDOWN_FIRST_DRAIN: Duration = Duration::from_secs(8);
const SHUTDOWN_SECOND_DRAIN: Duration = Duration::from_secs(4);
const SUBSCRIPTION_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Multiplies `networkRoundtrip` to get the defragmenter's stall timeout
/// (§4.3: "an entry whose lastActivity exceeds fragTimeoutMultiplier ×
/// networkRoundtrip is marked timed-out").
const FRAG_TIMEOUT_MULTIPLIER: u32 = 10;
const DEFRAGMENTER_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    Local,
    Testing,
    Lab,
    Prod,
}

impl Deployment {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "LOCAL" => Some(Deployment::Local),
            "TESTING" => Some(Deployment::Testing),
            "LAB" => Some(Deployment::Lab),
            "PROD" => Some(Deployment::Prod),
            _ => None,
        }
    }

    /// Resolves the deployment the way §4.8 step 2 describes: an explicit
    /// setter wins, then `MICROBUS_DEPLOYMENT`, then a test-runner
    /// default, then `LOCAL`.
    fn resolve(explicit: Option<Deployment>) -> Self {
        if let Some(explicit) = explicit {
            return explicit;
        }
        if let Some(value) = env::get(MICROBUS_DEPLOYMENT).and_then(|v| Deployment::parse(&v)) {
            return value;
        }
        if cfg!(test) {
            return Deployment::Testing;
        }
        Deployment::Local
    }
}

type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

pub type StartupCallback = Arc<dyn Fn(Arc<Connector>) -> BoxFuture<ConnectorResult<()>> + Send + Sync>;
pub type ShutdownCallback = Arc<dyn Fn(Arc<Connector>) -> BoxFuture<()> + Send + Sync>;

/// The `changed(name) -> bool` predicate handed to on-config-changed
/// callbacks (§4.10 step 4).
pub struct ChangedPredicate(HashSet<String>);

impl ChangedPredicate {
    pub fn changed(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

pub type ConfigChangedCallback = Arc<dyn Fn(Arc<ChangedPredicate>) -> BoxFuture<()> + Send + Sync>;

/// Runs just before each periodic metrics export to populate gauges that
/// are measured on demand rather than pushed as events occur (§3
/// "on-observe-metrics callbacks", §4.12).
pub type ObserveMetricsCallback = Arc<dyn Fn(Arc<Connector>) -> BoxFuture<()> + Send + Sync>;

pub struct ConnectorOptions {
    pub hostname: String,
    pub version: String,
    /// `None` resolves from `MICROBUS_PLANE`, then `"default"` (§6).
    pub plane: Option<String>,
    /// `None` resolves from `MICROBUS_LOCALITY`, then empty (no
    /// locality preference) (§6, §4.6).
    pub locality: Option<String>,
    /// `None` resolves per §4.8 step 2: explicit, then
    /// `MICROBUS_DEPLOYMENT`, then a test-runner default, then `LOCAL`.
    pub deployment: Option<Deployment>,
    pub transport: Arc<dyn Transport>,
    pub max_call_depth: u8,
    pub default_time_budget: Duration,
}

impl ConnectorOptions {
    pub fn new(hostname: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            hostname: hostname.into(),
            version: "0.0.0".to_string(),
            plane: None,
            locality: None,
            deployment: None,
            transport,
            max_call_depth: 64,
            default_time_budget: Duration::from_secs(20),
        }
    }
}

pub struct Connector {
    pub identity: Identity,
    pub deployment: Deployment,
    /// §4.4 last paragraph: a unicast call to this same hostname may skip
    /// the transport entirely when this is set (from `ConnectorOptions`
    /// or `MICROBUS_SHORT_CIRCUIT`).
    short_circuit_enabled: bool,
    lifecycle: LifecycleState,
    config: Arc<ConfigRegistry>,
    subscriptions: SubscriptionRegistry,
    transport: Arc<dyn Transport>,
    publisher: Publisher,
    request_defragmenter: Defragmenter,
    tickers: TickerRegistry,
    ticker_handles: Mutex<HashMap<String, (watch::Sender<bool>, JoinHandle<()>)>>,
    shutdown_notify: Arc<Notify>,
    pub metrics: Arc<MetricsRegistry>,
    pub spans: Arc<Mutex<SelectiveSpanProcessor>>,
    pub resources: Mutex<ResourceFs>,
    pub strings: Mutex<LocalizedStrings>,
    on_startup: Mutex<Vec<StartupCallback>>,
    on_shutdown: Mutex<Vec<ShutdownCallback>>,
    on_config_changed: Mutex<Vec<ConfigChangedCallback>>,
    on_observe_metrics: Mutex<Vec<ObserveMetricsCallback>>,
    uptime: Mutex<Option<UptimeClock>>,
    response_handle: Mutex<Option<SubscriptionHandle>>,
    watchdog_handle: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
    last_error: Mutex<Option<String>>,
}

impl Connector {
    pub fn new(options: ConnectorOptions) -> Arc<Self> {
        let instance_id = Uuid::new_v4().to_string();
        let plane = options
            .plane
            .or_else(|| env::get(MICROBUS_PLANE))
            .unwrap_or_else(|| "default".to_string());
        let locality = options
            .locality
            .or_else(|| env::get(MICROBUS_LOCALITY))
            .unwrap_or_default();
        let deployment = Deployment::resolve(options.deployment);
        let short_circuit_enabled = env::get(MICROBUS_SHORT_CIRCUIT).as_deref() == Some("true");

        let identity = Identity {
            hostname: options.hostname,
            instance_id,
            version: options.version,
            plane,
            locality: crate::locality::normalize_locality(&locality),
        };

        let correlators = Arc::new(crate::correlator::CorrelatorTable::new());
        let locality_router = Arc::new(LocalityRouter::new());
        let known_responders = Arc::new(KnownResponderTracker::new());
        let response_defragmenter = Arc::new(Defragmenter::new());

        let max_fragment_size = options.transport.max_payload().saturating_sub(64 * 1024).max(1);
        let publisher_config = PublisherConfig {
            max_call_depth: options.max_call_depth,
            ack_timeout: options.transport.latency(),
            default_time_budget: options.default_time_budget,
            max_fragment_size,
        };
        let publisher = Publisher::new(
            identity.clone(),
            publisher_config,
            options.transport.clone(),
            correlators,
            locality_router,
            known_responders,
            response_defragmenter,
        );

        let metrics = Arc::new(MetricsRegistry::new());
        register_standard_instruments(&metrics);

        Arc::new(Self {
            subscriptions: SubscriptionRegistry::new(identity.hostname.clone()),
            identity,
            deployment,
            short_circuit_enabled,
            lifecycle: LifecycleState::new(),
            config: Arc::new(ConfigRegistry::new()),
            transport: options.transport,
            publisher,
            request_defragmenter: Defragmenter::new(),
            tickers: TickerRegistry::new(),
            ticker_handles: Mutex::new(HashMap::new()),
            shutdown_notify: Arc::new(Notify::new()),
            metrics,
            spans: Arc::new(Mutex::new(SelectiveSpanProcessor::new(4096, Duration::from_secs(300)))),
            resources: Mutex::new(ResourceFs::new()),
            strings: Mutex::new(LocalizedStrings::new("en-US")),
            on_startup: Mutex::new(Vec::new()),
            on_shutdown: Mutex::new(Vec::new()),
            on_config_changed: Mutex::new(Vec::new()),
            on_observe_metrics: Mutex::new(Vec::new()),
            uptime: Mutex::new(None),
            response_handle: Mutex::new(None),
            watchdog_handle: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    // -- registration (pre- or post-startup) --------------------------------

    pub async fn define_config(&self, name: &str, options: DefineConfigOptions) -> ConnectorResult<()> {
        self.config.define(name, options).await
    }

    /// Current value of a declared config property, or `None` if `name`
    /// was never declared (§4.10, §3 "Config property").
    pub async fn config_value(&self, name: &str) -> Option<String> {
        self.config.get(name).await
    }

    pub async fn set_config(&self, name: &str, value: &str) -> ConnectorResult<()> {
        if self.deployment != Deployment::Testing && self.lifecycle.is_started_up() {
            return Err(ConnectorError::Init(
                "SetConfig is only allowed in TESTING deployment or before startup".to_string(),
            ));
        }
        self.config.set(name, value).await
    }

    pub async fn on_startup(&self, callback: StartupCallback) {
        self.on_startup.lock().await.push(callback);
    }

    pub async fn on_shutdown(&self, callback: ShutdownCallback) {
        self.on_shutdown.lock().await.push(callback);
    }

    pub async fn on_config_changed(&self, callback: ConfigChangedCallback) {
        self.on_config_changed.lock().await.push(callback);
    }

    pub async fn on_observe_metrics(&self, callback: ObserveMetricsCallback) {
        self.on_observe_metrics.lock().await.push(callback);
    }

    /// The on-observe hook (§4.12): populates the gauges that are measured
    /// on demand rather than pushed as events occur, then runs every
    /// registered on-observe-metrics callback in registration order.
    /// Invoked just before every `:888/metrics` render.
    pub async fn observe_metrics(self: &Arc<Self>) {
        self.metrics.set_gauge("uptime_seconds", self.uptime_seconds().await);
        let callbacks = self.on_observe_metrics.lock().await.clone();
        for callback in callbacks {
            callback(self.clone()).await;
        }
    }

    pub async fn subscribe(
        self: &Arc<Self>,
        method: &str,
        path: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> ConnectorResult<String> {
        let key = self.subscriptions.declare(method, path, handler, options).await?;
        if self.lifecycle.is_started_up() {
            self.activate_subscription(&key).await?;
        }
        Ok(key)
    }

    /// `Unsubscribe(method, path)` (§4.2): deactivates both transport
    /// bindings for the matching declared subscription and removes it.
    pub async fn unsubscribe(self: &Arc<Self>, method: &str, path: &str) -> ConnectorResult<()> {
        self.subscriptions
            .unsubscribe(method, path, self.transport.as_ref(), SUBSCRIPTION_SETTLE_DELAY)
            .await
    }

    async fn activate_subscription(self: &Arc<Self>, key: &str) -> ConnectorResult<()> {
        let connector = self.clone();
        let key_owned = key.to_string();
        self.subscriptions
            .activate(
                key,
                &self.identity.plane,
                &self.identity.instance_id,
                self.transport.as_ref(),
                move || ingress_closure(connector.clone(), key_owned.clone()),
                SUBSCRIPTION_SETTLE_DELAY,
            )
            .await
    }

    /// Publishes a request through the publisher, with the short-circuit
    /// optimization (§4.4 last paragraph): a unicast call whose destination
    /// is this same instance skips the transport and invokes the local
    /// handler directly, synthesizing an immediate ack.
    pub async fn publish(self: &Arc<Self>, request: PublishRequest) -> ConnectorResult<tokio::sync::mpsc::Receiver<crate::correlator::RpcResult>> {
        let _op = self.lifecycle.begin_op();
        if self.short_circuit_enabled && request.unicast && request.host == self.identity.hostname {
            if let Some(key) = self.subscriptions.find_match(&request.method, &request.path).await {
                return Ok(self.short_circuit(key, request).await);
            }
        }
        self.publisher.publish(request).await
    }

    async fn short_circuit(
        self: &Arc<Self>,
        key: String,
        request: PublishRequest,
    ) -> tokio::sync::mpsc::Receiver<crate::correlator::RpcResult> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let connector = self.clone();
        tokio::spawn(async move {
            let Some((handler, actor_constraint)) = connector
                .subscriptions
                .with_subscription(&key, |s| (s.handler.clone(), s.actor_constraint.clone()))
                .await
            else {
                let _ = tx
                    .send(crate::correlator::RpcResult::Error(HandlerError::new(404, "no local handler")))
                    .await;
                return;
            };
            let ctx = RequestContext {
                method: request.method.clone(),
                url: format!("/{}", request.path.trim_start_matches('/')),
                headers: request.extra_headers.clone(),
                body: request.body.clone(),
                baggage: request.baggage.clone(),
                actor: ActorClaims::from_headers(request.extra_headers.iter()),
                remaining_budget: Duration::from_secs(20),
                call_depth: request.call_depth + 1,
            };
            let deps = HandlerPipelineDeps {
                actor_constraint: actor_constraint.as_deref(),
                one_network_hop: Duration::from_millis(0),
                max_body_size: connector.transport.max_payload(),
            };
            let result = handle_request(&handler, deps, ctx).await;
            let rpc_result = match result {
                Ok(response) => {
                    let mut frame = Frame::new_response(response.status);
                    frame.body = response.body;
                    crate::correlator::RpcResult::Response(frame)
                }
                Err(err) => crate::correlator::RpcResult::Error(err),
            };
            let _ = tx.send(rpc_result).await;
        });
        rx
    }

    // -- inbound dispatch ----------------------------------------------------

    async fn handle_inbound_request(self: Arc<Self>, key: String, bytes: Vec<u8>) {
        let _op = self.lifecycle.begin_op();
        let Some(frame) = Frame::decode(&bytes) else {
            warn!(target: COMPONENT_TAG, "dropped malformed inbound request frame");
            return;
        };
        let from_id = frame.header(headers::FROM_ID).unwrap_or("").to_string();
        let from_host = frame.header(headers::FROM_HOST).unwrap_or("").to_string();
        let msg_id = frame.header(headers::MSG_ID).unwrap_or("").to_string();
        let queue = frame.header(headers::QUEUE).map(str::to_string);

        if frame.fragment_index().unwrap_or(1) == 1 {
            self.send_ack(&from_host, &from_id, &msg_id, queue.as_deref()).await;
        }

        let frag_key = format!("{from_id}|{msg_id}");
        let complete = match self.request_defragmenter.add(&frag_key, frame).await {
            Ok(complete) => complete,
            Err(_) => {
                warn!(target: COMPONENT_TAG, frag_key, "fragment arrived after reassembly timed out");
                return;
            }
        };
        if !complete {
            return;
        }
        let Some(integrated) = self.request_defragmenter.integrated(&frag_key).await else {
            return;
        };
        self.dispatch_integrated_request(&key, integrated, &from_host, &from_id).await;
    }

    async fn send_ack(&self, from_host: &str, from_id: &str, msg_id: &str, queue: Option<&str>) {
        if from_host.is_empty() || from_id.is_empty() {
            return;
        }
        let subject = encode_response_subject(&self.identity.plane, from_host, from_id);
        let mut ack = Frame::new_response(200);
        ack.set_header(headers::OP_CODE, OpCode::Ack.as_str());
        ack.set_header(headers::MSG_ID, msg_id);
        ack.set_header(headers::FROM_HOST, &self.identity.hostname);
        ack.set_header(headers::FROM_ID, &self.identity.instance_id);
        if let Some(q) = queue {
            ack.set_header(headers::QUEUE, q);
        }
        if let Err(err) = self.transport.publish(&subject, ack.encode()).await {
            warn!(target: COMPONENT_TAG, error = %err, "failed to publish ack");
        }
    }

    async fn dispatch_integrated_request(self: &Arc<Self>, key: &str, frame: Frame, from_host: &str, from_id: &str) {
        let Some((handler, actor_constraint, queue_name)) = self
            .subscriptions
            .with_subscription(key, |s| (s.handler.clone(), s.actor_constraint.clone(), s.queue.as_option().map(str::to_string)))
            .await
        else {
            return;
        };

        let method = frame.request_line.as_ref().map(|rl| rl.method.clone()).unwrap_or_default();
        let url = frame.request_line.as_ref().map(|rl| rl.url.clone()).unwrap_or_default();
        let remaining_budget = Duration::from_millis(frame.time_budget_ms().unwrap_or(0));
        let headers_map: BTreeMap<String, String> = frame.headers.clone();
        let ctx = RequestContext {
            method,
            url,
            headers: headers_map,
            body: frame.body.clone(),
            baggage: frame.baggage(),
            actor: ActorClaims::from_headers(frame.headers.iter()),
            remaining_budget,
            call_depth: frame.call_depth(),
        };

        let start = tokio::time::Instant::now();
        let deps = HandlerPipelineDeps {
            actor_constraint: actor_constraint.as_deref(),
            one_network_hop: self.transport.latency(),
            max_body_size: self.transport.max_payload(),
        };
        let result = handle_request(&handler, deps, ctx).await;
        self.metrics
            .observe_histogram("request_duration_seconds", start.elapsed().as_secs_f64());

        let msg_id = frame.header(headers::MSG_ID).unwrap_or("").to_string();
        let response_frame = match result {
            Ok(response) => self.build_response_frame(200, &response, OpCode::Response, &msg_id, queue_name.as_deref()),
            Err(err) => {
                let response = HandlerResponse::from_error(&err);
                self.build_response_frame(err.status, &response, OpCode::Error, &msg_id, queue_name.as_deref())
            }
        };
        self.metrics
            .observe_histogram("response_size_bytes", response_frame.body.len() as f64);

        let subject = encode_response_subject(&self.identity.plane, from_host, from_id);
        let fragments = split_frame(&response_frame, self.publisher_max_fragment_size());
        for fragment in fragments {
            if let Err(err) = self.transport.publish(&subject, fragment.encode()).await {
                warn!(target: COMPONENT_TAG, error = %err, "failed to publish response fragment");
            }
        }
    }

    fn build_response_frame(&self, status: u16, response: &HandlerResponse, op: OpCode, msg_id: &str, queue: Option<&str>) -> Frame {
        let mut frame = Frame::new_response(status);
        frame.set_header(headers::OP_CODE, op.as_str());
        frame.set_header(headers::MSG_ID, msg_id);
        frame.set_header(headers::FROM_HOST, &self.identity.hostname);
        frame.set_header(headers::FROM_ID, &self.identity.instance_id);
        frame.set_header(headers::FROM_VERSION, &self.identity.version);
        if let Some(q) = queue {
            frame.set_header(headers::QUEUE, q);
        }
        for (k, v) in &response.headers {
            frame.set_header(k.clone(), v.clone());
        }
        frame.body = response.body.clone();
        frame
    }

    fn publisher_max_fragment_size(&self) -> usize {
        self.transport.max_payload().saturating_sub(64 * 1024).max(1)
    }

    async fn handle_inbound_response(self: Arc<Self>, bytes: Vec<u8>) {
        let Some(frame) = Frame::decode(&bytes) else {
            return;
        };
        let msg_id = frame.header(headers::MSG_ID).unwrap_or("").to_string();
        if msg_id.is_empty() {
            return;
        }

        if frame.op_code() == Some(OpCode::Ack) {
            let from_id = frame.header(headers::FROM_ID).unwrap_or("").to_string();
            self.publisher.on_ack(&msg_id, &from_id).await;
            return;
        }

        let from_id = frame.header(headers::FROM_ID).unwrap_or("unknown").to_string();
        let frag_key = format!("{msg_id}|{from_id}");
        match self.publisher.response_defragmenter().add(&frag_key, frame).await {
            Ok(true) => {
                if let Some(integrated) = self.publisher.response_defragmenter().integrated(&frag_key).await {
                    self.publisher.on_response(&msg_id, integrated).await;
                }
            }
            Ok(false) => {}
            Err(_) => {
                debug!(target: COMPONENT_TAG, frag_key, "response fragment arrived after reassembly timed out");
            }
        }
    }

    // -- lifecycle -------------------------------------------------------------

    pub async fn startup(self: &Arc<Self>) -> ConnectorResult<()> {
        self.lifecycle.begin_startup()?;

        if let Err(err) = self.run_startup_sequence().await {
            *self.last_error.lock().await = Some(err.to_string());
            error!(target: COMPONENT_TAG, error = %err, "startup failed, rolling back");
            let _ = self.run_shutdown_sequence().await;
            self.lifecycle.complete_shutdown();
            return Err(err);
        }

        self.lifecycle.complete_startup();
        *self.uptime.lock().await = Some(UptimeClock::start_now());
        info!(target: COMPONENT_TAG, hostname = %self.identity.hostname, instance_id = %self.identity.instance_id, "connector started");
        Ok(())
    }

    async fn run_startup_sequence(self: &Arc<Self>) -> ConnectorResult<()> {
        crate::logging::init(self.deployment);

        self.transport.open().await.map_err(ConnectorError::Transport)?;

        let response_subject = encode_response_subject(&self.identity.plane, &self.identity.hostname, &self.identity.instance_id);
        let connector_for_responses = self.clone();
        let handle = self
            .transport
            .subscribe(
                &response_subject,
                None,
                Arc::new(move |bytes: Vec<u8>| {
                    let connector = connector_for_responses.clone();
                    tokio::spawn(async move { connector.handle_inbound_response(bytes).await });
                }),
            )
            .await
            .map_err(ConnectorError::Transport)?;
        *self.response_handle.lock().await = Some(handle);

        // `invoke_callbacks = true`: on-config-changed callbacks must see
        // the properties a fresh fetch changed from their declared default
        // right away (§8 scenario 6 observes the callback firing once
        // `Startup` returns, with no separate `/config-refresh` call).
        let fetched = crate::config::load_layered_yaml(&std::env::current_dir().unwrap_or_default(), &self.identity.hostname);
        self.refresh_config(fetched, true).await?;

        for (name, property) in self.config.snapshot().await {
            let value = if property.secret { crate::config::mask_secret(&property.value) } else { property.value };
            debug!(target: COMPONENT_TAG, config_name = name, config_value = value, "config value at startup");
        }

        let callbacks = self.on_startup.lock().await.clone();
        for callback in callbacks {
            callback(self.clone()).await?;
        }

        self.declare_control_endpoints().await?;

        for key in self.subscriptions.declared_keys().await {
            self.activate_subscription(&key).await?;
        }

        self.start_defragmenter_watchdog().await;

        Ok(())
    }

    /// Declares the fixed `:888` management endpoints (§4.7), both under
    /// this instance's own hostname and under the `all` broadcast
    /// pseudo-host so fleet-wide control-plane calls reach every instance.
    async fn declare_control_endpoints(self: &Arc<Self>) -> ConnectorResult<()> {
        let endpoints = ControlEndpoints {
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            spans: self.spans.clone(),
        };
        let connector = self.clone();
        let connector_for_observe = self.clone();
        let routes = endpoints.routes(
            move || {
                let connector = connector.clone();
                async move {
                    let fetched = crate::config::load_layered_yaml(
                        &std::env::current_dir().unwrap_or_default(),
                        &connector.identity.hostname,
                    );
                    connector
                        .refresh_config(fetched, true)
                        .await
                        .map_err(|err| HandlerError::new(500, err.to_string()))
                }
            },
            move || {
                let connector = connector_for_observe.clone();
                async move { connector.observe_metrics().await }
            },
        );
        for (host, port) in [(self.identity.hostname.clone(), CONTROL_PORT.to_string()), (BROADCAST_HOST.to_string(), CONTROL_PORT.to_string())] {
            for (method, path, handler) in routes.clone() {
                let options = SubscribeOptions {
                    host: Some(host.clone()),
                    port: Some(port.clone()),
                    queue: None,
                    actor_constraint: None,
                };
                self.subscribe(method, path, handler, options).await?;
            }
        }
        Ok(())
    }

    /// Starts the per-connector background sweep that expires stalled
    /// fragment reassemblies on both the request- and response-side
    /// defragmenters (§4.3 "per-connector watchdog sweeps the
    /// defragmenter map").
    async fn start_defragmenter_watchdog(self: &Arc<Self>) {
        let (tx, rx) = watch::channel(false);
        let connector = self.clone();
        let timeout = self.transport.latency() * FRAG_TIMEOUT_MULTIPLIER;
        let handle = crate::ticker::spawn_ticker(
            DEFRAGMENTER_SWEEP_INTERVAL,
            move || {
                let connector = connector.clone();
                async move {
                    connector.request_defragmenter.sweep(timeout).await;
                    connector.publisher.response_defragmenter().sweep(timeout).await;
                    connector
                        .publisher
                        .known_responders()
                        .sweep(crate::locality::LOCALITY_CACHE_TTL)
                        .await;
                }
            },
            rx,
        );
        *self.watchdog_handle.lock().await = Some((tx, handle));
    }

    pub async fn shutdown(self: &Arc<Self>) -> ConnectorResult<()> {
        self.lifecycle.begin_shutdown()?;
        let result = self.run_shutdown_sequence().await;
        self.lifecycle.complete_shutdown();
        result
    }

    async fn run_shutdown_sequence(self: &Arc<Self>) -> ConnectorResult<()> {
        self.shutdown_notify.notify_waiters();
        self.stop_all_tickers().await;
        if let Some((tx, handle)) = self.watchdog_handle.lock().await.take() {
            let _ = tx.send(true);
            let _ = handle.await;
        }

        self.subscriptions.deactivate_all(self.transport.as_ref(), SUBSCRIPTION_SETTLE_DELAY).await;

        if !self.lifecycle.drain(SHUTDOWN_FIRST_DRAIN).await {
            warn!(target: COMPONENT_TAG, "pending operations did not drain within the first window");
        }
        if !self.lifecycle.drain(SHUTDOWN_SECOND_DRAIN).await {
            warn!(target: COMPONENT_TAG, "pending operations did not drain within the second window");
        }

        let callbacks = self.on_shutdown.lock().await.clone();
        for callback in callbacks.into_iter().rev() {
            callback(self.clone()).await;
        }

        if let Some(handle) = self.response_handle.lock().await.take() {
            let _ = self.transport.unsubscribe(handle).await;
        }
        self.transport.close().await.map_err(ConnectorError::Transport)?;
        Ok(())
    }

    /// `refreshConfig` (§4.10): layers YAML, optionally pulls from the
    /// configurator, validates, applies, and fires callbacks.
    pub async fn refresh_config(
        self: &Arc<Self>,
        mut fetched: std::collections::HashMap<String, String>,
        invoke_callbacks: bool,
    ) -> ConnectorResult<()> {
        if self.deployment != Deployment::Testing {
            let names = self.config.names().await;
            if !names.is_empty() {
                let remote = self.fetch_configurator_values(names).await;
                fetched.extend(remote);
            }
        }
        let changed = self.config.apply_fetched(&fetched).await;
        if invoke_callbacks && !changed.is_empty() {
            let predicate = Arc::new(ChangedPredicate(changed));
            for callback in self.on_config_changed.lock().await.iter() {
                callback(predicate.clone()).await;
            }
        }
        Ok(())
    }

    /// `POST configurator.core:888/values` (§4.10 step 2): asks the
    /// configurator service for the current value of each declared
    /// property. The configurator is an external collaborator (§1); if it
    /// doesn't respond within the ack window the fetch is simply skipped
    /// and the caller keeps whatever the YAML layering produced.
    async fn fetch_configurator_values(self: &Arc<Self>, names: Vec<String>) -> std::collections::HashMap<String, String> {
        let mut request = PublishRequest::new("POST", "configurator.core", "/values");
        request.port = CONTROL_PORT.to_string();
        request.body = serde_json::json!({ "names": names }).to_string().into_bytes();

        let mut rx = match self.publish(request).await {
            Ok(rx) => rx,
            Err(err) => {
                debug!(target: COMPONENT_TAG, error = %err, "configurator fetch could not be published");
                return std::collections::HashMap::new();
            }
        };

        match rx.recv().await {
            Some(crate::correlator::RpcResult::Response(frame)) => {
                #[derive(serde::Deserialize)]
                struct ValuesResponse {
                    #[serde(default)]
                    values: std::collections::HashMap<String, String>,
                }
                match serde_json::from_slice::<ValuesResponse>(&frame.body) {
                    Ok(parsed) => parsed.values,
                    Err(err) => {
                        warn!(target: COMPONENT_TAG, error = %err, "configurator response was not valid JSON");
                        std::collections::HashMap::new()
                    }
                }
            }
            Some(crate::correlator::RpcResult::Error(err)) => {
                debug!(target: COMPONENT_TAG, error = %err, "configurator returned an error");
                std::collections::HashMap::new()
            }
            None => {
                debug!(target: COMPONENT_TAG, "configurator did not respond before the ack window elapsed");
                std::collections::HashMap::new()
            }
        }
    }

    pub fn lifecycle_phase(&self) -> crate::lifecycle::Phase {
        self.lifecycle.phase()
    }

    pub async fn uptime_seconds(&self) -> f64 {
        self.uptime.lock().await.as_ref().map(|u| u.seconds()).unwrap_or(0.0)
    }

    // -- ticker / go / parallel / sleep (§4.11) -------------------------------

    /// Registers and starts a named periodic job. A no-op under
    /// `Deployment::Testing`, where tickers are disabled entirely so tests
    /// stay deterministic; the name is still reserved so duplicate-name
    /// detection behaves the same in every deployment.
    pub async fn start_ticker<F, Fut>(self: &Arc<Self>, name: &str, interval: Duration, mut body: F) -> ConnectorResult<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if !self.tickers.try_reserve(name).await {
            return Err(ConnectorError::Init(format!("ticker {name:?} is already registered")));
        }
        if self.deployment == Deployment::Testing {
            return Ok(());
        }
        let (tx, rx) = watch::channel(false);
        let handle = crate::ticker::spawn_ticker(interval, move || body(), rx);
        self.ticker_handles.lock().await.insert(name.to_ascii_lowercase(), (tx, handle));
        Ok(())
    }

    pub async fn stop_ticker(&self, name: &str) {
        self.tickers.release(name).await;
        if let Some((tx, handle)) = self.ticker_handles.lock().await.remove(&name.to_ascii_lowercase()) {
            let _ = tx.send(true);
            let _ = handle.await;
        }
    }

    async fn stop_all_tickers(&self) {
        let handles: Vec<_> = self.ticker_handles.lock().await.drain().collect();
        for (_, (tx, handle)) in handles {
            let _ = tx.send(true);
            let _ = handle.await;
        }
    }

    /// Spawns a detached, panic-isolated task (§4.11 `Go`).
    pub fn go<Fut>(&self, fut: Fut) -> JoinHandle<()>
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        crate::ticker::go(fut)
    }

    /// Fans out a batch of fallible futures concurrently, waiting for all
    /// of them before returning the first error encountered, or every
    /// success if none failed (§4.11 `Parallel`).
    pub async fn parallel<Fut, T, E>(&self, tasks: Vec<Fut>) -> Result<Vec<T>, E>
    where
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        crate::ticker::parallel(tasks).await
    }

    /// Sleeps for `duration` unless the connector shuts down first (§4.11
    /// `Sleep`), returning `false` when shutdown cut the sleep short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        crate::ticker::sleep_unless_shutdown(duration, self.shutdown_notify.clone()).await
    }

    // -- resources / localized strings (§4.12) --------------------------------

    pub async fn read_resource(&self, name: &str) -> Option<Vec<u8>> {
        self.resources.lock().await.read_file(name).map(|b| b.to_vec())
    }

    pub async fn serve_resource(&self, name: &str, if_none_match: Option<&str>) -> Option<ServedAsset> {
        self.resources.lock().await.serve(name, if_none_match)
    }

    pub async fn load_string(&self, accept_language: &str, key: &str) -> Option<String> {
        self.strings.lock().await.load(accept_language, key).map(str::to_string)
    }

    pub fn execute_template(&self, source: &str, data: &crate::resources::TemplateData, html: bool) -> Result<String, crate::resources::TemplateError> {
        if html {
            crate::resources::render_html(source, data)
        } else {
            crate::resources::render_text(source, data)
        }
    }
}

fn ingress_closure(connector: Arc<Connector>, key: String) -> crate::transport::MessageHandler {
    Arc::new(move |bytes: Vec<u8>| {
        let connector = connector.clone();
        let key = key.clone();
        tokio::spawn(async move { connector.handle_inbound_request(key, bytes).await });
    })
}
