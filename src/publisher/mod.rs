//! Request publisher (§4.4): serializes an outgoing request, resolves a
//! locality-aware destination subject, publishes it, collects acks and
//! responses, and yields them on a channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::correlator::{CorrelatorTable, RpcResult};
use crate::error::{ConnectorError, HandlerError, TimeoutKind};
use crate::fragment::{split_frame, Defragmenter};
use crate::frame::{headers, Frame, OpCode};
use crate::locality::{candidate_subjects, KnownResponderTracker, LocalityRouter};
use crate::transport::Transport;

const COMPONENT_TAG: &str = "publisher";

/// Response-channel capacity for a multicast publish with no known-responder
/// hint yet. Generous enough that a fleet of pervasive responders doesn't
/// block on channel backpressure before the deadline-based collect loop
/// (§4.4 step 6) has a chance to drain it.
const COLD_MULTICAST_CHANNEL_CAPACITY: usize = 64;

/// The identity fields every outgoing frame stamps into its headers
/// (§3 "Connector. Identity").
#[derive(Clone)]
pub struct Identity {
    pub hostname: String,
    pub instance_id: String,
    pub version: String,
    pub plane: String,
    pub locality: String,
}

#[derive(Clone)]
pub struct PublisherConfig {
    pub max_call_depth: u8,
    pub ack_timeout: Duration,
    pub default_time_budget: Duration,
    pub max_fragment_size: usize,
}

/// A request to publish, fully resolved (§4.4 step 1).
pub struct PublishRequest {
    pub method: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub body: Vec<u8>,
    pub extra_headers: BTreeMap<String, String>,
    pub baggage: BTreeMap<String, String>,
    pub unicast: bool,
    /// Call depth already accumulated by the caller (0 for a fresh,
    /// externally-triggered call).
    pub call_depth: u8,
    /// Caller's own remaining time budget, if this publish happens
    /// inside a handler already carrying one; `None` uses the ceiling.
    pub caller_budget: Option<Duration>,
}

impl PublishRequest {
    pub fn new(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            host: host.into(),
            port: "0".to_string(),
            path: path.into(),
            body: Vec::new(),
            extra_headers: BTreeMap::new(),
            baggage: BTreeMap::new(),
            unicast: true,
            call_depth: 0,
            caller_budget: None,
        }
    }

    fn destination_key(&self) -> String {
        format!("{}:{}:{}/{}", self.method, self.host, self.port, self.path.trim_start_matches('/'))
    }
}

pub struct Publisher {
    identity: Identity,
    config: PublisherConfig,
    transport: Arc<dyn Transport>,
    correlators: Arc<CorrelatorTable>,
    locality_router: Arc<LocalityRouter>,
    known_responders: Arc<KnownResponderTracker>,
    response_defragmenter: Arc<Defragmenter>,
}

impl Publisher {
    pub fn new(
        identity: Identity,
        config: PublisherConfig,
        transport: Arc<dyn Transport>,
        correlators: Arc<CorrelatorTable>,
        locality_router: Arc<LocalityRouter>,
        known_responders: Arc<KnownResponderTracker>,
        response_defragmenter: Arc<Defragmenter>,
    ) -> Self {
        Self {
            identity,
            config,
            transport,
            correlators,
            locality_router,
            known_responders,
            response_defragmenter,
        }
    }

    /// Runs the full publish flow and returns a channel the caller drains
    /// for [`RpcResult`]s (§4.4).
    pub async fn publish(&self, request: PublishRequest) -> Result<mpsc::Receiver<RpcResult>, ConnectorError> {
        let next_depth = request.call_depth + 1;
        if next_depth > self.config.max_call_depth {
            return Err(ConnectorError::CallDepthOverflow {
                max: self.config.max_call_depth,
            });
        }

        let budget = request
            .caller_budget
            .unwrap_or(self.config.default_time_budget)
            .saturating_sub(self.transport.latency());
        if budget.is_zero() {
            return Err(ConnectorError::Timeout(TimeoutKind::CallerBudget));
        }

        let destination = request.destination_key();
        // `None` means "cold multicast, no warm hint yet" (§4.6): the
        // collect loop then runs until the deadline rather than closing
        // after a single reply, which a bare `unwrap_or(1)` would do.
        let expected_responders = if request.unicast {
            Some(1)
        } else {
            self.known_responders.expected_count(&destination).await
        };
        let channel_capacity = expected_responders.unwrap_or(COLD_MULTICAST_CHANNEL_CAPACITY).max(1);

        let msg_id = Uuid::new_v4().to_string();
        let frame = self.build_request_frame(&request, &msg_id, next_depth, budget);

        let (tx, rx) = mpsc::channel(channel_capacity);
        self.correlators
            .register(msg_id.clone(), tx, destination.clone(), expected_responders, request.unicast)
            .await;

        let subject = match self.resolve_subject_and_send(&request, &destination, &frame, budget).await {
            Ok(subject) => subject,
            Err(err) => {
                self.correlators.release(&msg_id).await;
                return Err(err);
            }
        };

        debug!(target: COMPONENT_TAG, event = "request_published", msg_id, subject, unicast = request.unicast);

        let msg_id_for_cleanup = msg_id.clone();
        let correlators = self.correlators.clone();
        let known_responders = self.known_responders.clone();
        let destination_for_cleanup = destination.clone();
        let deadline = budget;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let observed = correlators.known_responders(&msg_id_for_cleanup).await;
            if !observed.is_empty() {
                known_responders.record(&destination_for_cleanup, observed).await;
            }
            correlators.release(&msg_id_for_cleanup).await;
        });

        Ok(rx)
    }

    fn build_request_frame(&self, request: &PublishRequest, msg_id: &str, call_depth: u8, budget: Duration) -> Frame {
        let url = format!("https://{}:{}{}", request.host, request.port, ensure_leading_slash(&request.path));
        let mut frame = Frame::new_request(&request.method.to_ascii_uppercase(), &url);
        frame.set_header(headers::MSG_ID, msg_id);
        frame.set_header(headers::FROM_HOST, &self.identity.hostname);
        frame.set_header(headers::FROM_ID, &self.identity.instance_id);
        frame.set_header(headers::FROM_VERSION, &self.identity.version);
        frame.set_header(headers::TIME_BUDGET, budget.as_millis().to_string());
        frame.set_header(headers::CALL_DEPTH, call_depth.to_string());
        for (k, v) in &request.extra_headers {
            frame.set_header(k.clone(), v.clone());
        }
        for (k, v) in &request.baggage {
            frame.set_header(format!("{}{}", headers::BAGGAGE_PREFIX, k), v);
        }
        frame.body = request.body.clone();
        frame
    }

    /// Implements the locality fallback (§4.6): try the cached variant if
    /// one exists, otherwise walk the most-specific-to-bare candidate list,
    /// publishing to and ack-waiting on each in turn until one responds.
    async fn resolve_subject_and_send(
        &self,
        request: &PublishRequest,
        destination: &str,
        frame: &Frame,
        budget: Duration,
    ) -> Result<String, ConnectorError> {
        let msg_id = frame.header(headers::MSG_ID).unwrap_or_default().to_string();
        let mut candidates = Vec::new();
        if let Some(cached) = self.locality_router.cached_subject(destination).await {
            candidates.push(cached);
        }
        candidates.extend(candidate_subjects(
            &self.identity.plane,
            &request.method,
            &request.host,
            &request.port,
            &request.path,
            &self.identity.locality,
        ));

        let per_attempt_timeout = self.config.ack_timeout.min(budget);
        for subject in candidates {
            self.send_frame(&subject, frame).await?;
            if self.wait_for_first_ack(&msg_id, per_attempt_timeout).await {
                self.locality_router.remember(destination, subject.clone()).await;
                return Ok(subject);
            }
            self.locality_router.invalidate(destination).await;
        }
        Err(ConnectorError::Timeout(TimeoutKind::NoResponders))
    }

    async fn send_frame(&self, subject: &str, frame: &Frame) -> Result<(), ConnectorError> {
        let fragments = split_frame(frame, self.config.max_fragment_size);
        for fragment in fragments {
            self.transport
                .publish(subject, fragment.encode())
                .await
                .map_err(ConnectorError::Transport)?;
        }
        Ok(())
    }

    async fn wait_for_first_ack(&self, msg_id: &str, timeout: Duration) -> bool {
        let Some(notify) = self.correlators.ack_notify(msg_id).await else {
            return false;
        };
        if !self.correlators.known_responders(msg_id).await.is_empty() {
            return true;
        }
        tokio::select! {
            _ = notify.notified() => true,
            _ = tokio::time::sleep(timeout) => {
                warn!(target: COMPONENT_TAG, event = "ack_window_expired", msg_id);
                false
            }
        }
    }

    /// Called by the connector's ingress path when an ack frame for one of
    /// this publisher's in-flight requests arrives.
    pub async fn on_ack(&self, msg_id: &str, from_id: &str) {
        self.correlators.record_ack(msg_id, from_id).await;
    }

    /// Called by the connector's ingress path once a response (or error)
    /// frame has been fully defragmented. Delivers the result to the
    /// caller's channel and, once the last expected response has arrived,
    /// releases the correlator immediately rather than waiting out the
    /// deadline (§3 "Correlator... destroyed when the last expected
    /// response is received").
    pub async fn on_response(&self, msg_id: &str, frame: Frame) {
        let result = match frame.op_code() {
            Some(OpCode::Error) => {
                let err = serde_json::from_slice::<HandlerError>(&frame.body)
                    .unwrap_or_else(|_| HandlerError::new(500, "malformed error body"));
                RpcResult::Error(err)
            }
            _ => RpcResult::Response(frame),
        };
        let keep_waiting = self.correlators.deliver(msg_id, result).await;
        if !keep_waiting {
            let observed = self.correlators.known_responders(msg_id).await;
            if !observed.is_empty() {
                let destination = self.correlators.destination(msg_id).await;
                if let Some(destination) = destination {
                    self.known_responders.record(&destination, observed).await;
                }
            }
            self.correlators.release(msg_id).await;
        }
    }

    pub fn response_defragmenter(&self) -> &Defragmenter {
        &self.response_defragmenter
    }

    pub fn known_responders(&self) -> &KnownResponderTracker {
        &self.known_responders
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryBus;

    fn identity() -> Identity {
        Identity {
            hostname: "alpha".to_string(),
            instance_id: "inst-1".to_string(),
            version: "1.0.0".to_string(),
            plane: "prod".to_string(),
            locality: String::new(),
        }
    }

    fn config() -> PublisherConfig {
        PublisherConfig {
            max_call_depth: 8,
            ack_timeout: Duration::from_millis(50),
            default_time_budget: Duration::from_secs(2),
            max_fragment_size: 64 * 1024,
        }
    }

    fn new_publisher(transport: Arc<dyn Transport>) -> Publisher {
        Publisher::new(
            identity(),
            config(),
            transport,
            Arc::new(CorrelatorTable::new()),
            Arc::new(LocalityRouter::new()),
            Arc::new(KnownResponderTracker::new()),
            Arc::new(Defragmenter::new()),
        )
    }

    #[tokio::test]
    async fn call_depth_overflow_is_rejected_before_any_publish() {
        let bus = Arc::new(InMemoryBus::new(1024 * 1024, Duration::from_millis(1)));
        let publisher = new_publisher(bus);
        let mut request = PublishRequest::new("GET", "beta", "/echo");
        request.call_depth = 8;
        let err = publisher.publish(request).await.unwrap_err();
        assert!(matches!(err, ConnectorError::CallDepthOverflow { max: 8 }));
    }

    #[tokio::test]
    async fn no_responders_times_out_with_no_responders_kind() {
        let bus = Arc::new(InMemoryBus::new(1024 * 1024, Duration::from_millis(1)));
        let mut cfg = config();
        cfg.ack_timeout = Duration::from_millis(5);
        cfg.default_time_budget = Duration::from_millis(20);
        let publisher = Publisher::new(
            identity(),
            cfg,
            bus,
            Arc::new(CorrelatorTable::new()),
            Arc::new(LocalityRouter::new()),
            Arc::new(KnownResponderTracker::new()),
            Arc::new(Defragmenter::new()),
        );
        let request = PublishRequest::new("GET", "beta", "/nobody-home");
        let err = publisher.publish(request).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Timeout(TimeoutKind::NoResponders)));
    }
}
