//! Subscription handler path (§4.5): types shared between the subscription
//! registry (which stores a [`Handler`] per route) and the connector (which
//! drives the per-request pipeline: ack, defragment, CORS short-circuit,
//! deadline, actor constraint, panic recovery, response fragmentation).

mod actor;
mod cors;
mod dispatch;

pub use actor::{evaluate_actor_constraint, ActorClaims};
pub use cors::is_cors_preflight;
pub use dispatch::{handle_request, HandlerPipelineDeps};

use crate::error::HandlerError;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a user handler sees: method/URL/headers/body of the inbound
/// request, the remaining time budget, baggage, and actor claims.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub baggage: BTreeMap<String, String>,
    pub actor: Option<ActorClaims>,
    pub remaining_budget: Duration,
    pub call_depth: u8,
}

/// What a user handler returns: status, headers, and an opaque body.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HandlerResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn from_error(err: &HandlerError) -> Self {
        let body = serde_json::to_vec(err).unwrap_or_default();
        Self {
            status: err.status,
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// A user-registered handler: takes a request context, returns a response
/// or a [`HandlerError`] to be serialized as the wire error body (§4.5
/// step 6, §7 point 5).
pub type Handler =
    Arc<dyn Fn(RequestContext) -> BoxFuture<Result<HandlerResponse, HandlerError>> + Send + Sync>;
