//! Crate-wide error taxonomy: a single focused error type at API seams
//! ([`ConnectorError`]) with typed variants instead of stringly-typed
//! failure modes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Which suspension point timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No ack was received inside `ackTimeout` (no known responder).
    NoResponders,
    /// The caller's remaining time budget was exhausted.
    CallerBudget,
    /// A defragmenter entry went stale past `fragTimeoutMultiplier * networkRoundtrip`.
    Reassembly,
}

/// Error surfaced to a requester over the wire, reconstituted from the
/// JSON body of an `Op-Code: error` frame (§7 point 5: lossy, the original
/// typed identity is not preserved).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerError {
    pub status: u16,
    pub message: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl HandlerError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Body-too-large condition maps to 413 per §7 point 5.
    pub fn body_too_large(limit: usize) -> Self {
        Self::new(413, format!("request body exceeds {limit} bytes"))
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Top-level error type for the connector core.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("init error: {0}")]
    Init(String),

    #[error("connector is not started")]
    NotStarted,

    #[error("connector is already started")]
    AlreadyStarted,

    #[error("timeout: {0:?}")]
    Timeout(TimeoutKind),

    #[error("call depth overflow: exceeds maxCallDepth={max}")]
    CallDepthOverflow { max: u8 },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("missing actor claims")]
    Unauthorized,

    #[error("actor constraint not satisfied")]
    Forbidden,

    #[error("config validation failed: {0}")]
    ConfigValidation(String),

    #[error("duplicate subscription: {0}")]
    DuplicateSubscription(String),

    #[error("invalid subscription path: {0}")]
    InvalidPath(String),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ConnectorError {
    /// Status code this error would carry if serialized onto the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            ConnectorError::Timeout(TimeoutKind::NoResponders) => 404,
            ConnectorError::Timeout(_) => 408,
            ConnectorError::CallDepthOverflow { .. } => 508,
            ConnectorError::Handler(e) => e.status,
            ConnectorError::Unauthorized => 401,
            ConnectorError::Forbidden => 403,
            ConnectorError::Cancelled => 499,
            _ => 500,
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;
