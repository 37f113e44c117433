//! The ordered per-request pipeline described in §4.5 steps 3-6: CORS
//! short-circuit, deadline check, actor constraint, panic-recovering
//! handler invocation. Ack send, defragmentation, and response
//! fragmentation are connector-level concerns (they need transport and
//! per-connector state) and live in [`crate::connector`]; this module is
//! kept free of transport/identity so it can be unit tested directly.

use super::{evaluate_actor_constraint, is_cors_preflight, Handler, HandlerResponse, RequestContext};
use crate::error::HandlerError;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// Bundles the pieces of subscription/transport metadata the pipeline
/// needs beyond the handler itself.
pub struct HandlerPipelineDeps<'a> {
    pub actor_constraint: Option<&'a str>,
    pub one_network_hop: Duration,
    /// The transport's `max_payload()`, enforced against the fully
    /// reassembled request body before the handler ever sees it
    /// (§7 point 5, spec.md:125/:258: "body-too-large errors map to
    /// 413"). This is the transport's own single-frame ceiling, not
    /// `maxFragmentSize` — a reassembled body built from several
    /// fragments is expected to exceed `maxFragmentSize` and only
    /// oversized past the transport's own limit is rejected.
    pub max_body_size: usize,
}

pub async fn handle_request(
    handler: &Handler,
    deps: HandlerPipelineDeps<'_>,
    ctx: RequestContext,
) -> Result<HandlerResponse, HandlerError> {
    if is_cors_preflight(&ctx.method, &ctx.headers) {
        return Ok(HandlerResponse::no_content());
    }

    if ctx.remaining_budget <= deps.one_network_hop {
        return Err(HandlerError::new(408, "request timeout"));
    }

    if ctx.body.len() > deps.max_body_size {
        return Err(HandlerError::body_too_large(deps.max_body_size));
    }

    if let Some(expr) = deps.actor_constraint {
        match &ctx.actor {
            None => return Err(HandlerError::new(401, "missing actor claims")),
            Some(claims) => {
                if !evaluate_actor_constraint(expr, claims) {
                    return Err(HandlerError::new(403, "actor constraint not satisfied"));
                }
            }
        }
    }

    match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(err),
        Err(_panic) => Err(HandlerError::new(500, "handler panicked")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ActorClaims;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const DEFAULT_TEST_MAX_BODY: usize = 1024 * 1024;

    fn ctx(remaining: Duration) -> RequestContext {
        RequestContext {
            method: "GET".to_string(),
            url: "/x".to_string(),
            headers: BTreeMap::new(),
            body: vec![],
            baggage: BTreeMap::new(),
            actor: None,
            remaining_budget: remaining,
            call_depth: 0,
        }
    }

    #[tokio::test]
    async fn cors_preflight_short_circuits() {
        let handler: Handler = Arc::new(|_| Box::pin(async { Ok(HandlerResponse::ok("unused")) }));
        let mut c = ctx(Duration::from_secs(5));
        c.method = "OPTIONS".to_string();
        c.headers.insert("Origin".to_string(), "https://x".to_string());

        let deps = HandlerPipelineDeps {
            actor_constraint: None,
            one_network_hop: Duration::from_millis(10),
            max_body_size: DEFAULT_TEST_MAX_BODY,
        };
        let resp = handle_request(&handler, deps, c).await.unwrap();
        assert_eq!(resp.status, 204);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_408() {
        let handler: Handler = Arc::new(|_| Box::pin(async { Ok(HandlerResponse::ok("unused")) }));
        let deps = HandlerPipelineDeps {
            actor_constraint: None,
            one_network_hop: Duration::from_millis(50),
            max_body_size: DEFAULT_TEST_MAX_BODY,
        };
        let err = handle_request(&handler, deps, ctx(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.status, 408);
    }

    #[tokio::test]
    async fn oversize_body_is_413_and_never_reaches_the_handler() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let handler: Handler = Arc::new(move |_| {
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(HandlerResponse::ok("unused"))
            })
        });
        let mut c = ctx(Duration::from_secs(1));
        c.body = vec![0u8; 16];
        let deps = HandlerPipelineDeps {
            actor_constraint: None,
            one_network_hop: Duration::from_millis(10),
            max_body_size: 8,
        };
        let err = handle_request(&handler, deps, c).await.unwrap_err();
        assert_eq!(err.status, 413);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_actor_is_401_unsatisfied_is_403() {
        let handler: Handler = Arc::new(|_| Box::pin(async { Ok(HandlerResponse::ok("unused")) }));

        let deps = HandlerPipelineDeps {
            actor_constraint: Some(r#"role == "admin""#),
            one_network_hop: Duration::from_millis(10),
            max_body_size: DEFAULT_TEST_MAX_BODY,
        };
        let err = handle_request(&handler, deps, ctx(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.status, 401);

        let mut c = ctx(Duration::from_secs(1));
        c.actor = Some(ActorClaims {
            claims: [("role".to_string(), "user".to_string())].into(),
        });
        let deps = HandlerPipelineDeps {
            actor_constraint: Some(r#"role == "admin""#),
            one_network_hop: Duration::from_millis(10),
            max_body_size: DEFAULT_TEST_MAX_BODY,
        };
        let err = handle_request(&handler, deps, c).await.unwrap_err();
        assert_eq!(err.status, 403);
    }

    #[tokio::test]
    async fn panic_is_recovered_as_500() {
        let handler: Handler = Arc::new(|_| Box::pin(async { panic!("boom") }));
        let deps = HandlerPipelineDeps {
            actor_constraint: None,
            one_network_hop: Duration::from_millis(10),
            max_body_size: DEFAULT_TEST_MAX_BODY,
        };
        let err = handle_request(&handler, deps, ctx(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.status, 500);
    }
}
