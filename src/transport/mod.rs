//! Transport contract (§6 "Transport contract").
//!
//! The wire transport itself is an external collaborator (§1 out of scope):
//! a publish/subscribe bus with queue subscriptions and subject wildcards.
//! This module only defines the trait the rest of the crate programs
//! against, plus an in-memory double used by tests and the demo binary.

mod in_memory;

pub use in_memory::InMemoryBus;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// An opaque subscription handle; dropping or passing it to `unsubscribe`
/// deactivates the binding.
pub type SubscriptionHandle = u64;

/// Callback invoked for every message delivered to a subscription.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<(), String>;
    async fn close(&self) -> Result<(), String>;

    /// Maximum single-message payload size in bytes.
    fn max_payload(&self) -> usize;

    /// One network round-trip, used to derive `ackTimeout` and time-budget
    /// drawdown (§4.4 step 2, §4.8 step 4).
    fn latency(&self) -> Duration;

    async fn publish(&self, subject: &str, bytes: Vec<u8>) -> Result<(), String>;

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, String>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), String>;
}
