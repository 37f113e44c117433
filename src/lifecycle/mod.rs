//! Lifecycle phase state machine (§4.8): `shut-down → starting-up →
//! started-up → shutting-down → shut-down`, with atomic CAS transitions
//! guarding the startup/shutdown sequences against concurrent callers.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::ConnectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    ShutDown = 0,
    StartingUp = 1,
    StartedUp = 2,
    ShuttingDown = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::ShutDown,
            1 => Phase::StartingUp,
            2 => Phase::StartedUp,
            3 => Phase::ShuttingDown,
            _ => unreachable!("invalid phase encoding"),
        }
    }
}

/// Holds the connector's current phase plus the in-flight operation
/// counter that shutdown drains before tearing anything down (§4.8
/// step 1 of shutdown: "stop accepting new inbound work, then wait for
/// in-flight handlers/publishes to finish or time out").
pub struct LifecycleState {
    phase: AtomicU8,
    pending_ops: AtomicUsize,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            phase: AtomicU8::new(Phase::ShutDown as u8),
            pending_ops: AtomicUsize::new(0),
        }
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Atomically transitions `shut-down -> starting-up`, failing if the
    /// connector is already starting, started, or shutting down.
    pub fn begin_startup(&self) -> Result<(), ConnectorError> {
        self.phase
            .compare_exchange(
                Phase::ShutDown as u8,
                Phase::StartingUp as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| ConnectorError::AlreadyStarted)
    }

    pub fn complete_startup(&self) {
        self.phase.store(Phase::StartedUp as u8, Ordering::SeqCst);
    }

    /// Atomically transitions `started-up -> shutting-down`, failing if
    /// the connector was never fully started.
    pub fn begin_shutdown(&self) -> Result<(), ConnectorError> {
        self.phase
            .compare_exchange(
                Phase::StartedUp as u8,
                Phase::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| ConnectorError::NotStarted)
    }

    pub fn complete_shutdown(&self) {
        self.phase.store(Phase::ShutDown as u8, Ordering::SeqCst);
    }

    pub fn is_started_up(&self) -> bool {
        self.phase() == Phase::StartedUp
    }

    pub fn begin_op(&self) -> OpGuard<'_> {
        self.pending_ops.fetch_add(1, Ordering::SeqCst);
        OpGuard { state: self }
    }

    pub fn pending_ops(&self) -> usize {
        self.pending_ops.load(Ordering::SeqCst)
    }

    /// Polls until `pending_ops` reaches zero or `deadline` elapses,
    /// returning `true` if it drained in time.
    pub async fn drain(&self, deadline: std::time::Duration) -> bool {
        let start = tokio::time::Instant::now();
        loop {
            if self.pending_ops() == 0 {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

pub struct OpGuard<'a> {
    state: &'a LifecycleState,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.state.pending_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_transition_rejects_double_start() {
        let state = LifecycleState::new();
        state.begin_startup().unwrap();
        assert!(matches!(state.begin_startup(), Err(ConnectorError::AlreadyStarted)));
        state.complete_startup();
        assert_eq!(state.phase(), Phase::StartedUp);
    }

    #[test]
    fn shutdown_transition_requires_started_up() {
        let state = LifecycleState::new();
        assert!(matches!(state.begin_shutdown(), Err(ConnectorError::NotStarted)));
        state.begin_startup().unwrap();
        state.complete_startup();
        state.begin_shutdown().unwrap();
        assert_eq!(state.phase(), Phase::ShuttingDown);
    }

    #[tokio::test]
    async fn drain_waits_for_pending_ops_to_clear() {
        let state = Arc::new(LifecycleState::new());
        let guard = state.begin_op();
        let waiter = state.clone();
        let handle = tokio::spawn(async move { waiter.drain(std::time::Duration::from_millis(200)).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(guard);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn drain_times_out_if_op_never_completes() {
        let state = LifecycleState::new();
        let _guard = state.begin_op();
        assert!(!state.drain(std::time::Duration::from_millis(20)).await);
    }
}
