//! Ticker scheduler and the `go`/`parallel`/`sleep` lifetime-bound task
//! primitives (§4.11).

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

const COMPONENT_TAG: &str = "ticker";

/// Tracks names already registered so `start_ticker` can reject
/// duplicates case-insensitively (§4.11: "Ticker names are unique,
/// case-insensitively, within a connector").
#[derive(Default)]
pub struct TickerRegistry {
    names: Mutex<HashSet<String>>,
}

impl TickerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, returning `false` if a ticker with that name
    /// (case-insensitively) is already registered.
    pub async fn try_reserve(&self, name: &str) -> bool {
        let mut names = self.names.lock().await;
        names.insert(name.to_ascii_lowercase())
    }

    pub async fn release(&self, name: &str) {
        self.names.lock().await.remove(&name.to_ascii_lowercase());
    }
}

/// Runs `body` every `interval` until `shutdown` resolves, skipping the
/// next tick if `body` is still running when it fires (§4.11: "overrun
/// ticks are skipped, never queued").
///
/// Disabled entirely in the `TESTING` deployment by the caller, which
/// should not invoke this function at all in that mode (§4.11).
pub fn spawn_ticker<F, Fut>(
    interval: Duration,
    mut body: F,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    body().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawns `fut` as a detached task, logging (not propagating) a panic
/// caught via `catch_unwind` (§4.11 `Go`).
pub fn go<Fut>(fut: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let result = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(fut)).await;
        if result.is_err() {
            error!(target: COMPONENT_TAG, "panic in detached task");
        }
    })
}

/// Fans out a batch of futures concurrently and waits for all of them,
/// analogous to `Parallel` (§4.11: "fans out N tasks and returns the
/// first non-nil error after all have completed"). Every task runs to
/// completion regardless of earlier failures; only after the last one
/// finishes does this return the first error encountered, in task order,
/// or the full set of successes if none failed. A task that panics is
/// logged and treated as contributing no success and no error of its own
/// (its `E` can't be synthesized from a panic payload).
pub async fn parallel<Fut, T, E>(tasks: Vec<Fut>) -> Result<Vec<T>, E>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();

    let mut successes = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(value)) => successes.push(value),
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(target: COMPONENT_TAG, "panic in parallel task");
                } else {
                    warn!(target: COMPONENT_TAG, "parallel task was cancelled");
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(successes),
    }
}

/// Sleeps for `duration` unless `shutdown` resolves first, returning
/// `false` if the sleep was cut short by shutdown (§4.11 `Sleep`).
pub async fn sleep_unless_shutdown(duration: Duration, shutdown: Arc<tokio::sync::Notify>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.notified() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn reserve_rejects_case_insensitive_duplicate() {
        let registry = TickerRegistry::new();
        assert!(registry.try_reserve("Heartbeat").await);
        assert!(!registry.try_reserve("heartbeat").await);
        registry.release("HEARTBEAT").await;
        assert!(registry.try_reserve("heartbeat").await);
    }

    #[tokio::test]
    async fn ticker_skips_overrun_and_stops_on_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let counter = count.clone();
        let handle = spawn_ticker(
            Duration::from_millis(5),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
            rx,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        let _ = handle.await;
        assert!(count.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn parallel_runs_all_and_collects_results() {
        let tasks: Vec<_> = vec![1, 2, 3].into_iter().map(|n| async move { Ok::<_, String>(n) }).collect();
        let results = parallel(tasks).await;
        assert_eq!(results, Ok(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn parallel_returns_first_error_after_all_tasks_complete() {
        let ran = Arc::new(AtomicUsize::new(0));
        let a = ran.clone();
        let b = ran.clone();
        let c = ran.clone();
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = Result<i32, &'static str>> + Send>>> = vec![
            Box::pin(async move {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
            Box::pin(async move {
                b.fetch_add(1, Ordering::SeqCst);
                Err("boom")
            }),
            Box::pin(async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("second failure, should not surface")
            }),
        ];
        let result = parallel(tasks).await;
        assert_eq!(result, Err("boom"));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sleep_unless_shutdown_returns_false_when_interrupted() {
        let notify = Arc::new(tokio::sync::Notify::new());
        let waiter = notify.clone();
        let handle = tokio::spawn(async move { sleep_unless_shutdown(Duration::from_secs(5), waiter).await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        notify.notify_one();
        assert_eq!(handle.await.unwrap(), false);
    }
}
