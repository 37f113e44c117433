//! In-memory pub/sub double implementing [`super::Transport`] with subject
//! wildcard matching and queue-group (competing-consumer) semantics, used
//! by tests, benches, and the demo binary in place of a real bus.

use super::{MessageHandler, SubscriptionHandle, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct Binding {
    id: SubscriptionHandle,
    tokens: Vec<String>,
    queue: Option<String>,
    handler: MessageHandler,
}

/// A simple round-robin counter per queue-group key, so repeated publishes
/// to a load-balanced subscription fan out across members deterministically
/// (§8 scenario 4 just needs *some* distribution across members; round-robin
/// is a stronger, easily testable guarantee than hash-based assignment).
#[derive(Default)]
struct QueueCursor {
    counters: HashMap<String, AtomicUsize>,
}

pub struct InMemoryBus {
    max_payload: usize,
    latency: Duration,
    next_id: AtomicU64,
    bindings: Mutex<Vec<Binding>>,
    cursor: Mutex<QueueCursor>,
}

impl InMemoryBus {
    pub fn new(max_payload: usize, latency: Duration) -> Self {
        Self {
            max_payload,
            latency,
            next_id: AtomicU64::new(1),
            bindings: Mutex::new(Vec::new()),
            cursor: Mutex::new(QueueCursor::default()),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024 * 1024, Duration::from_millis(5))
    }
}

fn tokenize(subject: &str) -> Vec<String> {
    subject.split('.').map(str::to_string).collect()
}

fn matches(pattern: &[String], subject: &[String]) -> bool {
    let mut pi = 0;
    let mut si = 0;
    while pi < pattern.len() {
        match pattern[pi].as_str() {
            ">" => return true,
            "*" => {
                if si >= subject.len() {
                    return false;
                }
                pi += 1;
                si += 1;
            }
            literal => {
                if si >= subject.len() || subject[si] != literal {
                    return false;
                }
                pi += 1;
                si += 1;
            }
        }
    }
    si == subject.len()
}

#[async_trait]
impl Transport for InMemoryBus {
    async fn open(&self) -> Result<(), String> {
        Ok(())
    }

    async fn close(&self) -> Result<(), String> {
        self.bindings.lock().await.clear();
        Ok(())
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    async fn publish(&self, subject: &str, bytes: Vec<u8>) -> Result<(), String> {
        let subject_tokens = tokenize(subject);
        let bindings = self.bindings.lock().await;

        let mut by_queue: HashMap<String, Vec<&Binding>> = HashMap::new();
        let mut pervasive: Vec<&Binding> = Vec::new();

        for binding in bindings.iter() {
            if !matches(&binding.tokens, &subject_tokens) {
                continue;
            }
            match &binding.queue {
                Some(q) => by_queue.entry(q.clone()).or_default().push(binding),
                None => pervasive.push(binding),
            }
        }

        for binding in &pervasive {
            (binding.handler)(bytes.clone());
        }

        if !by_queue.is_empty() {
            let mut cursor = self.cursor.lock().await;
            for (queue, members) in by_queue {
                let counter = cursor
                    .counters
                    .entry(queue)
                    .or_insert_with(|| AtomicUsize::new(0));
                let idx = counter.fetch_add(1, Ordering::SeqCst) % members.len();
                (members[idx].handler)(bytes.clone());
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        handler: MessageHandler,
    ) -> Result<SubscriptionHandle, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut bindings = self.bindings.lock().await;
        bindings.push(Binding {
            id,
            tokens: tokenize(subject),
            queue: queue.map(str::to_string),
            handler,
        });
        Ok(id)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), String> {
        let mut bindings = self.bindings.lock().await;
        bindings.retain(|b| b.id != handle);
        Ok(())
    }
}
