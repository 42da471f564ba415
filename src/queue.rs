//! Queue interface consumed by this crate (§6): `publish`/`consume` against
//! named queues with priority 0..9 (higher first). The real message broker is
//! a Non-goal (§1); `InMemoryQueue` is the in-process stand-in used in tests
//! and single-process deployments.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

pub const QUEUE_NAMES: [&str; 6] = ["default", "model", "cam", "sim", "report", "erp"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedPayload {
    pub queue: String,
    pub priority: u8,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, queue: &str, payload: serde_json::Value, priority: u8);
    /// Consumes at most `prefetch` items; blocks until at least one is available.
    async fn consume(&self, queue: &str, prefetch: usize) -> Vec<QueuedPayload>;
}

struct Ranked(QueuedPayload, u64);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.1 == other.1
    }
}
impl Eq for Ranked {}
impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; among equal priorities, FIFO (lower seq first).
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.1.cmp(&self.1))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Ranked>,
    seq: u64,
}

pub struct InMemoryQueue {
    queues: dashmap::DashMap<String, Mutex<QueueState>>,
    notify: dashmap::DashMap<String, std::sync::Arc<Notify>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: dashmap::DashMap::new(),
            notify: dashmap::DashMap::new(),
        }
    }

    fn notifier(&self, queue: &str) -> std::sync::Arc<Notify> {
        self.notify
            .entry(queue.to_string())
            .or_insert_with(|| std::sync::Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn publish(&self, queue: &str, payload: serde_json::Value, priority: u8) {
        let mut state = self
            .queues
            .entry(queue.to_string())
            .or_default()
            .lock();
        let seq = state.seq;
        state.seq += 1;
        state.heap.push(Ranked(
            QueuedPayload {
                queue: queue.to_string(),
                priority,
                body: payload,
            },
            seq,
        ));
        drop(state);
        self.notifier(queue).notify_one();
    }

    async fn consume(&self, queue: &str, prefetch: usize) -> Vec<QueuedPayload> {
        let prefetch = prefetch.max(1);
        loop {
            {
                let mut state = self
                    .queues
                    .entry(queue.to_string())
                    .or_default()
                    .lock();
                if !state.heap.is_empty() {
                    let mut out = Vec::new();
                    while out.len() < prefetch {
                        match state.heap.pop() {
                            Some(ranked) => out.push(ranked.0),
                            None => break,
                        }
                    }
                    return out;
                }
            }
            self.notifier(queue).notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn higher_priority_dequeued_first() {
        let q = InMemoryQueue::new();
        q.publish("default", json!({"id": 1}), 1).await;
        q.publish("default", json!({"id": 2}), 9).await;
        let items = q.consume("default", 1).await;
        assert_eq!(items[0].body["id"], 2);
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = InMemoryQueue::new();
        q.publish("default", json!({"id": 1}), 5).await;
        q.publish("default", json!({"id": 2}), 5).await;
        let items = q.consume("default", 2).await;
        assert_eq!(items[0].body["id"], 1);
        assert_eq!(items[1].body["id"], 2);
    }
}
