//! In-flight Coalescer (§4.6) — per-process dedup of identical concurrent requests.
//!
//! Grounded on the "future per key" pattern: a pending entry is a shared
//! broadcast channel; late arrivals subscribe and await the same outcome
//! instead of re-running `compute_fn`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

type SharedResult<T, E> = Result<T, E>;

pub struct Coalescer<T, E> {
    inflight: DashMap<String, broadcast::Sender<SharedResult<T, E>>>,
}

impl<T, E> Default for Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Runs `compute_fn` at most once for any set of concurrent callers
    /// sharing `key`; everyone observes the same `Ok`/`Err` outcome.
    pub async fn coalesce<F, Fut>(&self, key: &str, compute_fn: F) -> SharedResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = SharedResult<T, E>>,
    {
        // Fast path: join an existing computation.
        if let Some(sender) = self.inflight.get(key).map(|e| e.clone()) {
            let mut rx = sender.subscribe();
            drop(sender);
            if let Ok(result) = rx.recv().await {
                return result;
            }
            // Sender was dropped without a send (panic in compute_fn) — fall through to recompute.
        }

        // Try to become the leader for this key.
        let (tx, _rx) = broadcast::channel(1);
        let became_leader = match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(tx.clone());
                true
            }
            dashmap::mapref::entry::Entry::Occupied(_) => false,
        };

        if !became_leader {
            // Lost the race; wait on whoever got there first.
            if let Some(sender) = self.inflight.get(key).map(|e| e.clone()) {
                let mut rx = sender.subscribe();
                if let Ok(result) = rx.recv().await {
                    return result;
                }
            }
        }

        let result = compute_fn().await;
        let _ = tx.send(result.clone());
        self.inflight.remove(key);
        result
    }

    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_calls_compute_once() {
        let coalescer: Arc<Coalescer<i32, String>> = Arc::new(Coalescer::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let c = coalescer.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                c.coalesce("key", || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok::<i32, String>(42)
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(42));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_propagates_to_all_waiters() {
        let coalescer: Arc<Coalescer<i32, String>> = Arc::new(Coalescer::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let c = coalescer.clone();
            handles.push(tokio::spawn(async move {
                c.coalesce("key", || async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Err::<i32, String>("boom".to_string())
                })
                .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Err("boom".to_string()));
        }
    }

    #[tokio::test]
    async fn entry_removed_after_completion() {
        let coalescer: Arc<Coalescer<i32, String>> = Arc::new(Coalescer::new());
        coalescer
            .coalesce("key", || async { Ok::<i32, String>(1) })
            .await
            .unwrap();
        assert_eq!(coalescer.in_flight_count(), 0);
    }
}
