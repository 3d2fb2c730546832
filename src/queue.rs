//! C5: rate-limited work queues.
//!
//! A small reimplementation of client-go's `workqueue.RateLimitingInterface`
//! idiom: a FIFO of distinct pending keys, a "dirty" set that coalesces
//! duplicate `add`s, a "processing" set that defers a dirty re-add until the
//! in-flight item calls `done`, and a per-key exponential-backoff rate
//! limiter for `add_rate_limited`. Two instances of this type back C5: one
//! keyed by `ManagedCertificate` `CertID` queue keys, one by `Ingress` keys.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

struct Inner<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

struct RateLimiter<T> {
    failures: Mutex<HashMap<T, u32>>,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T: Eq + Hash + Clone> RateLimiter<T> {
    fn new(base_delay: Duration, max_delay: Duration) -> Self {
        RateLimiter {
            failures: Mutex::new(HashMap::new()),
            base_delay,
            max_delay,
        }
    }

    /// Exponential backoff: `base_delay * 2^failures`, capped at
    /// `max_delay`. Each call increments the failure count for `item`.
    async fn next_backoff(&self, item: &T) -> Duration {
        let mut failures = self.failures.lock().await;
        let count = failures.entry(item.clone()).or_insert(0);
        let exponent = (*count).min(30);
        *count += 1;
        let millis = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << exponent);
        let capped = millis.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }

    async fn forget(&self, item: &T) {
        self.failures.lock().await.remove(item);
    }
}

/// A rate-limited, deduplicating work queue keyed by `T`.
pub struct WorkQueue<T: Eq + Hash + Clone + Send + Sync + 'static> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    rate_limiter: RateLimiter<T>,
}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> WorkQueue<T> {
    pub fn new() -> Arc<Self> {
        Self::with_backoff(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }

    pub fn with_backoff(base_delay: Duration, max_delay: Duration) -> Arc<Self> {
        Arc::new(WorkQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter: RateLimiter::new(base_delay, max_delay),
        })
    }

    /// Enqueues `item` immediately. A duplicate `add` while the item is
    /// already pending or in flight coalesces to a single entry.
    pub async fn add(&self, item: T) {
        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            return;
        }
        if !inner.dirty.insert(item.clone()) {
            return;
        }
        if inner.processing.contains(&item) {
            // will be re-queued when `done` is called for the in-flight item
            return;
        }
        inner.queue.push_back(item);
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueues `item` after an exponentially increasing delay, for retry
    /// after a reconcile error.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let delay = this.rate_limiter.next_backoff(&item).await;
            tokio::time::sleep(delay).await;
            this.add(item).await;
        });
    }

    /// Resets the backoff counter for `item`, called after a successful
    /// reconcile.
    pub async fn forget(&self, item: &T) {
        self.rate_limiter.forget(item).await;
    }

    /// Blocks until an item is available or the queue is shut down (in
    /// which case `None` is returned once the backlog is drained).
    pub async fn get(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    return Some(item);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks `item` as finished processing. If it was re-`add`ed while in
    /// flight, it is moved back onto the queue now.
    pub async fn done(&self, item: &T) {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(item);
        if inner.dirty.contains(item) {
            inner.queue.push_back(item.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Stops accepting new items and wakes every blocked `get` so consumers
    /// can drain the remaining backlog and exit.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_add_coalesces_to_one_pending_entry() {
        let q: Arc<WorkQueue<String>> = WorkQueue::new();
        q.add("a".to_string()).await;
        q.add("a".to_string()).await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn get_then_done_surfaces_item_added_while_in_flight() {
        let q: Arc<WorkQueue<String>> = WorkQueue::new();
        q.add("a".to_string()).await;
        let item = q.get().await.unwrap();
        assert_eq!(item, "a");
        // re-add while in flight: must not be lost, must not double-process
        q.add("a".to_string()).await;
        assert_eq!(q.len().await, 0, "dirty re-add must not appear on queue until done()");
        q.done(&item).await;
        assert_eq!(q.len().await, 1, "done() must requeue the dirty re-add");
    }

    #[tokio::test]
    async fn shutdown_drains_then_returns_none() {
        let q: Arc<WorkQueue<String>> = WorkQueue::new();
        q.add("a".to_string()).await;
        q.shutdown().await;
        assert_eq!(q.get().await, Some("a".to_string()));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn add_after_shutdown_is_ignored() {
        let q: Arc<WorkQueue<String>> = WorkQueue::new();
        q.shutdown().await;
        q.add("a".to_string()).await;
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn add_rate_limited_backs_off_exponentially() {
        let q: Arc<WorkQueue<String>> = WorkQueue::with_backoff(
            Duration::from_millis(10),
            Duration::from_secs(10),
        );
        q.add_rate_limited("a".to_string());
        tokio::time::advance(Duration::from_millis(9)).await;
        assert_eq!(q.len().await, 0);
        tokio::time::advance(Duration::from_millis(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn forget_resets_backoff_counter() {
        let q: Arc<WorkQueue<String>> = WorkQueue::with_backoff(
            Duration::from_millis(1),
            Duration::from_secs(10),
        );
        let first = q.rate_limiter.next_backoff(&"a".to_string()).await;
        let second = q.rate_limiter.next_backoff(&"a".to_string()).await;
        assert!(second > first);
        q.forget(&"a".to_string()).await;
        let after_forget = q.rate_limiter.next_backoff(&"a".to_string()).await;
        assert_eq!(after_forget, first);
    }
}
