//! Diffwatch change queue: a deduplicating FIFO with per-item backoff.
//!
//! Items are identified by value. While an item is queued, adding it again
//! coalesces; while it is being processed, a re-add is parked and queued
//! again on [`WorkQueue::done`].

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Decides how long a failed item waits before it is eligible again.
pub trait RateLimiter<T>: Send {
    /// Delay for the next retry of `item`; counts one more failure.
    fn when(&mut self, item: &T) -> Duration;
    /// Reset the failure count of `item`.
    fn forget(&mut self, item: &T);
    /// Failures recorded for `item` since the last `forget`.
    fn num_requeues(&self, item: &T) -> u32;
}

/// `base * 2^failures`, capped at `max`.
pub struct ExponentialBackoff<T> {
    failures: FxHashMap<T, u32>,
    base: Duration,
    max: Duration,
}

impl<T> ExponentialBackoff<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { failures: FxHashMap::default(), base, max }
    }
}

impl<T> Default for ExponentialBackoff<T> {
    fn default() -> Self { Self::new(Duration::from_millis(5), Duration::from_secs(1000)) }
}

impl<T: Clone + Eq + Hash + Send> RateLimiter<T> for ExponentialBackoff<T> {
    fn when(&mut self, item: &T) -> Duration {
        let n = self.failures.entry(item.clone()).or_insert(0);
        let exp = *n;
        *n = n.saturating_add(1);
        self.base.saturating_mul(2u32.saturating_pow(exp)).min(self.max)
    }

    fn forget(&mut self, item: &T) { self.failures.remove(item); }

    fn num_requeues(&self, item: &T) -> u32 { self.failures.get(item).copied().unwrap_or(0) }
}

struct State<T, L> {
    queue: VecDeque<T>,
    /// Items waiting to be handed out (queued, or parked behind processing).
    dirty: FxHashSet<T>,
    processing: FxHashSet<T>,
    shutting_down: bool,
    limiter: L,
}

/// Work queue shared between the notification path and a single worker.
pub struct WorkQueue<T, L = ExponentialBackoff<T>> {
    name: String,
    state: Mutex<State<T, L>>,
    notify: Notify,
}

impl<T> WorkQueue<T, ExponentialBackoff<T>>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(name: impl Into<String>) -> Self { Self::with_limiter(name, ExponentialBackoff::default()) }
}

impl<T, L> WorkQueue<T, L>
where
    T: Clone + Eq + Hash + Send + 'static,
    L: RateLimiter<T> + 'static,
{
    pub fn with_limiter(name: impl Into<String>, limiter: L) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: FxHashSet::default(),
                processing: FxHashSet::default(),
                shutting_down: false,
                limiter,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, L>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report_depth(&self, depth: usize) {
        gauge!("diffwatch_queue_depth", depth as f64, "queue" => self.name.clone());
    }

    fn rejected(&self, why: &'static str) {
        counter!("diffwatch_queue_rejected_total", 1u64, "queue" => self.name.clone());
        warn!(queue = %self.name, why, "queue shutting down; item dropped");
    }

    pub fn name(&self) -> &str { &self.name }

    /// Items ready to be handed out.
    pub fn len(&self) -> usize { self.lock().queue.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn is_shutting_down(&self) -> bool { self.lock().shutting_down }

    /// Enqueue `item` unless an identical item is already pending.
    pub fn add(&self, item: T) {
        let mut st = self.lock();
        if st.shutting_down {
            drop(st);
            self.rejected("add");
            return;
        }
        if st.dirty.contains(&item) {
            counter!("diffwatch_queue_coalesced_total", 1u64, "queue" => self.name.clone());
            return;
        }
        st.dirty.insert(item.clone());
        if st.processing.contains(&item) {
            return;
        }
        st.queue.push_back(item);
        let depth = st.queue.len();
        drop(st);
        self.report_depth(depth);
        self.notify.notify_one();
    }

    /// Wait for the next item. `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                if let Some(item) = st.queue.pop_front() {
                    st.dirty.remove(&item);
                    st.processing.insert(item.clone());
                    let depth = st.queue.len();
                    drop(st);
                    self.report_depth(depth);
                    return Some(item);
                }
                if st.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark processing of `item` finished; a parked re-add becomes ready.
    pub fn done(&self, item: &T) {
        let mut st = self.lock();
        st.processing.remove(item);
        if st.dirty.contains(item) {
            st.queue.push_back(item.clone());
            drop(st);
            self.notify.notify_one();
        }
    }

    pub fn forget(&self, item: &T) { self.lock().limiter.forget(item); }

    pub fn num_requeues(&self, item: &T) -> u32 { self.lock().limiter.num_requeues(item) }

    /// Re-add `item` after the limiter's backoff for it.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.lock().limiter.when(&item);
        self.add_after(item, delay);
    }

    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            self.rejected("retry");
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        debug!(queue = %self.name, delay_ms = delay.as_millis() as u64, "delaying re-add");
        let q = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            q.add(item);
        });
    }

    /// Stop accepting items and release blocked `get` callers once drained.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
        debug!(queue = %self.name, "queue shutting down");
    }
}
