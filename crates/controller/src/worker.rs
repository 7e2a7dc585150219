//! Per-kind worker: drains the change queue one item at a time.

use std::sync::Arc;

use diffwatch_core::{ChangeEvent, EventKind, WatchError, WatchedKind};
use diffwatch_queue::{ExponentialBackoff, WorkQueue};
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::classify::classify;
use crate::context::WatchContext;
use crate::dispatch::Dispatcher;

pub type ChangeQueue = WorkQueue<ChangeEvent>;

/// What happened to an item that was processed without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Dispatched,
    /// Classified as not worth an alert (Created before process start).
    Suppressed,
    /// Update whose diff was empty after ignore rules.
    NoDiff,
}

pub struct Controller {
    kind: WatchedKind,
    queue: Arc<ChangeQueue>,
    ctx: Arc<WatchContext>,
    dispatcher: Arc<Dispatcher>,
}

impl Controller {
    pub fn new(kind: WatchedKind, ctx: Arc<WatchContext>, dispatcher: Arc<Dispatcher>) -> Self {
        let limiter = ExponentialBackoff::new(ctx.backoff_base, ctx.backoff_max);
        let queue = Arc::new(WorkQueue::with_limiter(kind.tag.to_lowercase(), limiter));
        Self { kind, queue, ctx, dispatcher }
    }

    pub fn kind(&self) -> &WatchedKind { &self.kind }

    pub fn queue(&self) -> &Arc<ChangeQueue> { &self.queue }

    pub fn context(&self) -> &Arc<WatchContext> { &self.ctx }

    /// Resolve, classify, diff and dispatch one event.
    pub async fn process_item(&self, item: &ChangeEvent) -> Result<Outcome, WatchError> {
        let mut ev = item.clone();
        ev.resolve_namespace();

        let Some(verdict) = classify(&ev, self.ctx.started_at) else {
            debug!(kind = %ev.resource_type, name = %ev.key, "created before start; no alert");
            return Ok(Outcome::Suppressed);
        };

        let diff = match (ev.kind, ev.previous.as_ref(), ev.current.as_ref()) {
            (EventKind::Updated, Some(prev), Some(cur)) => {
                let d = diffwatch_diff::diff(prev, cur, &self.ctx.ignore);
                if d.is_empty() {
                    debug!(kind = %ev.resource_type, namespace = %ev.namespace, name = %ev.key, "no relevant changes");
                    return Ok(Outcome::NoDiff);
                }
                Some(d)
            }
            _ => None,
        };

        let alert = Dispatcher::alert(&ev, verdict, diff);
        self.dispatcher.dispatch(&alert).await?;
        Ok(Outcome::Dispatched)
    }

    /// Take one item and apply the retry policy. `false` once the queue is shut down.
    pub async fn process_next_item(&self) -> bool {
        let Some(item) = self.queue.get().await else { return false };
        match self.process_item(&item).await {
            Ok(_) => self.queue.forget(&item),
            Err(e) if self.queue.num_requeues(&item) < self.ctx.max_retries => {
                warn!(kind = %self.kind.tag, name = %item.key, error = %e, "error processing item (will retry)");
                counter!("diffwatch_events_retried_total", 1u64, "kind" => self.kind.tag.clone());
                self.queue.add_rate_limited(item.clone());
            }
            Err(e) => {
                error!(kind = %self.kind.tag, name = %item.key, error = %e, "error processing item (giving up)");
                counter!("diffwatch_events_dropped_total", 1u64, "kind" => self.kind.tag.clone());
                self.queue.forget(&item);
            }
        }
        self.queue.done(&item);
        true
    }

    /// Process items until the queue is shut down and drained.
    pub async fn run_worker(&self) {
        info!(kind = %self.kind.tag, "worker started");
        while self.process_next_item().await {}
        info!(kind = %self.kind.tag, "worker stopped");
    }
}
