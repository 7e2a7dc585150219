//! Glue between one kind's watch source and its worker.

use std::future::Future;
use std::sync::Arc;

use diffwatch_core::{ChangeEvent, Notification};
use kube::{api::Api, core::DynamicObject};
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::worker::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Enqueued,
    /// Outside the namespace watch set.
    Filtered,
    /// No key could be derived.
    Rejected,
}

/// How a binding's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Synced, ran the worker, then drained on stop.
    Stopped,
    /// Stop arrived while waiting for the first full list.
    StoppedBeforeSync,
    /// The source never became ready; the worker was never started.
    SyncTimeout,
}

#[derive(Clone)]
pub struct WatchBinding {
    controller: Arc<Controller>,
}

impl WatchBinding {
    pub fn new(controller: Arc<Controller>) -> Self { Self { controller } }

    pub fn controller(&self) -> &Arc<Controller> { &self.controller }

    /// Turn a source notification into a queued change event.
    pub fn on_notification(&self, n: Notification) -> Admission {
        let kind = self.controller.kind();
        let ev = match ChangeEvent::from_notification(n, kind) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(kind = %kind.tag, error = %e, "dropping notification");
                counter!("diffwatch_events_dropped_total", 1u64, "kind" => kind.tag.clone());
                return Admission::Rejected;
            }
        };
        // cluster-scoped objects have no prefix, so their bare name is tested
        if !self.controller.context().namespaces.admits(&ev) {
            debug!(kind = %kind.tag, name = %ev.key, namespace = ev.filter_namespace(), "namespace not watched");
            counter!("diffwatch_events_filtered_total", 1u64, "kind" => kind.tag.clone());
            return Admission::Filtered;
        }
        info!(kind = %kind.tag, name = %ev.key, event = %ev.kind, "enqueue");
        counter!("diffwatch_events_enqueued_total", 1u64, "kind" => kind.tag.clone(), "event" => ev.kind.as_str());
        self.controller.queue().add(ev);
        Admission::Enqueued
    }

    /// List+watch `api` and run the worker until `stop` turns true.
    pub async fn run(self, api: Api<DynamicObject>, stop: watch::Receiver<bool>) -> RunExit {
        let (ready_tx, ready_rx) = watch::channel(false);
        let binding = self.clone();
        let source = async move {
            let kind = binding.controller.kind().clone();
            if let Err(e) = diffwatch_kubehub::run_source(api, &kind, ready_tx, |n| {
                binding.on_notification(n);
            })
            .await
            {
                error!(kind = %kind.tag, error = %e, "watch source failed");
            }
        };
        self.run_with_source(source, ready_rx, stop).await
    }

    /// Drive `source` and the worker until `stop` turns true.
    ///
    /// The worker starts only once `ready` turns true. If that does not
    /// happen within the sync timeout, or stop arrives first, the source is
    /// aborted and the queue shut down without the worker ever running.
    /// A closed `stop` channel counts as stop.
    pub async fn run_with_source<S>(&self, source: S, mut ready: watch::Receiver<bool>, mut stop: watch::Receiver<bool>) -> RunExit
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let kind = self.controller.kind().clone();
        let queue = Arc::clone(self.controller.queue());
        let source = tokio::spawn(source);

        let sync_timeout = self.controller.context().sync_timeout;
        let synced = tokio::select! {
            r = async { matches!(tokio::time::timeout(sync_timeout, ready.wait_for(|r| *r)).await, Ok(Ok(_))) } => r,
            _ = async { let _ = stop.wait_for(|s| *s).await; } => {
                info!(kind = %kind.tag, "stop requested before caches synced");
                source.abort();
                queue.shut_down();
                return RunExit::StoppedBeforeSync;
            }
        };
        if !synced {
            error!(kind = %kind.tag, timeout_secs = sync_timeout.as_secs_f64(), "timed out waiting for caches to sync");
            source.abort();
            queue.shut_down();
            return RunExit::SyncTimeout;
        }
        info!(kind = %kind.tag, "controller synced and ready");

        let controller = Arc::clone(&self.controller);
        let worker = tokio::spawn(async move { controller.run_worker().await });

        let _ = stop.wait_for(|s| *s).await;
        info!(kind = %kind.tag, "stopping controller");
        source.abort();
        queue.shut_down();
        let _ = worker.await;
        RunExit::Stopped
    }
}
