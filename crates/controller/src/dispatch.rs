use std::sync::Arc;
use std::time::{Duration, Instant};

use diffwatch_core::{AlertRecord, ChangeEvent, WatchError};
use diffwatch_notify::Handler;
use metrics::{counter, histogram};
use tracing::debug;

use crate::classify::Verdict;

/// Hands alerts to the sink, synchronously from the worker.
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn Handler>, timeout: Option<Duration>) -> Self { Self { handler, timeout } }

    /// Build the alert for a resolved event.
    pub fn alert(ev: &ChangeEvent, verdict: Verdict, diff: Option<String>) -> AlertRecord {
        AlertRecord {
            name: ev.key.clone(),
            namespace: ev.namespace.clone(),
            kind: ev.resource_type.clone(),
            api_version: ev.api_version.clone(),
            status: verdict.severity,
            reason: verdict.reason,
            diff,
        }
    }

    /// Sink errors and timeouts come back as the item's processing error.
    pub async fn dispatch(&self, alert: &AlertRecord) -> Result<(), WatchError> {
        let t0 = Instant::now();
        let call = self.handler.handle(alert);
        let res = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(r) => r,
                Err(_) => return Err(WatchError::DispatchTimeout(limit)),
            },
            None => call.await,
        };
        histogram!("diffwatch_dispatch_ms", t0.elapsed().as_secs_f64() * 1000.0, "handler" => self.handler.name());
        res.map_err(|e| WatchError::Sink(format!("{}: {}", self.handler.name(), e)))?;
        counter!("diffwatch_alerts_dispatched_total", 1u64, "kind" => alert.kind.clone());
        debug!(handler = self.handler.name(), kind = %alert.kind, name = %alert.name, "alert dispatched");
        Ok(())
    }
}
