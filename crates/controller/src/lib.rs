//! Diffwatch controller: one watch loop per enabled resource kind.
//!
//! Each loop runs a namespace-filtered source into a deduplicating queue,
//! drained by a single worker that classifies, diffs and dispatches.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use diffwatch_core::Config;
use diffwatch_notify::Handler;
use futures::future::join_all;
use kube::Client;
use tokio::sync::watch;
use tracing::{info, warn};

pub mod binding;
pub mod classify;
pub mod context;
pub mod dispatch;
pub mod namespace;
pub mod worker;

pub use binding::{Admission, RunExit, WatchBinding};
pub use classify::{classify, Verdict};
pub use context::WatchContext;
pub use dispatch::Dispatcher;
pub use namespace::NamespaceSet;
pub use worker::{Controller, Outcome};

/// Compute the namespace watch set, listing the cluster only when needed.
pub async fn watch_namespaces(client: Client, cfg: &Config) -> Result<NamespaceSet> {
    let all = if NamespaceSet::needs_listing(&cfg.namespaces) {
        diffwatch_kubehub::list_namespaces(client).await?
    } else {
        Vec::new()
    };
    Ok(NamespaceSet::compute(&cfg.namespaces, &all))
}

/// Start every enabled kind and block until `stop` turns true and all
/// loops have wound down.
pub async fn run(client: Client, cfg: &Config, handler: Arc<dyn Handler>, stop: watch::Receiver<bool>) -> Result<()> {
    let started_at = Utc::now();
    let kinds = diffwatch_kubehub::catalog::enabled_kinds(cfg)?;
    if kinds.is_empty() {
        warn!("no resource kinds enabled; nothing to watch");
    }
    let namespaces = watch_namespaces(client.clone(), cfg).await.context("computing namespace watch set")?;
    let resolved = diffwatch_kubehub::resolve_kinds(client.clone(), &kinds).await?;

    let ctx = Arc::new(WatchContext::from_config(cfg, started_at, namespaces));
    let dispatcher = Arc::new(Dispatcher::new(handler, ctx.dispatch_timeout));

    let mut tasks = Vec::with_capacity(resolved.len());
    for rk in resolved {
        let controller = Arc::new(Controller::new(rk.watched.clone(), Arc::clone(&ctx), Arc::clone(&dispatcher)));
        let binding = WatchBinding::new(controller);
        let api = rk.api(client.clone());
        info!(kind = %rk.watched.tag, api_version = %rk.watched.api_version, namespaced = rk.namespaced, "starting controller");
        tasks.push(tokio::spawn(binding.run(api, stop.clone())));
    }

    for res in join_all(tasks).await {
        if let Err(e) = res {
            warn!(error = %e, "controller task panicked");
        }
    }
    info!("all controllers stopped");
    Ok(())
}
