//! Diffwatch kubehub: discovery, list+watch snapshot source and namespace listing.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    runtime::{watcher, WatchStreamExt},
    Client,
};
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use diffwatch_core::{Notification, WatchedKind};

pub mod cache;
pub mod catalog;

pub use cache::{SnapshotCache, SourceEvent};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client (in-cluster or kubeconfig)")
}

/// A watched kind bound to its served API resource.
#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub watched: WatchedKind,
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl ResolvedKind {
    /// Api across all namespaces; namespace filtering happens downstream.
    pub fn api(&self, client: Client) -> Api<DynamicObject> { Api::all_with(client, &self.resource) }
}

/// Resolve kinds through one discovery pass. Kinds the server does not serve
/// are skipped with a warning.
pub async fn resolve_kinds(client: Client, kinds: &[WatchedKind]) -> Result<Vec<ResolvedKind>> {
    let discovery = Discovery::new(client).run().await.context("running api discovery")?;
    let mut out = Vec::with_capacity(kinds.len());
    for wk in kinds {
        let mut found = None;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == wk.group() && ar.version == wk.version() && ar.kind == wk.kind {
                    found = Some((ar.clone(), matches!(caps.scope, Scope::Namespaced)));
                }
            }
        }
        match found {
            Some((resource, namespaced)) => out.push(ResolvedKind { watched: wk.clone(), resource, namespaced }),
            None => warn!(gvk = %wk.gvk_key(), "kind not served by the cluster; skipping"),
        }
    }
    Ok(out)
}

/// Names of every namespace in the cluster.
pub async fn list_namespaces(client: Client) -> Result<Vec<String>> {
    let api: Api<Namespace> = Api::all(client);
    let list = api.list(&ListParams::default()).await.context("listing namespaces")?;
    Ok(list.items.into_iter().filter_map(|ns| ns.metadata.name).collect())
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_json(obj: &DynamicObject) -> Option<serde_json::Value> {
    match serde_json::to_value(obj) {
        Ok(mut v) => {
            strip_managed_fields(&mut v);
            Some(v)
        }
        Err(e) => {
            warn!(error = %e, "serializing DynamicObject");
            None
        }
    }
}

fn source_event(ev: watcher::Event<DynamicObject>) -> Option<SourceEvent> {
    match ev {
        watcher::Event::Applied(o) => to_json(&o).map(SourceEvent::Applied),
        watcher::Event::Deleted(o) => to_json(&o).map(SourceEvent::Deleted),
        watcher::Event::Restarted(list) => Some(SourceEvent::Restarted(list.iter().filter_map(to_json).collect())),
    }
}

/// List+watch one kind and hand every notification to `on_notify`.
///
/// `ready` flips to `true` after the first full list has been delivered.
/// Watch errors are retried with backoff; returns only if the stream ends.
pub async fn run_source<F>(api: Api<DynamicObject>, kind: &WatchedKind, ready: watch::Sender<bool>, mut on_notify: F) -> Result<()>
where
    F: FnMut(Notification),
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    let mut cache = SnapshotCache::new();
    info!(kind = %kind.tag, api_version = %kind.api_version, "watcher started");
    while let Some(res) = stream.next().await {
        let ev = match res {
            Ok(ev) => ev,
            Err(e) => {
                counter!("diffwatch_watch_errors_total", 1u64, "kind" => kind.tag.clone());
                warn!(kind = %kind.tag, error = %e, "watch error; backing off");
                continue;
            }
        };
        let Some(ev) = source_event(ev) else { continue };
        if let SourceEvent::Restarted(list) = &ev {
            debug!(kind = %kind.tag, count = list.len(), "watch restart");
        }
        for n in cache.apply(ev) {
            on_notify(n);
        }
        if cache.has_synced() && !*ready.borrow() {
            info!(kind = %kind.tag, objects = cache.len(), "cache synced");
            let _ = ready.send(true);
        }
    }
    warn!(kind = %kind.tag, "watcher stream ended");
    Ok(())
}
