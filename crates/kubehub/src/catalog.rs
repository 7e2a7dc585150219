//! Built-in kinds that can be switched on from the `resource` config section.

use anyhow::Result;
use diffwatch_core::{Config, WatchedKind};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Field name under `resource:` in the config file.
    pub flag: &'static str,
    pub tag: &'static str,
    pub api_version: &'static str,
}

impl CatalogEntry {
    pub fn watched(&self) -> WatchedKind { WatchedKind::new(self.tag, self.api_version) }
}

const fn entry(flag: &'static str, tag: &'static str, api_version: &'static str) -> CatalogEntry {
    CatalogEntry { flag, tag, api_version }
}

pub const CATALOG: &[CatalogEntry] = &[
    entry("deployment", "Deployment", "apps/v1"),
    entry("replicationcontroller", "ReplicationController", "v1"),
    entry("replicaset", "ReplicaSet", "apps/v1"),
    entry("daemonset", "DaemonSet", "apps/v1"),
    entry("statefulset", "StatefulSet", "apps/v1"),
    entry("services", "Service", "v1"),
    entry("pod", "Pod", "v1"),
    entry("job", "Job", "batch/v1"),
    entry("node", "Node", "v1"),
    entry("clusterrole", "ClusterRole", "rbac.authorization.k8s.io/v1"),
    entry("clusterrolebinding", "ClusterRoleBinding", "rbac.authorization.k8s.io/v1"),
    entry("serviceaccount", "ServiceAccount", "v1"),
    entry("persistentvolume", "PersistentVolume", "v1"),
    entry("namespace", "Namespace", "v1"),
    entry("secret", "Secret", "v1"),
    entry("configmap", "ConfigMap", "v1"),
    entry("ingress", "Ingress", "networking.k8s.io/v1"),
    entry("hpa", "HorizontalPodAutoscaler", "autoscaling/v1"),
    entry("event", "Event", "events.k8s.io/v1"),
    entry("coreevent", "Event", "v1"),
];

pub fn lookup(flag: &str) -> Option<&'static CatalogEntry> { CATALOG.iter().find(|e| e.flag == flag) }

/// Kinds switched on in `cfg`: catalog flags first, then custom GVK keys.
pub fn enabled_kinds(cfg: &Config) -> Result<Vec<WatchedKind>> {
    let mut out = Vec::new();
    for flag in cfg.resource.enabled() {
        match lookup(flag) {
            Some(e) => out.push(e.watched()),
            None => warn!(flag, "resource flag has no catalog entry"),
        }
    }
    for key in &cfg.custom_resources {
        let kind = WatchedKind::from_gvk_key(key)?;
        if !out.contains(&kind) {
            out.push(kind);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_config_flag_has_an_entry() {
        let flags = diffwatch_core::config::ResourceFlags::default();
        for (flag, _) in flags.entries() {
            assert!(lookup(flag).is_some(), "missing catalog entry for {}", flag);
        }
        assert_eq!(CATALOG.len(), flags.entries().len());
    }

    #[test]
    fn enabled_kinds_merges_custom_resources() {
        let mut cfg = Config::default();
        cfg.resource.pod = true;
        cfg.resource.coreevent = true;
        cfg.custom_resources = vec!["cert-manager.io/v1/Certificate".into(), "v1/Pod".into()];
        let kinds = enabled_kinds(&cfg).unwrap();
        let keys: Vec<_> = kinds.iter().map(|k| k.gvk_key()).collect();
        assert_eq!(keys, vec!["v1/Pod", "v1/Event", "cert-manager.io/v1/Certificate"]);
    }

    #[test]
    fn bad_custom_key_is_an_error() {
        let mut cfg = Config::default();
        cfg.custom_resources = vec!["Certificate".into()];
        assert!(enabled_kinds(&cfg).is_err());
    }
}
