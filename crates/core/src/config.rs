//! Configuration model, loaded once at startup and read-only afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::WatchError;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Per-kind enable flags for the built-in catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceFlags {
    pub deployment: bool,
    pub replicationcontroller: bool,
    pub replicaset: bool,
    pub daemonset: bool,
    pub statefulset: bool,
    pub services: bool,
    pub pod: bool,
    pub job: bool,
    pub node: bool,
    pub clusterrole: bool,
    pub clusterrolebinding: bool,
    pub serviceaccount: bool,
    pub persistentvolume: bool,
    pub namespace: bool,
    pub secret: bool,
    pub configmap: bool,
    pub ingress: bool,
    pub hpa: bool,
    pub event: bool,
    pub coreevent: bool,
}

impl ResourceFlags {
    /// `(flag name, enabled)` in catalog order.
    pub fn entries(&self) -> [(&'static str, bool); 20] {
        [
            ("deployment", self.deployment),
            ("replicationcontroller", self.replicationcontroller),
            ("replicaset", self.replicaset),
            ("daemonset", self.daemonset),
            ("statefulset", self.statefulset),
            ("services", self.services),
            ("pod", self.pod),
            ("job", self.job),
            ("node", self.node),
            ("clusterrole", self.clusterrole),
            ("clusterrolebinding", self.clusterrolebinding),
            ("serviceaccount", self.serviceaccount),
            ("persistentvolume", self.persistentvolume),
            ("namespace", self.namespace),
            ("secret", self.secret),
            ("configmap", self.configmap),
            ("ingress", self.ingress),
            ("hpa", self.hpa),
            ("event", self.event),
            ("coreevent", self.coreevent),
        ]
    }

    pub fn enabled(&self) -> Vec<&'static str> {
        self.entries().into_iter().filter(|(_, on)| *on).map(|(name, _)| name).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NamespacesConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DiffConfig {
    /// JSON pointers (`/spec/replicas`) or dotted paths (`spec.replicas`).
    pub ignore_path: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandlerConfig {
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self { Self { max_retries: DEFAULT_MAX_RETRIES, base_delay_ms: 5, max_delay_secs: 1000 } }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub resource: ResourceFlags,
    /// Extra kinds as GVK keys, e.g. `cert-manager.io/v1/Certificate`.
    pub custom_resources: Vec<String>,
    pub namespaces: NamespacesConfig,
    pub diff: DiffConfig,
    pub handler: HandlerConfig,
    pub queue: QueueConfig,
    pub sync_timeout_secs: u64,
    /// Zero disables the sink timeout.
    pub dispatch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resource: ResourceFlags::default(),
            custom_resources: Vec::new(),
            namespaces: NamespacesConfig::default(),
            diff: DiffConfig::default(),
            handler: HandlerConfig::default(),
            queue: QueueConfig::default(),
            sync_timeout_secs: 60,
            dispatch_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_yaml(s: &str) -> Result<Self, WatchError> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(s)?)
    }

    /// Load from `path` (or the default location) and apply env overrides.
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, WatchError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(s) => {
                info!(path = %path.display(), "loading config");
                Self::from_yaml(&s)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(e) => return Err(WatchError::Config(format!("reading {}: {}", path.display(), e))),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Overrides for container deployments where mounting a file is awkward.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("DIFFWATCH_NAMESPACES_INCLUDE") { self.namespaces.include = split_list(&v); }
        if let Some(v) = get("DIFFWATCH_NAMESPACES_EXCLUDE") { self.namespaces.exclude = split_list(&v); }
        if let Some(url) = get("DIFFWATCH_WEBHOOK_URL").filter(|u| !u.is_empty()) {
            let headers = self.handler.webhook.take().map(|w| w.headers).unwrap_or_default();
            self.handler.webhook = Some(WebhookConfig { url, headers });
        }
    }

    /// Checks that only make sense before `run`.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.resource.enabled().is_empty() && self.custom_resources.is_empty() {
            return Err(WatchError::Config("no resource kinds enabled".into()));
        }
        if let Some(w) = &self.handler.webhook {
            if w.url.is_empty() {
                return Err(WatchError::Config("handler.webhook.url is empty".into()));
            }
        }
        Ok(())
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}

pub fn default_config_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".diffwatch.yaml"),
        None => PathBuf::from(".diffwatch.yaml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let y = r#"
resource:
  deployment: true
  pod: true
customResources:
  - cert-manager.io/v1/Certificate
namespaces:
  exclude: [kube-system]
diff:
  ignorePath:
    - /metadata/resourceVersion
    - status
handler:
  webhook:
    url: http://hooks.local/alerts
queue:
  maxRetries: 3
syncTimeoutSecs: 10
"#;
        let cfg = Config::from_yaml(y).unwrap();
        assert_eq!(cfg.resource.enabled(), vec!["deployment", "pod"]);
        assert_eq!(cfg.custom_resources, vec!["cert-manager.io/v1/Certificate"]);
        assert_eq!(cfg.namespaces.exclude, vec!["kube-system"]);
        assert_eq!(cfg.diff.ignore_path.len(), 2);
        assert_eq!(cfg.handler.webhook.as_ref().map(|w| w.url.as_str()), Some("http://hooks.local/alerts"));
        assert_eq!(cfg.queue.max_retries, 3);
        assert_eq!(cfg.queue.base_delay_ms, 5);
        assert_eq!(cfg.sync_timeout_secs, 10);
        assert_eq!(cfg.dispatch_timeout_secs, 30);
    }

    #[test]
    fn empty_document_is_defaults() {
        let cfg = Config::from_yaml("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.queue.max_retries, DEFAULT_MAX_RETRIES);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_namespaces_and_webhook() {
        let mut cfg = Config::default();
        cfg.apply_env(|k| match k {
            "DIFFWATCH_NAMESPACES_INCLUDE" => Some("default, prod ,".into()),
            "DIFFWATCH_WEBHOOK_URL" => Some("http://x".into()),
            _ => None,
        });
        assert_eq!(cfg.namespaces.include, vec!["default", "prod"]);
        assert_eq!(cfg.handler.webhook.unwrap().url, "http://x");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let p = std::env::temp_dir().join("diffwatch-definitely-missing.yaml");
        let cfg = Config::load(Some(&p)).unwrap();
        assert_eq!(cfg.sync_timeout_secs, 60);
    }
}
