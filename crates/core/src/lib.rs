//! Diffwatch core types: change events, alerts, watched kinds and errors.

#![forbid(unsafe_code)]

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod config;

pub use config::Config;

/// Lifecycle transition observed for one object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Alert severity, lowest to highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Normal,
    Warning,
    Danger,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "Normal",
            Severity::Warning => "Warning",
            Severity::Danger => "Danger",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Shape of a notification coming out of a snapshot source.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Added(Value),
    Updated { old: Value, new: Value },
    Deleted(Value),
}

/// A kind registered for watching. `tag` is the resource-type label carried
/// by alerts; `kind` is the API kind used to resolve the resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WatchedKind {
    pub tag: String,
    pub api_version: String,
    pub kind: String,
}

impl WatchedKind {
    pub fn new(tag: impl Into<String>, api_version: impl Into<String>) -> Self {
        let tag = tag.into();
        Self { kind: tag.clone(), tag, api_version: api_version.into() }
    }

    /// Parse a GVK key (`v1/Kind` or `group/version/Kind`).
    pub fn from_gvk_key(key: &str) -> Result<Self, WatchError> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new(*kind, *version)),
            [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(*kind, format!("{}/{}", group, version)))
            }
            _ => Err(WatchError::Config(format!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key))),
        }
    }

    pub fn group(&self) -> &str {
        self.api_version.split_once('/').map(|(g, _)| g).unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.api_version.split_once('/').map(|(_, v)| v).unwrap_or(&self.api_version)
    }

    pub fn gvk_key(&self) -> String { format!("{}/{}", self.api_version, self.kind) }
}

/// One observed transition, as held by the change queue.
///
/// Queue identity is the whole value: two events for the same key with
/// different payloads are distinct work items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub kind: EventKind,
    pub resource_type: String,
    pub api_version: String,
    /// Empty until resolved by the worker.
    pub namespace: String,
    pub current: Option<Value>,
    pub previous: Option<Value>,
}

impl ChangeEvent {
    /// Build an event from a source notification. Fails when no key can be derived.
    pub fn from_notification(n: Notification, watched: &WatchedKind) -> Result<Self, WatchError> {
        let (kind, key, current, previous) = match n {
            Notification::Added(obj) => (EventKind::Created, object_key(&obj)?, Some(obj), None),
            // key comes from the previous state, as the informer does
            Notification::Updated { old, new } => (EventKind::Updated, object_key(&old)?, Some(new), Some(old)),
            Notification::Deleted(obj) => (EventKind::Deleted, object_key(&obj)?, Some(obj), None),
        };
        Ok(Self {
            key,
            kind,
            resource_type: watched.tag.clone(),
            api_version: watched.api_version.clone(),
            namespace: String::new(),
            current,
            previous,
        })
    }

    /// Namespace used by the namespace filter: the key prefix, else the
    /// namespace field, else the key itself.
    pub fn filter_namespace(&self) -> &str {
        match self.key.split_once('/') {
            Some((ns, _)) => ns,
            None if !self.namespace.is_empty() => &self.namespace,
            None => &self.key,
        }
    }

    /// Fill `namespace` and strip the namespace prefix from `key`.
    ///
    /// When the namespace is empty and the key is `ns/name`, the key prefix
    /// wins; otherwise the namespace comes from the current object's metadata.
    pub fn resolve_namespace(&mut self) {
        if self.namespace.is_empty() {
            if let Some((ns, name)) = self.key.split_once('/') {
                let (ns, name) = (ns.to_string(), name.to_string());
                self.namespace = ns;
                self.key = name;
                return;
            }
        }
        self.namespace = self.current.as_ref().and_then(object_namespace).unwrap_or("").to_string();
    }

    /// Creation timestamp of the current object, if present and parseable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.current.as_ref().and_then(creation_timestamp)
    }
}

impl Hash for ChangeEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.kind.hash(state);
        self.resource_type.hash(state);
        self.api_version.hash(state);
        self.namespace.hash(state);
        hash_opt_json(self.current.as_ref(), state);
        hash_opt_json(self.previous.as_ref(), state);
    }
}

fn hash_opt_json<H: Hasher>(v: Option<&Value>, state: &mut H) {
    match v {
        None => 0u8.hash(state),
        Some(v) => {
            1u8.hash(state);
            hash_json(v, state);
        }
    }
}

// Must agree with `Value`'s `Eq`: object entries are combined order-independently.
fn hash_json<H: Hasher>(v: &Value, state: &mut H) {
    match v {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            if let Some(u) = n.as_u64() {
                u.hash(state);
            } else if let Some(i) = n.as_i64() {
                i.hash(state);
            } else if let Some(f) = n.as_f64() {
                let bits = if f == 0.0 { 0 } else { f.to_bits() };
                bits.hash(state);
            }
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items { hash_json(item, state); }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut acc = 0u64;
            for (k, v) in map {
                let mut h = DefaultHasher::new();
                k.hash(&mut h);
                hash_json(v, &mut h);
                acc = acc.wrapping_add(h.finish());
            }
            acc.hash(state);
        }
    }
}

/// The unit handed to a notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertRecord {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub status: Severity,
    pub reason: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl AlertRecord {
    /// One-line human summary, used by plain-text sinks.
    pub fn summary(&self) -> String {
        let target = if self.namespace.is_empty() { self.name.clone() } else { format!("{}/{}", self.namespace, self.name) };
        format!("[{}] {} {} ({}) {}", self.status, self.kind, target, self.api_version, self.reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("cannot derive key: {0}")]
    Key(String),
    #[error("sink: {0}")]
    Sink(String),
    #[error("dispatch timed out after {0:?}")]
    DispatchTimeout(Duration),
    #[error("config: {0}")]
    Config(String),
    #[error("config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;

pub fn object_name(obj: &Value) -> Option<&str> {
    obj.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str())
}

pub fn object_namespace(obj: &Value) -> Option<&str> {
    obj.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
}

pub fn resource_version(obj: &Value) -> Option<&str> {
    obj.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str())
}

pub fn creation_timestamp(obj: &Value) -> Option<DateTime<Utc>> {
    obj.get("metadata")
        .and_then(|m| m.get("creationTimestamp"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `namespace/name`, or bare `name` for cluster-scoped objects.
pub fn object_key(obj: &Value) -> Result<String, WatchError> {
    let name = object_name(obj)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| WatchError::Key("object missing metadata.name".into()))?;
    match object_namespace(obj) {
        Some(ns) if !ns.is_empty() => Ok(format!("{}/{}", ns, name)),
        _ => Ok(name.to_string()),
    }
}

pub mod prelude {
    pub use super::{AlertRecord, ChangeEvent, EventKind, Notification, Severity, WatchError, WatchResult, WatchedKind};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pod(ns: Option<&str>, name: &str, replicas: i64) -> Value {
        let mut meta = serde_json::json!({ "name": name, "creationTimestamp": "2020-01-01T00:00:00Z" });
        if let Some(ns) = ns { meta["namespace"] = Value::String(ns.to_string()); }
        serde_json::json!({ "metadata": meta, "spec": { "replicas": replicas } })
    }

    fn pod_kind() -> WatchedKind { WatchedKind::new("Pod", "v1") }

    #[test]
    fn key_is_namespace_slash_name_or_bare_name() {
        assert_eq!(object_key(&pod(Some("default"), "web-1", 1)).unwrap(), "default/web-1");
        assert_eq!(object_key(&pod(None, "node-a", 1)).unwrap(), "node-a");
        assert!(matches!(object_key(&serde_json::json!({ "metadata": {} })), Err(WatchError::Key(_))));
    }

    #[test]
    fn update_notification_keys_off_previous_state() {
        let ev = ChangeEvent::from_notification(
            Notification::Updated { old: pod(Some("default"), "web-1", 2), new: pod(Some("default"), "web-1", 3) },
            &pod_kind(),
        )
        .unwrap();
        assert_eq!(ev.kind, EventKind::Updated);
        assert_eq!(ev.key, "default/web-1");
        assert_eq!(ev.resource_type, "Pod");
        assert!(ev.previous.is_some());
        assert!(ev.namespace.is_empty());
    }

    #[test]
    fn resolve_namespace_splits_key_prefix() {
        let mut ev = ChangeEvent::from_notification(Notification::Added(pod(Some("default"), "web-1", 1)), &pod_kind()).unwrap();
        ev.resolve_namespace();
        assert_eq!(ev.namespace, "default");
        assert_eq!(ev.key, "web-1");
    }

    #[test]
    fn resolve_namespace_falls_back_to_metadata() {
        let mut ev = ChangeEvent::from_notification(Notification::Added(pod(None, "node-a", 1)), &WatchedKind::new("Node", "v1")).unwrap();
        ev.resolve_namespace();
        assert_eq!(ev.namespace, "");
        assert_eq!(ev.key, "node-a");
    }

    #[test]
    fn filter_namespace_prefers_key_prefix() {
        let ev = ChangeEvent::from_notification(Notification::Added(pod(Some("kube-system"), "dns", 1)), &pod_kind()).unwrap();
        assert_eq!(ev.filter_namespace(), "kube-system");
        let ns = ChangeEvent::from_notification(Notification::Added(pod(None, "staging", 1)), &WatchedKind::new("Namespace", "v1")).unwrap();
        assert_eq!(ns.filter_namespace(), "staging");
    }

    #[test]
    fn identical_events_hash_equal_and_payload_changes_do_not() {
        let a = ChangeEvent::from_notification(Notification::Added(pod(Some("default"), "web-1", 1)), &pod_kind()).unwrap();
        let b = ChangeEvent::from_notification(Notification::Added(pod(Some("default"), "web-1", 1)), &pod_kind()).unwrap();
        let c = ChangeEvent::from_notification(Notification::Added(pod(Some("default"), "web-1", 2)), &pod_kind()).unwrap();
        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
        assert!(set.insert(c));
    }

    #[test]
    fn gvk_key_parsing() {
        let core = WatchedKind::from_gvk_key("v1/ConfigMap").unwrap();
        assert_eq!(core.api_version, "v1");
        assert_eq!(core.group(), "");
        let crd = WatchedKind::from_gvk_key("cert-manager.io/v1/Certificate").unwrap();
        assert_eq!(crd.api_version, "cert-manager.io/v1");
        assert_eq!(crd.group(), "cert-manager.io");
        assert_eq!(crd.version(), "v1");
        assert_eq!(crd.gvk_key(), "cert-manager.io/v1/Certificate");
        assert!(WatchedKind::from_gvk_key("Certificate").is_err());
    }

    #[test]
    fn alert_serializes_api_version_and_omits_empty_diff() {
        let a = AlertRecord {
            name: "web-1".into(),
            namespace: "default".into(),
            kind: "Pod".into(),
            api_version: "v1".into(),
            status: Severity::Danger,
            reason: EventKind::Deleted,
            diff: None,
        };
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["apiVersion"], "v1");
        assert_eq!(v["status"], "Danger");
        assert_eq!(v["reason"], "Deleted");
        assert!(v.get("diff").is_none());
        assert_eq!(a.summary(), "[Danger] Pod default/web-1 (v1) Deleted");
    }
}
