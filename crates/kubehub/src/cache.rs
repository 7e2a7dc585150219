//! Local snapshot cache turning raw watch events into add/update/delete
//! notifications.

use diffwatch_core::{object_key, resource_version, Notification};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::{debug, warn};

/// Raw watch stream event, already converted to JSON.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Applied(Json),
    Deleted(Json),
    /// Full relist; the first one marks the cache as synced.
    Restarted(Vec<Json>),
}

#[derive(Debug, Default)]
pub struct SnapshotCache {
    objects: FxHashMap<String, Json>,
    synced: bool,
}

impl SnapshotCache {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.objects.len() }

    pub fn is_empty(&self) -> bool { self.objects.is_empty() }

    pub fn has_synced(&self) -> bool { self.synced }

    pub fn get(&self, key: &str) -> Option<&Json> { self.objects.get(key) }

    pub fn apply(&mut self, ev: SourceEvent) -> Vec<Notification> {
        let mut out = Vec::new();
        match ev {
            SourceEvent::Applied(obj) => {
                if let Some(key) = key_or_warn(&obj) {
                    let old = self.objects.insert(key, obj.clone());
                    push_applied(old, obj, &mut out);
                }
            }
            SourceEvent::Deleted(obj) => {
                if let Some(key) = key_or_warn(&obj) {
                    self.objects.remove(&key);
                    out.push(Notification::Deleted(obj));
                }
            }
            SourceEvent::Restarted(list) => {
                let mut next: FxHashMap<String, Json> = FxHashMap::default();
                for obj in list {
                    let Some(key) = key_or_warn(&obj) else { continue };
                    let old = self.objects.remove(&key);
                    next.insert(key, obj.clone());
                    push_applied(old, obj, &mut out);
                }
                // whatever was not relisted is gone
                let mut gone: Vec<_> = self.objects.drain().collect();
                gone.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, obj) in gone {
                    debug!(key = %key, "object vanished across relist");
                    out.push(Notification::Deleted(obj));
                }
                self.objects = next;
                self.synced = true;
            }
        }
        out
    }
}

fn key_or_warn(obj: &Json) -> Option<String> {
    match object_key(obj) {
        Ok(k) => Some(k),
        Err(e) => {
            warn!(error = %e, "dropping watch event without a usable key");
            None
        }
    }
}

fn push_applied(old: Option<Json>, new: Json, out: &mut Vec<Notification>) {
    match old {
        None => out.push(Notification::Added(new)),
        Some(old) => {
            let same_rv = matches!((resource_version(&old), resource_version(&new)), (Some(a), Some(b)) if a == b);
            if same_rv || old == new {
                return;
            }
            out.push(Notification::Updated { old, new });
        }
    }
}
