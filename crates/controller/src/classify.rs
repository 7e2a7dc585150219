//! Event classification: each event is judged on its own, against the
//! process start time only.

use chrono::{DateTime, Utc};
use diffwatch_core::{ChangeEvent, EventKind, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub severity: Severity,
    pub reason: EventKind,
}

pub fn created_severity(resource_type: &str) -> Severity {
    match resource_type {
        "NodeNotReady" | "NodeRebooted" | "Backoff" => Severity::Danger,
        "NodeReady" => Severity::Normal,
        _ => Severity::Normal,
    }
}

pub fn updated_severity(resource_type: &str) -> Severity {
    match resource_type {
        "Backoff" => Severity::Danger,
        _ => Severity::Warning,
    }
}

/// `None` means the event is handled without an alert.
///
/// Updates always get a verdict here; an empty diff is decided later.
pub fn classify(ev: &ChangeEvent, started_at: DateTime<Utc>) -> Option<Verdict> {
    match ev.kind {
        EventKind::Created => match ev.created_at() {
            Some(ts) if ts > started_at => Some(Verdict { severity: created_severity(&ev.resource_type), reason: EventKind::Created }),
            _ => None,
        },
        EventKind::Updated => Some(Verdict { severity: updated_severity(&ev.resource_type), reason: EventKind::Updated }),
        EventKind::Deleted => Some(Verdict { severity: Severity::Danger, reason: EventKind::Deleted }),
    }
}
