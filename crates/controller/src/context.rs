use std::time::Duration;

use chrono::{DateTime, Utc};
use diffwatch_core::Config;
use diffwatch_diff::IgnoreRules;

use crate::namespace::NamespaceSet;

/// Process-wide settings shared read-only by every watch loop.
#[derive(Debug, Clone)]
pub struct WatchContext {
    /// Objects created at or before this instant never raise a Created alert.
    pub started_at: DateTime<Utc>,
    pub namespaces: NamespaceSet,
    pub ignore: IgnoreRules,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub sync_timeout: Duration,
    pub dispatch_timeout: Option<Duration>,
}

impl WatchContext {
    pub fn new(started_at: DateTime<Utc>, namespaces: NamespaceSet, ignore: IgnoreRules) -> Self {
        Self::from_config(&Config::default(), started_at, namespaces).with_ignore(ignore)
    }

    pub fn from_config(cfg: &Config, started_at: DateTime<Utc>, namespaces: NamespaceSet) -> Self {
        Self {
            started_at,
            namespaces,
            ignore: IgnoreRules::new(&cfg.diff.ignore_path),
            max_retries: cfg.queue.max_retries,
            backoff_base: Duration::from_millis(cfg.queue.base_delay_ms),
            backoff_max: Duration::from_secs(cfg.queue.max_delay_secs),
            sync_timeout: Duration::from_secs(cfg.sync_timeout_secs),
            dispatch_timeout: match cfg.dispatch_timeout_secs {
                0 => None,
                s => Some(Duration::from_secs(s)),
            },
        }
    }

    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }
}
