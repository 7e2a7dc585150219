//! Namespace watch set, computed once from the include/exclude policy.

use std::collections::BTreeSet;

use diffwatch_core::config::NamespacesConfig;
use diffwatch_core::ChangeEvent;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSet {
    names: BTreeSet<String>,
}

impl NamespaceSet {
    /// Whether computing the set requires listing the cluster's namespaces.
    pub fn needs_listing(cfg: &NamespacesConfig) -> bool { cfg.include.is_empty() }

    /// A non-empty include list is taken verbatim and exclude is ignored;
    /// otherwise the set is `all` minus `exclude`.
    pub fn compute(cfg: &NamespacesConfig, all: &[String]) -> Self {
        if !cfg.include.is_empty() {
            let names: BTreeSet<String> = cfg.include.iter().cloned().collect();
            info!(namespaces = ?names, "namespaces to watch (include list)");
            return Self { names };
        }
        let mut names: BTreeSet<String> = all.iter().cloned().collect();
        for ex in &cfg.exclude {
            if names.remove(ex) {
                info!(namespace = %ex, "removing namespace from watchlist");
            }
        }
        info!(namespaces = ?names, "namespaces to watch");
        Self { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    pub fn contains(&self, ns: &str) -> bool { self.names.contains(ns) }

    pub fn admits(&self, ev: &ChangeEvent) -> bool { self.contains(ev.filter_namespace()) }

    pub fn len(&self) -> usize { self.names.len() }

    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.names.iter().map(String::as_str) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(include: &[&str], exclude: &[&str]) -> NamespacesConfig {
        NamespacesConfig {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn all() -> Vec<String> { ["default", "kube-system", "prod", "staging"].iter().map(|s| s.to_string()).collect() }

    #[test]
    fn include_wins_over_exclude() {
        let set = NamespaceSet::compute(&cfg(&["prod", "not-listed"], &["prod"]), &all());
        assert_eq!(set, NamespaceSet::from_names(["prod", "not-listed"]));
        assert!(!NamespaceSet::needs_listing(&cfg(&["prod"], &[])));
    }

    #[test]
    fn exclude_removes_from_full_listing() {
        let set = NamespaceSet::compute(&cfg(&[], &["kube-system", "missing"]), &all());
        assert_eq!(set, NamespaceSet::from_names(["default", "prod", "staging"]));
        assert!(NamespaceSet::needs_listing(&cfg(&[], &["kube-system"])));
    }

    #[test]
    fn empty_policy_watches_everything() {
        let set = NamespaceSet::compute(&cfg(&[], &[]), &all());
        assert_eq!(set.len(), 4);
        assert!(set.contains("kube-system"));
    }
}
