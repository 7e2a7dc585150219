//! Diffwatch diff: structural patch between two object snapshots, with
//! ignored paths.
//!
//! The patch is a list of RFC 6902 style operations (`add`, `remove`,
//! `replace`) addressed by JSON pointers. Arrays are compared index by index.
//! An operation is dropped when its path equals or lies under an ignored path.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("rendering patch: {0}")]
    Render(#[from] serde_json::Error),
    #[error("patch is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Ordered set of field paths excluded from comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    paths: Vec<Vec<String>>,
}

impl IgnoreRules {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<Vec<String>> = Vec::new();
        for p in paths {
            let segs = parse_path(p.as_ref());
            if segs.is_empty() {
                warn!(path = %p.as_ref(), "ignoring empty diff ignore path");
                continue;
            }
            if !out.contains(&segs) {
                out.push(segs);
            }
        }
        Self { paths: out }
    }

    pub fn is_empty(&self) -> bool { self.paths.is_empty() }

    pub fn len(&self) -> usize { self.paths.len() }

    /// True when `path` equals an ignored path or lies beneath one.
    pub fn is_ignored(&self, path: &[String]) -> bool {
        self.paths.iter().any(|rule| path.len() >= rule.len() && path[..rule.len()] == rule[..])
    }

    /// Rules rendered back as JSON pointers.
    pub fn pointers(&self) -> Vec<String> { self.paths.iter().map(|p| pointer(p)).collect() }
}

/// Split a JSON pointer (`/spec/replicas`) or dotted path
/// (`spec.containers[0].image`) into segments.
pub fn parse_path(p: &str) -> Vec<String> {
    let p = p.trim();
    if let Some(rest) = p.strip_prefix('/') {
        return rest.split('/').map(|s| s.replace("~1", "/").replace("~0", "~")).collect();
    }
    let p = p.strip_prefix('.').unwrap_or(p);
    let mut out = Vec::new();
    for seg in p.split('.').filter(|s| !s.is_empty()) {
        match seg.split_once('[') {
            Some((key, idx)) => {
                if !key.is_empty() { out.push(key.to_string()); }
                for part in idx.split('[') {
                    let part = part.trim_end_matches(']');
                    if !part.is_empty() { out.push(part.to_string()); }
                }
            }
            None => out.push(seg.to_string()),
        }
    }
    out
}

/// Render segments as a JSON pointer, escaping `~` and `/`.
pub fn pointer(segs: &[String]) -> String {
    let mut s = String::new();
    for seg in segs {
        s.push('/');
        s.push_str(&seg.replace('~', "~0").replace('/', "~1"));
    }
    s
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub op: OpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

pub fn summarize(ops: &[Operation]) -> DiffSummary {
    let mut s = DiffSummary::default();
    for op in ops {
        match op.op {
            OpKind::Add => s.adds += 1,
            OpKind::Replace => s.updates += 1,
            OpKind::Remove => s.removes += 1,
        }
    }
    s
}

/// Operations turning `previous` into `current`, minus ignored paths.
pub fn compare(previous: &Json, current: &Json, rules: &IgnoreRules) -> Vec<Operation> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk(previous, current, &mut path, rules, &mut out);
    out
}

fn walk(a: &Json, b: &Json, path: &mut Vec<String>, rules: &IgnoreRules, out: &mut Vec<Operation>) {
    if rules.is_ignored(path) || a == b {
        return;
    }
    match (a, b) {
        (Json::Object(ao), Json::Object(bo)) => walk_object(ao, bo, path, rules, out),
        (Json::Array(aa), Json::Array(bb)) => {
            let common = aa.len().min(bb.len());
            for i in 0..common {
                path.push(i.to_string());
                walk(&aa[i], &bb[i], path, rules, out);
                path.pop();
            }
            for (i, v) in bb.iter().enumerate().skip(common) {
                emit(OpKind::Add, i.to_string(), Some(v), path, rules, out);
            }
            // highest index first so the patch applies in order
            for i in (common..aa.len()).rev() {
                emit(OpKind::Remove, i.to_string(), None, path, rules, out);
            }
        }
        (_, bv) => out.push(Operation { op: OpKind::Replace, path: pointer(path), value: Some(bv.clone()) }),
    }
}

fn walk_object(ao: &Map<String, Json>, bo: &Map<String, Json>, path: &mut Vec<String>, rules: &IgnoreRules, out: &mut Vec<Operation>) {
    for (k, av) in ao.iter() {
        match bo.get(k) {
            Some(bv) => {
                path.push(k.clone());
                walk(av, bv, path, rules, out);
                path.pop();
            }
            None => emit(OpKind::Remove, k.clone(), None, path, rules, out),
        }
    }
    for (k, bv) in bo.iter() {
        if !ao.contains_key(k) {
            emit(OpKind::Add, k.clone(), Some(bv), path, rules, out);
        }
    }
}

fn emit(op: OpKind, seg: String, value: Option<&Json>, path: &mut Vec<String>, rules: &IgnoreRules, out: &mut Vec<Operation>) {
    path.push(seg);
    if !rules.is_ignored(path) {
        out.push(Operation { op, path: pointer(path), value: value.cloned() });
    }
    path.pop();
}

/// Indented text for a patch; empty patch renders as the empty string.
pub fn render(ops: &[Operation]) -> Result<String, DiffError> {
    if ops.is_empty() {
        return Ok(String::new());
    }
    let mut buf = Vec::new();
    let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
    ops.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

/// Best-effort diff text: render failures are logged and read as "no diff".
pub fn diff(previous: &Json, current: &Json, rules: &IgnoreRules) -> String {
    let ops = compare(previous, current, rules);
    match render(&ops) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to render diff; treating as no diff");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deploy(replicas: i64) -> Json {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web-1", "namespace": "default", "resourceVersion": "10" },
            "spec": { "replicas": replicas, "template": { "spec": { "containers": [ { "name": "app", "image": "nginx:1" } ] } } }
        })
    }

    #[test]
    fn replica_change_is_a_single_replace() {
        let ops = compare(&deploy(2), &deploy(3), &IgnoreRules::default());
        assert_eq!(ops, vec![Operation { op: OpKind::Replace, path: "/spec/replicas".into(), value: Some(json!(3)) }]);
        let text = render(&ops).unwrap();
        assert!(text.contains("\"/spec/replicas\""), "{}", text);
        assert!(text.contains("\n        \"op\": \"replace\""), "four-space indent expected: {}", text);
    }

    #[test]
    fn identical_documents_render_empty() {
        assert_eq!(diff(&deploy(2), &deploy(2), &IgnoreRules::default()), "");
    }

    #[test]
    fn ignored_path_suppresses_change_in_both_forms() {
        for rule in ["/spec/replicas", "spec.replicas", ".spec.replicas", "spec"] {
            let rules = IgnoreRules::new([rule]);
            assert_eq!(diff(&deploy(2), &deploy(3), &rules), "", "rule {}", rule);
        }
    }

    #[test]
    fn ignore_does_not_hide_sibling_changes() {
        let mut b = deploy(3);
        b["metadata"]["resourceVersion"] = json!("11");
        let rules = IgnoreRules::new(["/metadata/resourceVersion"]);
        let ops = compare(&deploy(2), &b, &rules);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path, "/spec/replicas");
    }

    #[test]
    fn prefix_match_is_segment_aware() {
        let rules = IgnoreRules::new(["/spec/rep"]);
        assert_eq!(compare(&deploy(2), &deploy(3), &rules).len(), 1);
    }

    #[test]
    fn added_and_removed_keys() {
        let a = json!({ "metadata": { "labels": { "app": "web", "tier": "fe" } } });
        let b = json!({ "metadata": { "labels": { "app": "web", "team": "core" } } });
        let ops = compare(&a, &b, &IgnoreRules::default());
        assert_eq!(ops, vec![
            Operation { op: OpKind::Remove, path: "/metadata/labels/tier".into(), value: None },
            Operation { op: OpKind::Add, path: "/metadata/labels/team".into(), value: Some(json!("core")) },
        ]);
        assert_eq!(summarize(&ops), DiffSummary { adds: 1, updates: 0, removes: 1 });
    }

    #[test]
    fn array_growth_and_shrink() {
        let a = json!({ "items": [1, 2, 3, 4] });
        let b = json!({ "items": [1, 9] });
        let ops = compare(&a, &b, &IgnoreRules::default());
        let paths: Vec<_> = ops.iter().map(|o| (o.op, o.path.as_str())).collect();
        assert_eq!(paths, vec![(OpKind::Replace, "/items/1"), (OpKind::Remove, "/items/3"), (OpKind::Remove, "/items/2")]);

        let grow = compare(&b, &a, &IgnoreRules::default());
        let paths: Vec<_> = grow.iter().map(|o| (o.op, o.path.as_str())).collect();
        assert_eq!(paths, vec![(OpKind::Replace, "/items/1"), (OpKind::Add, "/items/2"), (OpKind::Add, "/items/3")]);
    }

    #[test]
    fn dotted_index_paths_ignore_array_elements() {
        let mut b = deploy(2);
        b["spec"]["template"]["spec"]["containers"][0]["image"] = json!("nginx:2");
        let rules = IgnoreRules::new(["spec.template.spec.containers[0].image"]);
        assert!(compare(&deploy(2), &b, &rules).is_empty());
        assert_eq!(compare(&deploy(2), &b, &IgnoreRules::default())[0].path, "/spec/template/spec/containers/0/image");
    }

    #[test]
    fn type_change_is_replace() {
        let ops = compare(&json!({ "x": { "a": 1 } }), &json!({ "x": [1] }), &IgnoreRules::default());
        assert_eq!(ops, vec![Operation { op: OpKind::Replace, path: "/x".into(), value: Some(json!([1])) }]);
    }

    #[test]
    fn pointer_escaping_round_trips() {
        let a = json!({ "metadata": { "annotations": { "app.kubernetes.io/name": "a" } } });
        let b = json!({ "metadata": { "annotations": { "app.kubernetes.io/name": "b" } } });
        let ops = compare(&a, &b, &IgnoreRules::default());
        assert_eq!(ops[0].path, "/metadata/annotations/app.kubernetes.io~1name");
        let rules = IgnoreRules::new(["/metadata/annotations/app.kubernetes.io~1name"]);
        assert!(compare(&a, &b, &rules).is_empty());
        assert_eq!(rules.pointers(), vec!["/metadata/annotations/app.kubernetes.io~1name"]);
    }

    #[test]
    fn empty_and_duplicate_rules_are_dropped() {
        let rules = IgnoreRules::new(["", "/status", "status"]);
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut b = deploy(5);
        b["metadata"]["labels"] = json!({ "z": "1", "a": "2" });
        let one = diff(&deploy(2), &b, &IgnoreRules::default());
        let two = diff(&deploy(2), &b, &IgnoreRules::default());
        assert!(!one.is_empty());
        assert_eq!(one, two);
    }
}
