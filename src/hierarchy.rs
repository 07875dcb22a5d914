//! C7 — hierarchy merger + `project.hcl` evaluator (SPEC_FULL §4.7).
//!
//! `account.hcl`/`env.hcl`/`region.hcl`/`common.hcl` go through the static
//! parser (C2). `project.hcl` usually carries a handful of dynamic
//! expressions (a `try(local.env_vars.X, "…")` fallback, a ternary, a
//! `basename(get_terragrunt_dir())` call) that the static parser would
//! just drop, so it gets a small dedicated evaluator instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::RenderError;
use crate::locator::HclFileLocator;
use crate::static_parser;
use crate::value::Value;

/// Outermost to closest-to-resource; `common.hcl` is always last and always
/// wins ties, matching Testable Property 1.
pub const MERGE_ORDER: [&str; 5] = ["account.hcl", "env.hcl", "project.hcl", "region.hcl", "common.hcl"];

const DEFAULT_REGION: &str = "europe-west2";

pub struct HierarchyMerger {
    resource_path: PathBuf,
    repo_root: PathBuf,
    pub sources: HashMap<String, String>,
}

impl HierarchyMerger {
    pub fn new(resource_path: PathBuf, repo_root: PathBuf) -> Self {
        Self { resource_path, repo_root, sources: HashMap::new() }
    }

    /// Runs the full hierarchy merge, returning `(merged, derived,
    /// standard_labels)`. `derived.resource_name` is not set here — see
    /// [`add_resource_name`].
    pub fn merge(&mut self) -> Result<(Value, Value, Value), RenderError> {
        let locator = HclFileLocator::new(self.resource_path.clone(), self.repo_root.clone());
        let located = locator.locate_all()?;
        let paths: HashMap<&str, &Option<PathBuf>> = located.iter().map(|(n, p)| (n.as_str(), p)).collect();

        let mut per_file: HashMap<&str, Vec<(String, Value)>> = HashMap::new();
        for filename in MERGE_ORDER {
            let Some(path) = paths.get(filename).and_then(|p| p.as_ref()) else {
                per_file.insert(filename, Vec::new());
                continue;
            };
            tracing::debug!(file = filename, path = %path.display(), "parsing hierarchy file");
            let content = std::fs::read_to_string(path)
                .map_err(|e| RenderError::Io { path: path.clone(), source: e })?;
            let values = if filename == "project.hcl" {
                let env_locals = per_file.get("env.hcl").cloned().unwrap_or_default();
                let account_locals = per_file.get("account.hcl").cloned().unwrap_or_default();
                ProjectEvaluator::new(&self.resource_path, env_locals, account_locals).evaluate(&content)
            } else {
                static_parser::parse(&content, filename == "common.hcl")
            };
            per_file.insert(filename, values);
        }

        let mut merged: Vec<(String, Value)> = Vec::new();
        for filename in MERGE_ORDER {
            let source_label = paths
                .get(filename)
                .and_then(|p| p.as_ref())
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| filename.to_string());
            for (key, val) in per_file.remove(filename).unwrap_or_default() {
                self.sources.insert(key.clone(), source_label.clone());
                set(&mut merged, key, val);
            }
        }

        let derived = derive(&merged);
        let labels = standard_labels(&merged, &derived);
        Ok((Value::Map(merged), derived, labels))
    }
}

/// Sets `derived.resource_name` from the resource directory's basename,
/// after the merge, since it depends on the resource path rather than the
/// merged hierarchy.
pub fn add_resource_name(derived: &mut Value, resource_path: &Path) {
    if let Value::Map(m) = derived {
        let name = resource_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        set(m, "resource_name".to_string(), Value::String(name));
    }
}

fn derive(merged: &[(String, Value)]) -> Value {
    let get = |key: &str| lookup(merged, key).cloned();
    Value::Map(vec![
        ("name_prefix".to_string(), get("name_prefix").unwrap_or_else(|| Value::String(String::new()))),
        ("region".to_string(), get("region").unwrap_or_else(|| Value::String(DEFAULT_REGION.to_string()))),
        ("environment".to_string(), get("environment").unwrap_or_else(|| Value::String(String::new()))),
        ("environment_type".to_string(), get("environment_type").unwrap_or_else(|| Value::String(String::new()))),
        ("project_name".to_string(), get("project_name").unwrap_or_else(|| Value::String(String::new()))),
        ("module_versions".to_string(), get("module_versions").unwrap_or_else(Value::empty_map)),
    ])
}

fn standard_labels(merged: &[(String, Value)], derived: &Value) -> Value {
    let mut labels: Vec<(String, Value)> = vec![
        ("environment".to_string(), derived.map_get("environment").cloned().unwrap_or_else(|| Value::String(String::new()))),
        (
            "environment_type".to_string(),
            derived.map_get("environment_type").cloned().unwrap_or_else(|| Value::String(String::new())),
        ),
        ("managed_by".to_string(), Value::String("terragrunt".to_string())),
    ];
    for key in ["org_labels", "env_labels", "project_labels"] {
        if let Some(Value::Map(entries)) = lookup(merged, key) {
            for (k, v) in entries {
                set(&mut labels, k.clone(), v.clone());
            }
        }
    }
    Value::Map(labels)
}

fn lookup<'a>(list: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    list.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn set(list: &mut Vec<(String, Value)>, key: String, val: Value) {
    match list.iter_mut().find(|(k, _)| *k == key) {
        Some((_, existing)) => *existing = val,
        None => list.push((key, val)),
    }
}

static ASSIGNMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*=\s*(.*)$").unwrap());
static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());
static TRY_LOCAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^try\(\s*local\.(\w+)\.(\w+)\s*,\s*"([^"]*)"\s*\)$"#).unwrap());
static TERNARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)^local\.(\w+)\s*!=\s*""\s*\?\s*(.*?)\s*:\s*(.+)$"#).unwrap());
static LOCAL_BARE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^local\.(\w+)$").unwrap());
static INTERP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());
static KEY_EQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[\w-]+\s*=").unwrap());

/// Evaluates `project.hcl`'s locals against its siblings: `env.hcl` and
/// `account.hcl`, reachable only through the
/// `try(local.env_vars.X, "fallback")` / `try(local.account_vars.X, "…")`
/// shape — there is no general cross-file `local.` lookup.
struct ProjectEvaluator<'a> {
    project_dir: &'a Path,
    env_locals: Vec<(String, Value)>,
    account_locals: Vec<(String, Value)>,
}

impl<'a> ProjectEvaluator<'a> {
    fn new(project_dir: &'a Path, env_locals: Vec<(String, Value)>, account_locals: Vec<(String, Value)>) -> Self {
        Self { project_dir, env_locals, account_locals }
    }

    fn evaluate(&self, content: &str) -> Vec<(String, Value)> {
        let Some(block) = static_parser::extract_locals(content) else {
            return Vec::new();
        };
        let assignments: Vec<(String, String)> = parse_assignments(&block)
            .into_iter()
            .filter(|(_, expr)| !expr.contains("read_terragrunt_config"))
            .collect();
        self.resolve_all(assignments)
    }

    fn resolve_all(&self, assignments: Vec<(String, String)>) -> Vec<(String, Value)> {
        let mut resolved: Vec<(String, Value)> = Vec::new();
        let mut remaining = assignments;
        for _pass in 0..10 {
            if remaining.is_empty() {
                break;
            }
            let mut progress = false;
            let mut still = Vec::new();
            for (name, expr) in remaining {
                let val = self.resolve_expr(&expr, &resolved);
                if is_unresolved(&val) {
                    still.push((name, expr));
                } else {
                    set(&mut resolved, name, val);
                    progress = true;
                }
            }
            remaining = still;
            if !progress {
                break;
            }
        }
        for (name, expr) in remaining {
            let val = self.resolve_expr(&expr, &resolved);
            set(&mut resolved, name, val);
        }
        resolved.into_iter().filter(|(_, v)| !is_unresolved(v)).collect()
    }

    fn resolve_expr(&self, expr: &str, resolved: &[(String, Value)]) -> Value {
        let s = expr.trim();

        if let Some(inner) = s.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return if inner.contains("${") { self.interpolate(inner, resolved) } else { Value::String(inner.to_string()) };
        }
        if INT_RE.is_match(s) {
            if let Ok(i) = s.parse() {
                return Value::Int(i);
            }
        }
        if FLOAT_RE.is_match(s) {
            if let Ok(f) = s.parse() {
                return Value::Float(f);
            }
        }
        match s {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" => return Value::Null,
            _ => {}
        }
        if s == "basename(get_terragrunt_dir())" {
            let name = self.project_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            return Value::String(name);
        }
        if let Some(caps) = TRY_LOCAL_RE.captures(s) {
            let source = &caps[1];
            let key = &caps[2];
            let fallback = Value::String(caps[3].to_string());
            return match source {
                "env_vars" => lookup(&self.env_locals, key).cloned().unwrap_or(fallback),
                "account_vars" => lookup(&self.account_locals, key).cloned().unwrap_or(fallback),
                _ => fallback,
            };
        }
        if let Some(caps) = TERNARY_RE.captures(s) {
            let var = &caps[1];
            let (t_expr, f_expr) = (caps[2].trim(), caps[3].trim());
            return match lookup(resolved, var) {
                Some(v) => self.resolve_expr(if truthy(v) { t_expr } else { f_expr }, resolved),
                None => Value::String(format!("<unresolved: {s}>")),
            };
        }
        if let Some(caps) = LOCAL_BARE_RE.captures(s) {
            let key = &caps[1];
            return lookup(resolved, key).cloned().unwrap_or_else(|| Value::String(format!("<unresolved: {s}>")));
        }
        if let Some(stripped) = s.strip_prefix('{') {
            if let Some(inner) = stripped.trim_end().strip_suffix('}') {
                return Value::Map(self.parse_inline_map(inner, resolved));
            }
        }
        if s.starts_with('[') {
            return Value::List(self.parse_inline_list(s, resolved));
        }
        Value::String(s.to_string())
    }

    fn interpolate(&self, s: &str, resolved: &[(String, Value)]) -> Value {
        let mut out = String::new();
        let mut last = 0;
        let mut unresolved_flag = false;
        for caps in INTERP_RE.captures_iter(s) {
            let m = caps.get(0).unwrap();
            out.push_str(&s[last..m.start()]);
            let inner = caps.get(1).unwrap().as_str().trim();
            if let Some(key) = inner.strip_prefix("local.") {
                match lookup(resolved, key) {
                    Some(v) => out.push_str(&v.to_string()),
                    None => {
                        unresolved_flag = true;
                        out.push_str(m.as_str());
                    }
                }
            } else {
                out.push_str(m.as_str());
            }
            last = m.end();
        }
        out.push_str(&s[last..]);
        if unresolved_flag {
            Value::String(format!("<unresolved: {out}>"))
        } else {
            Value::String(out)
        }
    }

    fn parse_inline_map(&self, inner: &str, resolved: &[(String, Value)]) -> Vec<(String, Value)> {
        let mut result = Vec::new();
        for (key, expr) in parse_assignments(inner) {
            result.push((key, self.resolve_expr(&expr, resolved)));
        }
        result
    }

    fn parse_inline_list(&self, raw: &str, resolved: &[(String, Value)]) -> Vec<Value> {
        let inner = raw.trim().strip_prefix('[').unwrap_or(raw);
        let inner = inner.trim_end().strip_suffix(']').unwrap_or(inner);
        split_top_level(inner).into_iter().filter(|p| !p.is_empty()).map(|p| self.resolve_expr(&p, resolved)).collect()
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Map(m) => !m.is_empty(),
        Value::List(l) => !l.is_empty(),
        Value::Null => false,
    }
}

fn is_unresolved(v: &Value) -> bool {
    match v {
        Value::String(s) => s.contains("<unresolved:"),
        Value::Map(m) => m.iter().any(|(_, v)| is_unresolved(v)),
        Value::List(l) => l.iter().any(is_unresolved),
        _ => false,
    }
}

/// Multi-line, brace/bracket-depth-balanced assignment scan — the same
/// shape as `static_parser::parse_block`, minus the literal-only filtering
/// (here the RHS stays a raw expression string for [`ProjectEvaluator`] to
/// evaluate). Lines packing several inline-map entries onto one line
/// (`{ a = "1", b = "2" }`) are split into one pseudo-line per entry first.
fn parse_assignments(content: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let lines = expand_inline_assignments(content);
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            i += 1;
            continue;
        }
        let Some(caps) = ASSIGNMENT_RE.captures(line) else {
            i += 1;
            continue;
        };
        let key = caps[1].to_string();
        let mut val = caps[2].trim().to_string();
        let mut depth = bracket_delta(&val);
        while depth > 0 && i + 1 < lines.len() {
            i += 1;
            val.push('\n');
            val.push_str(&lines[i]);
            depth += bracket_delta(&lines[i]);
        }
        result.push((key, val.trim().to_string()));
        i += 1;
    }
    result
}

fn expand_inline_assignments(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in content.split('\n') {
        let stripped = raw_line.trim();
        if stripped.contains(", ") && stripped.contains('=') {
            let parts = split_top_level(stripped);
            if parts.len() > 1 && parts.iter().all(|p| KEY_EQ_RE.is_match(p.trim_start())) {
                lines.extend(parts);
                continue;
            }
        }
        lines.push(raw_line.to_string());
    }
    lines
}

fn bracket_delta(s: &str) -> i32 {
    let open = s.chars().filter(|c| *c == '{' || *c == '[').count() as i32;
    let close = s.chars().filter(|c| *c == '}' || *c == ']').count() as i32;
    open - close
}

fn split_top_level(s: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut in_str = false;
    for ch in s.chars() {
        if ch == '"' {
            in_str = !in_str;
        } else if !in_str {
            match ch {
                '{' | '[' | '(' => depth += 1,
                '}' | ']' | ')' => depth -= 1,
                ',' if depth == 0 => {
                    items.push(current.trim().to_string());
                    current.clear();
                    continue;
                }
                _ => {}
            }
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("root.hcl"), "").unwrap();
        fs::create_dir_all(root.join("_common")).unwrap();
        fs::write(root.join("_common/common.hcl"), "locals {\n  env = \"prod\"\n}\n").unwrap();
        (dir, root)
    }

    #[test]
    fn s1_flat_merge_common_wins_ties() {
        let (_dir, root) = write_repo();
        fs::write(root.join("account.hcl"), "locals {\n  org_id = \"111\"\n}\n").unwrap();
        let resource = root.join("live/env");
        fs::create_dir_all(&resource).unwrap();
        fs::write(resource.join("env.hcl"), "locals {\n  env = \"dev\"\n}\n").unwrap();

        let mut merger = HierarchyMerger::new(resource, root.clone());
        let (merged, _derived, _labels) = merger.merge().unwrap();
        assert_eq!(merged.map_get("env").unwrap(), &Value::String("prod".into()));
        assert_eq!(merged.map_get("org_id").unwrap(), &Value::String("111".into()));
        assert_eq!(merger.sources["env"], root.join("_common/common.hcl").to_string_lossy());
    }

    #[test]
    fn derived_region_defaults_when_absent() {
        let (_dir, root) = write_repo();
        fs::write(root.join("account.hcl"), "locals {}\n").unwrap();
        let resource = root.join("live/env");
        fs::create_dir_all(&resource).unwrap();

        let mut merger = HierarchyMerger::new(resource, root);
        let (_merged, derived, _labels) = merger.merge().unwrap();
        assert_eq!(derived.map_get("region").unwrap(), &Value::String(DEFAULT_REGION.to_string()));
    }

    #[test]
    fn project_evaluator_try_fallback_and_ternary() {
        let (_dir, root) = write_repo();
        fs::write(root.join("account.hcl"), "locals {}\n").unwrap();
        let resource = root.join("live/env/project");
        fs::create_dir_all(&resource).unwrap();
        fs::write(resource.parent().unwrap().join("env.hcl"), "locals {\n  env_vars = {\n    tier = \"standard\"\n  }\n}\n").unwrap();
        fs::write(
            resource.join("project.hcl"),
            "locals {\n  tier = try(local.env_vars.tier, \"basic\")\n  short_name = local.tier != \"\" ? \"yes\" : \"no\"\n}\n",
        )
        .unwrap();

        let mut merger = HierarchyMerger::new(resource, root);
        let (merged, _derived, _labels) = merger.merge().unwrap();
        assert_eq!(merged.map_get("tier").unwrap(), &Value::String("standard".into()));
        assert_eq!(merged.map_get("short_name").unwrap(), &Value::String("yes".into()));
    }

    #[test]
    fn standard_labels_seeded_and_extended() {
        let (_dir, root) = write_repo();
        fs::write(root.join("account.hcl"), "locals {\n  org_labels = {\n    team = \"platform\"\n  }\n}\n").unwrap();
        let resource = root.join("live/env");
        fs::create_dir_all(&resource).unwrap();

        let mut merger = HierarchyMerger::new(resource, root);
        let (_merged, _derived, labels) = merger.merge().unwrap();
        assert_eq!(labels.map_get("managed_by").unwrap(), &Value::String("terragrunt".into()));
        assert_eq!(labels.map_get("team").unwrap(), &Value::String("platform".into()));
    }
}
