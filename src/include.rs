//! C4 — include resolver (SPEC_FULL §4.4).
//!
//! Identifies which `include` block is the template (`merge_strategy =
//! "deep"`) and which are "exposed" (locals reachable under their name via
//! `include.<name>.locals.*`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::locator::find_in_parent_folders;

static OUTER_INTERP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^\$\{(.+)\}$").unwrap());
static GET_REPO_ROOT_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{get_repo_root\(\)\}").unwrap());
static GET_REPO_ROOT_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"get_repo_root\(\)").unwrap());
static FIND_IN_PARENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"find_in_parent_folders\("([^"]+)"\)"#).unwrap());

pub struct IncludeResolver<'a> {
    include_blocks: &'a serde_json::Map<String, serde_json::Value>,
    resource_path: PathBuf,
    repo_root: PathBuf,
}

impl<'a> IncludeResolver<'a> {
    pub fn new(
        include_blocks: &'a serde_json::Map<String, serde_json::Value>,
        resource_path: PathBuf,
        repo_root: PathBuf,
    ) -> Self {
        Self { include_blocks, resource_path, repo_root }
    }

    /// The include with `merge_strategy = "deep"`, if any.
    pub fn find_template(&self) -> Option<PathBuf> {
        for blocks in self.include_blocks.values() {
            for block in as_block_list(blocks) {
                if block.get("merge_strategy").and_then(|v| v.as_str()) == Some("deep") {
                    let raw_path = block.get("path").and_then(|v| v.as_str()).unwrap_or("");
                    return self.resolve_path(raw_path);
                }
            }
        }
        None
    }

    /// name -> resolved path for every include with `expose = true` that is
    /// not the template and not named `root`/`base`.
    pub fn find_exposed_includes(&self) -> HashMap<String, PathBuf> {
        let mut result = HashMap::new();
        for (name, blocks) in self.include_blocks.iter() {
            if name == "root" || name == "base" {
                continue;
            }
            for block in as_block_list(blocks) {
                if block.get("merge_strategy").and_then(|v| v.as_str()) == Some("deep") {
                    continue;
                }
                if block.get("expose").and_then(|v| v.as_bool()) == Some(true) {
                    let raw_path = block.get("path").and_then(|v| v.as_str()).unwrap_or("");
                    if let Some(resolved) = self.resolve_path(raw_path) {
                        result.insert(name.clone(), resolved);
                    }
                }
            }
        }
        result
    }

    fn resolve_path(&self, raw: &str) -> Option<PathBuf> {
        let mut resolved = raw.to_string();
        if let Some(caps) = OUTER_INTERP.captures(&resolved) {
            resolved = caps[1].to_string();
        }
        resolved = GET_REPO_ROOT_CALL
            .replace_all(&resolved, self.repo_root.to_string_lossy().as_ref())
            .to_string();
        resolved = GET_REPO_ROOT_BARE
            .replace_all(&resolved, self.repo_root.to_string_lossy().as_ref())
            .to_string();
        resolved = FIND_IN_PARENTS
            .replace_all(&resolved, |caps: &regex::Captures| {
                find_in_parent_folders(&self.resource_path, &self.repo_root, &caps[1])
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| caps[1].to_string())
            })
            .to_string();

        let mut p = PathBuf::from(resolved);
        if !p.is_absolute() {
            p = self.resource_path.join(p);
        }
        let p = normalize(&p);
        if p.is_file() {
            Some(p)
        } else {
            None
        }
    }
}

fn as_block_list(v: &serde_json::Value) -> Vec<&serde_json::Map<String, serde_json::Value>> {
    match v {
        serde_json::Value::Array(a) => a.iter().filter_map(|b| b.as_object()).collect(),
        other => other.as_object().into_iter().collect(),
    }
}

use crate::locator::normalize_path as normalize;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_deep_template() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let tmpl_dir = root.join("_common/templates");
        fs::create_dir_all(&tmpl_dir).unwrap();
        fs::write(tmpl_dir.join("compute.hcl"), "").unwrap();
        let resource = root.join("live/resource");
        fs::create_dir_all(&resource).unwrap();

        let includes: serde_json::Map<String, serde_json::Value> = serde_json::from_value(serde_json::json!({
            "template": [{
                "path": format!("${{get_repo_root()}}/_common/templates/compute.hcl"),
                "merge_strategy": "deep",
            }],
        }))
        .unwrap();

        let resolver = IncludeResolver::new(&includes, resource, root.clone());
        let found = resolver.find_template().unwrap();
        assert_eq!(found, root.join("_common/templates/compute.hcl"));
    }

    #[test]
    fn skips_root_and_base_for_exposed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let resource = root.join("live/resource");
        fs::create_dir_all(&resource).unwrap();
        fs::write(resource.join("extra.hcl"), "").unwrap();

        let includes: serde_json::Map<String, serde_json::Value> = serde_json::from_value(serde_json::json!({
            "base": [{"path": "base.hcl", "expose": true}],
            "extra": [{"path": "extra.hcl", "expose": true}],
        }))
        .unwrap();

        let resolver = IncludeResolver::new(&includes, resource, root);
        let exposed = resolver.find_exposed_includes();
        assert!(!exposed.contains_key("base"));
        assert!(exposed.contains_key("extra"));
    }
}
