//! C5 — dependency resolver (SPEC_FULL §4.5).
//!
//! Dependency outputs can only be known after Terraform actually plans, so
//! references to them are rendered as stable opaque tokens instead of
//! being resolved.

use std::collections::HashMap;

use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    pub paths: HashMap<String, String>,
    pub mocks: HashMap<String, Value>,
}

impl DependencyResolver {
    pub fn from_blocks(dep_blocks: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut resolver = Self::default();
        resolver.merge_blocks(dep_blocks);
        resolver
    }

    /// Parse (and add to, without overriding existing entries for the same
    /// name) a `dependency` section.
    pub fn merge_blocks(&mut self, dep_blocks: &serde_json::Map<String, serde_json::Value>) {
        for (name, raw) in dep_blocks {
            for block in as_block_list(raw) {
                if let Some(cp) = block.get("config_path").and_then(|v| v.as_str()) {
                    self.paths.entry(name.clone()).or_insert_with(|| cp.to_string());
                }
                if let Some(mock) = block.get("mock_outputs") {
                    let mock_val = match mock {
                        serde_json::Value::Array(a) => a.first().cloned(),
                        other => Some(other.clone()),
                    };
                    if let Some(m) = mock_val {
                        self.mocks.entry(name.clone()).or_insert_with(|| Value::from_json(&m));
                    }
                }
            }
        }
    }

    /// Augment `self` with any dependency declared in `other` (e.g. the
    /// template) that `self` doesn't already know about. Never overrides.
    pub fn augment(&mut self, other: &DependencyResolver) {
        for (name, path) in &other.paths {
            self.paths.entry(name.clone()).or_insert_with(|| path.clone());
        }
        for (name, mock) in &other.mocks {
            self.mocks.entry(name.clone()).or_insert_with(|| mock.clone());
        }
    }

    /// Render `dependency.<name>.outputs.<key>` as its opaque token.
    pub fn resolve_ref(&self, dep_name: &str, output_key: &str) -> String {
        let path = self.paths.get(dep_name).map(|s| s.as_str()).unwrap_or(dep_name);
        format!("#dependency|{path}, {output_key}|")
    }

    /// Same, but with a resolved suffix already appended to the output key
    /// (e.g. `.subkey` or `[0]` where any `local.X` inside has already
    /// been substituted by the caller).
    pub fn resolve_ref_with_suffix(&self, dep_name: &str, output_key: &str, suffix: &str) -> String {
        let path = self.paths.get(dep_name).map(|s| s.as_str()).unwrap_or(dep_name);
        format!("#dependency|{path}, {output_key}{suffix}|")
    }
}

fn as_block_list(v: &serde_json::Value) -> Vec<&serde_json::Map<String, serde_json::Value>> {
    match v {
        serde_json::Value::Array(a) => a.iter().filter_map(|b| b.as_object()).collect(),
        other => other.as_object().into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_dependency_opaque_token() {
        let blocks: serde_json::Map<String, serde_json::Value> = serde_json::from_value(serde_json::json!({
            "net": [{"config_path": "../../network"}],
        }))
        .unwrap();
        let resolver = DependencyResolver::from_blocks(&blocks);
        assert_eq!(
            resolver.resolve_ref("net", "vpc_id"),
            "#dependency|../../network, vpc_id|"
        );
    }

    #[test]
    fn augment_never_overrides() {
        let resource_blocks: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"net": [{"config_path": "resource-path"}]})).unwrap();
        let template_blocks: serde_json::Map<String, serde_json::Value> = serde_json::from_value(
            serde_json::json!({"net": [{"config_path": "template-path"}], "extra": [{"config_path": "x"}]}),
        )
        .unwrap();

        let mut resource = DependencyResolver::from_blocks(&resource_blocks);
        let template = DependencyResolver::from_blocks(&template_blocks);
        resource.augment(&template);

        assert_eq!(resource.paths["net"], "resource-path");
        assert_eq!(resource.paths["extra"], "x");
    }
}
