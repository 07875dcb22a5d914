//! C9 — full renderer (SPEC_FULL §4.9). Orchestrates C1–C8 end to end:
//! hierarchy merge, resource/template parsing, dependency/include
//! resolution, locals/inputs resolution, and the final deep merge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::bridge;
use crate::dependency::DependencyResolver;
use crate::error::RenderResult;
use crate::eval::EvalContext;
use crate::hierarchy::{self, HierarchyMerger};
use crate::include::IncludeResolver;
use crate::merge::deep_merge;
use crate::value::Value;

static INTERP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

pub struct FullRenderResult {
    pub terraform_source: String,
    pub inputs: Value,
    pub unresolved: Vec<String>,
    pub sources: HashMap<String, String>,
}

/// Steps 1-9 of SPEC_FULL §4.9.
pub fn render(resource_path: &Path, repo_root: &Path) -> RenderResult<FullRenderResult> {
    let mut merger = HierarchyMerger::new(resource_path.to_path_buf(), repo_root.to_path_buf());
    let (merged, mut derived, _labels) = merger.merge()?;
    hierarchy::add_resource_name(&mut derived, resource_path);
    let base_locals = build_base_locals(&merged, &derived);

    let resource_hcl = resource_path.join("terragrunt.hcl");
    if !resource_hcl.is_file() {
        return Err(crate::error::RenderError::MissingResourceFile(resource_path.to_path_buf()));
    }
    tracing::debug!(path = %resource_hcl.display(), "parsing resource terragrunt.hcl");
    let resource_raw = bridge::parse(&resource_hcl)?;
    let resource_blocks = bridge::extract_blocks(&resource_raw);

    let include_resolver = IncludeResolver::new(&resource_blocks.include, resource_path.to_path_buf(), repo_root.to_path_buf());
    let template_path = include_resolver.find_template();
    if template_path.is_none() {
        tracing::debug!("no template include found for this resource");
    }

    let mut dep_resolver = DependencyResolver::from_blocks(&resource_blocks.dependency);

    let mut extra_includes: HashMap<String, Value> = HashMap::new();
    for (name, path) in include_resolver.find_exposed_includes() {
        match bridge::parse(&path) {
            Ok(parsed) => {
                let blocks = bridge::extract_blocks(&parsed);
                let mut inc_ctx = EvalContext::new(resource_path.to_path_buf(), repo_root.to_path_buf(), base_locals.clone(), dep_resolver.clone());
                let inc_locals = inc_ctx.resolve_locals(&as_values(&blocks.locals), None);
                extra_includes.insert(name, Value::Map(inc_locals));
            }
            Err(e) => {
                tracing::warn!(include = %name, path = %path.display(), error = %e, "skipping exposed include that failed to parse");
            }
        }
    }

    let mut ctx = EvalContext::new(resource_path.to_path_buf(), repo_root.to_path_buf(), base_locals.clone(), dep_resolver.clone());
    ctx.extra_includes = extra_includes.clone();

    let resource_locals = ctx.resolve_locals(&as_values(&resource_blocks.locals), None);

    let mut template_inputs = Value::empty_map();
    let mut terraform_source = String::new();

    if let Some(tpath) = &template_path {
        tracing::debug!(path = %tpath.display(), "parsing template terragrunt.hcl");
        let template_raw = bridge::parse(tpath)?;
        let template_blocks = bridge::extract_blocks(&template_raw);

        dep_resolver.augment(&DependencyResolver::from_blocks(&template_blocks.dependency));
        ctx.dep_resolver = dep_resolver.clone();

        let mut tmpl_ctx = EvalContext::new(resource_path.to_path_buf(), repo_root.to_path_buf(), base_locals.clone(), dep_resolver.clone());
        tmpl_ctx.extra_includes = extra_includes;

        let seed = vec![
            ("common_vars".to_string(), Value::Map(vec![("locals".to_string(), merged.clone())])),
            ("module_versions".to_string(), derived.map_get("module_versions").cloned().unwrap_or_else(Value::empty_map)),
        ];
        let template_locals = tmpl_ctx.resolve_locals(&as_values(&template_blocks.locals), Some(seed));

        template_inputs = Value::Map(tmpl_ctx.resolve_inputs(&as_values(&template_blocks.inputs)));
        terraform_source = extract_source(&template_blocks.terraform, &Value::Map(template_locals), &derived);

        for token in &tmpl_ctx.unresolved {
            ctx.track_unresolved(&format!("<{token}>"));
        }
    }

    if terraform_source.is_empty() {
        terraform_source = extract_source(&resource_blocks.terraform, &Value::Map(resource_locals.clone()), &derived);
    }

    let resource_inputs = Value::Map(ctx.resolve_inputs(&as_values(&resource_blocks.inputs)));
    let final_inputs = deep_merge(&template_inputs, &resource_inputs);

    let sources = build_sources(&final_inputs, &resource_inputs, &template_inputs, &resource_hcl, template_path.as_deref(), repo_root);

    let mut unresolved = ctx.unresolved.clone();
    unresolved.sort();
    unresolved.dedup();

    Ok(FullRenderResult { terraform_source, inputs: final_inputs, unresolved, sources })
}

fn as_values(blocks: &[serde_json::Value]) -> Vec<Value> {
    blocks.iter().map(Value::from_json).collect()
}

fn build_base_locals(merged: &Value, derived: &Value) -> Value {
    let mut entries: Vec<(String, Value)> = vec![("merged".to_string(), merged.clone())];
    if let Value::Map(derived_entries) = derived {
        entries.extend(derived_entries.clone());
    }
    Value::Map(entries)
}

/// Extracts `terraform.source`, resolving `${local.X}` against `locals_ctx`
/// and `${include.base.locals.module_versions.X}` against `derived` in two
/// sequential passes, matching the original renderer's `_extract_source`.
fn extract_source(tf_blocks: &[serde_json::Value], locals_ctx: &Value, derived: &Value) -> String {
    for block in tf_blocks {
        let Some(source) = block.get("source").and_then(|v| v.as_str()) else { continue };
        if source.is_empty() {
            continue;
        }
        let mut result = source.to_string();
        result = substitute(&result, |dotted| {
            dotted.strip_prefix("local.").and_then(|rest| dot_lookup_str(locals_ctx, rest))
        });
        result = substitute(&result, |dotted| {
            let rest = dotted.strip_prefix("include.base.locals.")?;
            let module_versions = derived.map_get("module_versions").cloned().unwrap_or_else(Value::empty_map);
            if let Some(key) = rest.strip_prefix("module_versions.") {
                dot_lookup_str(&module_versions, key)
            } else if rest == "module_versions" {
                Some(module_versions.to_string())
            } else {
                None
            }
        });
        return result;
    }
    String::new()
}

fn substitute(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::new();
    let mut last = 0;
    for caps in INTERP_RE.captures_iter(s) {
        let m = caps.get(0).unwrap();
        out.push_str(&s[last..m.start()]);
        let inner = caps.get(1).unwrap().as_str().trim();
        match lookup(inner) {
            Some(v) => out.push_str(&v),
            None => out.push_str(m.as_str()),
        }
        last = m.end();
    }
    out.push_str(&s[last..]);
    out
}

fn dot_lookup_str(ctx: &Value, dotted: &str) -> Option<String> {
    let mut current = ctx;
    for part in dotted.split('.') {
        current = current.map_get(part)?;
    }
    Some(current.to_string())
}

fn build_sources(
    final_inputs: &Value,
    resource_inputs: &Value,
    template_inputs: &Value,
    resource_hcl: &Path,
    template_path: Option<&Path>,
    repo_root: &Path,
) -> HashMap<String, String> {
    let mut sources = HashMap::new();
    let Value::Map(final_map) = final_inputs else { return sources };

    let resource_rel = relative_to(resource_hcl, repo_root);
    let template_rel = template_path.map(|p| relative_to(p, repo_root));

    for (key, _) in final_map {
        if resource_inputs.map_get(key).is_some() {
            sources.insert(key.clone(), resource_rel.clone());
        } else if template_inputs.map_get(key).is_some() {
            if let Some(rel) = &template_rel {
                sources.insert(key.clone(), rel.clone());
            }
        }
    }
    sources
}

fn relative_to(path: &Path, repo_root: &Path) -> String {
    path.strip_prefix(repo_root).unwrap_or(path).to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn build_base_locals_flattens_derived() {
        let merged = Value::Map(vec![("env".to_string(), Value::String("prod".into()))]);
        let derived = Value::Map(vec![("region".to_string(), Value::String("europe-west2".into()))]);
        let base = build_base_locals(&merged, &derived);
        assert_eq!(base.map_get("region").unwrap(), &Value::String("europe-west2".into()));
        assert_eq!(
            base.map_get("merged").unwrap().map_get("env").unwrap(),
            &Value::String("prod".into())
        );
    }

    #[test]
    fn extract_source_resolves_local_and_include_base() {
        let locals_ctx = Value::Map(vec![("module_name".to_string(), Value::String("gke".into()))]);
        let derived = Value::Map(vec![(
            "module_versions".to_string(),
            Value::Map(vec![("gke".to_string(), Value::String("v3.1.0".into()))]),
        )]);
        let tf = vec![serde_json::json!({"source": "git::repo.git//modules/${local.module_name}?ref=${include.base.locals.module_versions.gke}"})];
        let result = extract_source(&tf, &locals_ctx, &derived);
        assert_eq!(result, "git::repo.git//modules/gke?ref=v3.1.0");
    }

    #[test]
    fn missing_resource_file_errors() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("root.hcl"), "").unwrap();
        fs::create_dir_all(root.join("_common")).unwrap();
        fs::write(root.join("_common/common.hcl"), "locals {}\n").unwrap();
        fs::write(root.join("account.hcl"), "locals {}\n").unwrap();
        let resource = root.join("live/env");
        fs::create_dir_all(&resource).unwrap();

        let err = render(&resource, &root).unwrap_err();
        assert!(matches!(err, crate::error::RenderError::MissingResourceFile(_)));
    }
}
