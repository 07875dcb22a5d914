//! C3 — external HCL bridge (SPEC_FULL §4.3).
//!
//! Shells out to `hcl2json -simplify <path>` for full-grammar parsing.
//! Used for full-mode resource/template/include parsing and for
//! `read_terragrunt_config`. Not used for the four static hierarchy files,
//! which the native parser (C2) handles directly.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::RenderError;

const TIMEOUT: Duration = Duration::from_secs(30);

/// The block types extracted from a parsed `terragrunt.hcl`-shaped file,
/// each normalised into a list of JSON objects (the bridge inconsistently
/// yields singletons for some of these, e.g. `inputs` as a bare object).
#[derive(Debug, Clone, Default)]
pub struct ParsedBlocks {
    pub terraform: Vec<serde_json::Value>,
    pub locals: Vec<serde_json::Value>,
    pub inputs: Vec<serde_json::Value>,
    pub include: serde_json::Map<String, serde_json::Value>,
    pub dependency: serde_json::Map<String, serde_json::Value>,
}

pub fn is_available() -> bool {
    which("hcl2json").is_some()
}

fn which(bin: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}

/// Run `hcl2json -simplify <file_path>` and parse its stdout as JSON.
pub fn parse(file_path: &Path) -> Result<serde_json::Value, RenderError> {
    if !is_available() {
        return Err(RenderError::ToolUnavailable);
    }

    let mut child = Command::new("hcl2json")
        .arg("-simplify")
        .arg(file_path)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|_| RenderError::ToolUnavailable)?;

    let start = std::time::Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if start.elapsed() > TIMEOUT {
                    let _ = child.kill();
                    return Err(RenderError::ToolFailed {
                        path: file_path.to_path_buf(),
                        stderr: "timed out after 30s".to_string(),
                    });
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                return Err(RenderError::ToolFailed {
                    path: file_path.to_path_buf(),
                    stderr: e.to_string(),
                })
            }
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|e| RenderError::ToolFailed { path: file_path.to_path_buf(), stderr: e.to_string() })?;

    if !output.status.success() {
        return Err(RenderError::ToolFailed {
            path: file_path.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|e| RenderError::ParseError {
        path: file_path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Normalise a parsed `hcl2json` tree into the five block types this
/// renderer cares about, coercing `terraform`/`locals`/`inputs` into lists
/// uniformly (the bridge returns `inputs` as a bare object, and
/// `locals`/`terraform` as arrays — or sometimes singletons).
pub fn extract_blocks(parsed: &serde_json::Value) -> ParsedBlocks {
    let obj = parsed.as_object();

    let raw_inputs = obj.and_then(|o| o.get("inputs")).cloned().unwrap_or(serde_json::Value::Object(Default::default()));
    let inputs = match raw_inputs {
        serde_json::Value::Array(a) => a,
        other => vec![other],
    };

    let raw_locals = obj
        .and_then(|o| o.get("locals"))
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Array(vec![serde_json::Value::Object(Default::default())]));
    let locals = match raw_locals {
        serde_json::Value::Array(a) => a,
        serde_json::Value::Object(o) => vec![serde_json::Value::Object(o)],
        other => vec![other],
    };

    let raw_terraform = obj
        .and_then(|o| o.get("terraform"))
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Array(vec![serde_json::Value::Object(Default::default())]));
    let terraform = match raw_terraform {
        serde_json::Value::Array(a) => a,
        serde_json::Value::Object(o) => vec![serde_json::Value::Object(o)],
        other => vec![other],
    };

    let include = obj
        .and_then(|o| o.get("include"))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let dependency = obj
        .and_then(|o| o.get("dependency"))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    ParsedBlocks { terraform, locals, inputs, include, dependency }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_singleton_inputs_to_list() {
        let parsed = serde_json::json!({
            "inputs": {"a": 1},
            "locals": {"x": 2},
        });
        let blocks = extract_blocks(&parsed);
        assert_eq!(blocks.inputs.len(), 1);
        assert_eq!(blocks.locals.len(), 1);
    }

    #[test]
    fn keeps_list_inputs_as_is() {
        let parsed = serde_json::json!({
            "locals": [{"x": 1}, {"y": 2}],
        });
        let blocks = extract_blocks(&parsed);
        assert_eq!(blocks.locals.len(), 2);
    }

    #[test]
    fn missing_blocks_default_empty() {
        let parsed = serde_json::json!({});
        let blocks = extract_blocks(&parsed);
        assert_eq!(blocks.terraform.len(), 1);
        assert!(blocks.include.is_empty());
        assert!(blocks.dependency.is_empty());
    }
}
