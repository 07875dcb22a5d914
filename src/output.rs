//! C10 — output formatter (SPEC_FULL §6, "Output shapes").
//!
//! JSON/YAML are produced by serialising [`Value`] directly (its
//! hand-written `Serialize` preserves insertion order — see `value.rs`),
//! then recolouring the resulting text. Table format works at the `Value`
//! level directly: flatten to dotted keys, size columns, colourise cells.
//!
//! Colouring is left to the `colored` crate's own TTY detection; callers
//! that want it off regardless (`--no-colour`) call
//! `colored::control::set_override(false)` once at startup.

use std::collections::HashMap;

use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::value::Value;

static UNRESOLVED_HINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>|templatefile\(").unwrap());
static JSON_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?P<key>"[^"]*?")(?P<kcolon>\s*:)|(?P<str>"[^"]*?")|(?P<null>\bnull\b)|(?P<boolean>\btrue\b|\bfalse\b)"#).unwrap());
static YAML_KV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*)([\w.\-]+)(:)(.*)$").unwrap());
static YAML_LIST_ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*- )(.*)$").unwrap());

pub fn as_json(data: &Value) -> String {
    let text = serde_json::to_string_pretty(data).unwrap_or_default();
    colorize_json(&text)
}

pub fn as_yaml(data: &Value) -> String {
    let text = serde_yaml::to_string(data).unwrap_or_default();
    colorize_yaml(&text)
}

fn colorize_json(text: &str) -> String {
    JSON_TOKEN_RE
        .replace_all(text, |caps: &regex::Captures| {
            if let Some(key) = caps.name("key") {
                let colon = caps.name("kcolon").map(|m| m.as_str()).unwrap_or(":");
                let styled = if key.as_str() == "\"unresolved\"" { key.as_str().bold().red() } else { key.as_str().bold().blue() };
                return format!("{styled}{colon}");
            }
            if let Some(m) = caps.name("str") {
                let s = m.as_str();
                return if UNRESOLVED_HINT.is_match(s) { s.red().to_string() } else { s.green().to_string() };
            }
            if let Some(m) = caps.name("null") {
                return m.as_str().dimmed().to_string();
            }
            if let Some(m) = caps.name("boolean") {
                return m.as_str().cyan().to_string();
            }
            caps.get(0).unwrap().as_str().to_string()
        })
        .to_string()
}

fn colorize_yaml(text: &str) -> String {
    let mut out = Vec::with_capacity(text.lines().count());
    for line in text.lines() {
        if let Some(caps) = YAML_KV_RE.captures(line) {
            let indent = &caps[1];
            let key = &caps[2];
            let rest = caps[4].trim();
            let key_styled = if key == "unresolved" { key.bold().red().to_string() } else { key.bold().blue().to_string() };
            let prefix = format!("{indent}{key_styled}:");
            out.push(match rest {
                "" | "''" => prefix,
                "null" | "~" => format!("{prefix} {}", rest.dimmed()),
                "true" | "false" => format!("{prefix} {}", rest.cyan()),
                _ if UNRESOLVED_HINT.is_match(rest) => format!("{prefix} {}", rest.red()),
                _ => format!("{prefix} {}", rest.green()),
            });
        } else if let Some(caps) = YAML_LIST_ITEM_RE.captures(line) {
            let item_prefix = &caps[1];
            let val = &caps[2];
            let styled = if UNRESOLVED_HINT.is_match(val) { val.red() } else { val.green() };
            out.push(format!("{item_prefix}{styled}"));
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}

/// Two- or three-column table: key, value, optional source. `unresolved`
/// and `terraform_source` are pulled out into a header block above the
/// table rather than rendered as ordinary rows.
pub fn as_table(data: &Value, sources: Option<&HashMap<String, String>>) -> String {
    let mut flat = flatten(data, "");
    if flat.is_empty() {
        return "(empty)".to_string();
    }

    let mut header_lines = Vec::new();
    for key in ["terraform_source", "unresolved"] {
        if let Some(pos) = flat.iter().position(|(k, _)| k == key) {
            let (_, val) = flat.remove(pos);
            let styled = if key == "unresolved" { val.red() } else { val.green() };
            header_lines.push(format!("{}: {styled}", key.dimmed()));
        }
    }

    if flat.is_empty() {
        return if header_lines.is_empty() { "(empty)".to_string() } else { header_lines.join("\n") };
    }

    let flat: Vec<(String, String)> = flat
        .into_iter()
        .map(|(k, v)| (k.strip_prefix("inputs.").unwrap_or(&k).to_string(), v))
        .collect();

    let max_key = flat.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    let max_val = flat.iter().map(|(_, v)| first_line(v).chars().count()).max().unwrap_or(0);

    let mut lines = Vec::new();
    if !header_lines.is_empty() {
        lines.extend(header_lines);
        lines.push(String::new());
    }

    let mut header = format!("{:<max_key$}  {:<max_val$}", "Key", "Value");
    if sources.is_some() {
        header.push_str("  Source");
    }
    lines.push(header.bold().to_string());
    let rule_len = max_key + 2 + max_val + if sources.is_some() { 8 } else { 0 };
    lines.push("-".repeat(rule_len));

    let indent = " ".repeat(max_key + 2);
    for (key, val) in &flat {
        let val_display = if val.is_empty() { "\"\"".to_string() } else { val.clone() };
        let key_display = format!("{:<max_key$}", key).bold().blue().to_string();
        let source = sources.map(|s| resolve_source(s, key)).unwrap_or_default();

        let mut val_lines = val_display.split('\n');
        let first = val_lines.next().unwrap_or("");
        let pad = max_val.saturating_sub(first.chars().count());
        let source_suffix = if source.is_empty() { String::new() } else { format!("{}  {}", " ".repeat(pad), source.yellow()) };
        let mut row = format!("{key_display}  {}{source_suffix}", colorize_table_value(first));
        for extra in val_lines {
            row.push_str(&format!("\n{indent}{}", colorize_table_value(extra)));
        }
        lines.push(row);
    }
    lines.join("\n")
}

fn first_line(s: &str) -> &str {
    s.split('\n').next().unwrap_or(s)
}

fn resolve_source(sources: &HashMap<String, String>, key: &str) -> String {
    let parts: Vec<&str> = key.split('.').collect();
    let raw = sources
        .get(key)
        .or_else(|| parts.first().and_then(|p| sources.get(*p)))
        .or_else(|| parts.get(1).and_then(|p| sources.get(*p)));
    match raw {
        Some(path) => std::path::Path::new(path).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| path.clone()),
        None => String::new(),
    }
}

fn colorize_table_value(v: &str) -> String {
    match v {
        "\"\"" | "[]" | "None" | "null" => v.dimmed().to_string(),
        "true" | "True" | "false" | "False" => v.cyan().to_string(),
        _ => v.green().to_string(),
    }
}

/// Recursively flattens `data` to dotted keys, rendering lists (via
/// [`format_list`]) and scalars to display strings as it goes. Non-empty
/// maps recurse; empty maps fall through to their compact JSON form (`{}`).
fn flatten(data: &Value, prefix: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let Value::Map(entries) = data else { return result };
    for (key, val) in entries {
        let full_key = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match val {
            Value::Map(inner) if !inner.is_empty() => result.extend(flatten(val, &full_key)),
            Value::List(items) => result.push((full_key, format_list(items))),
            Value::String(s) => result.push((full_key, s.clone())),
            other => result.push((full_key, other.to_string())),
        }
    }
    result
}

/// A single-element list renders as one-line JSON; longer lists render as
/// an indented multi-line block, one item per line.
fn format_list(items: &[Value]) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    if items.len() == 1 {
        let whole: Vec<serde_json::Value> = items.iter().map(Value::to_json).collect();
        return serde_json::to_string(&whole).unwrap_or_default();
    }
    let lines: Vec<String> = items.iter().map(|item| serde_json::to_string(&item.to_json()).unwrap_or_default()).collect();
    format!("[\n  {},\n]", lines.join(",\n  "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_preserves_insertion_order() {
        let v = Value::Map(vec![("zebra".to_string(), Value::Int(1)), ("alpha".to_string(), Value::Int(2))]);
        let text = serde_json::to_string_pretty(&v).unwrap();
        assert!(text.find("zebra").unwrap() < text.find("alpha").unwrap());
    }

    #[test]
    fn flatten_strips_through_nested_maps() {
        let v = Value::Map(vec![(
            "inputs".to_string(),
            Value::Map(vec![("labels".to_string(), Value::Map(vec![("env".to_string(), Value::String("prod".into()))]))]),
        )]);
        let flat = flatten(&v, "");
        assert_eq!(flat, vec![("inputs.labels.env".to_string(), "prod".to_string())]);
    }

    #[test]
    fn format_list_single_item_is_one_line() {
        let items = vec![Value::String("a".into())];
        assert_eq!(format_list(&items), r#"["a"]"#);
    }

    #[test]
    fn format_list_multi_item_is_multiline() {
        let items = vec![Value::String("a".into()), Value::String("b".into())];
        let out = format_list(&items);
        assert!(out.starts_with("[\n"));
        assert!(out.contains("\"a\""));
        assert!(out.contains("\"b\""));
    }

    #[test]
    fn as_table_strips_inputs_prefix_and_pulls_header() {
        let data = Value::Map(vec![
            ("terraform_source".to_string(), Value::String("git::repo.git".into())),
            ("inputs".to_string(), Value::Map(vec![("name".to_string(), Value::String("x".into()))])),
        ]);
        let table = as_table(&data, None);
        assert!(table.contains("terraform_source: git::repo.git"));
        assert!(table.contains("name"));
        assert!(!table.contains("inputs.name"));
    }

    #[test]
    fn as_table_empty_input_says_empty() {
        assert_eq!(as_table(&Value::empty_map(), None), "(empty)");
    }
}
