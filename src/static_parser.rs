//! C2 — static HCL parser (SPEC_FULL §4.2).
//!
//! Extracts a file's top-level `locals { ... }` block and parses each
//! `name = value` assignment into a `Value`, filtering out anything that
//! looks like a dynamic expression (contains `${...}` or is a function
//! call). This is deliberately not a general HCL parser: it only needs to
//! handle the literal subset that `account.hcl`/`env.hcl`/`region.hcl`/
//! `common.hcl` actually contain.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::value::Value;

/// Keys in `common.hcl` that are always dynamic (only resolvable at
/// render time via `get_repo_root()`-style accessors) and so are filtered
/// even though they may appear as quoted strings without `${...}`.
const COMMON_SKIP: [&str; 3] = ["repo_root", "common_root", "templates_root"];

static FN_CALL_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_]+\(").unwrap());
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*=\s*(.*)$").unwrap());
static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());
static KEY_EQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[\w-]+\s*=").unwrap());

/// Parse the `locals` block of `content`, returning only statically
/// knowable assignments in source order.
pub fn parse(content: &str, is_common: bool) -> Vec<(String, Value)> {
    let Some(block) = extract_locals(content) else {
        return Vec::new();
    };
    let mut result = parse_block(&block);
    if is_common {
        result.retain(|(k, _)| !COMMON_SKIP.contains(&k.as_str()));
    }
    result
}

fn looks_like_expression(s: &str) -> bool {
    s.contains("${") || FN_CALL_HEAD.is_match(s)
}

/// Find the single top-level `locals { ... }` block, brace-balanced,
/// string-aware (a `"` toggles string mode so braces inside strings don't
/// affect depth) and comment-aware (`#` starts a line comment).
pub fn extract_locals(content: &str) -> Option<String> {
    let bytes = content.as_bytes();
    let start_marker = Regex::new(r"locals\s*\{").unwrap();
    let m = start_marker.find(content)?;
    let mut i = m.end();
    let start = i;
    let mut depth: i32 = 1;
    let chars: Vec<char> = content.chars().collect();
    // Work over char indices instead of bytes to stay UTF-8 safe; content
    // is expected to be ASCII-dominant HCL so this is cheap enough.
    let char_start = content[..start].chars().count();
    let mut ci = char_start;
    while ci < chars.len() && depth > 0 {
        let ch = chars[ci];
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            '"' => {
                ci += 1;
                while ci < chars.len() && chars[ci] != '"' {
                    if chars[ci] == '\\' {
                        ci += 1;
                    }
                    ci += 1;
                }
            }
            '#' => {
                while ci < chars.len() && chars[ci] != '\n' {
                    ci += 1;
                }
            }
            _ => {}
        }
        ci += 1;
    }
    let _ = bytes;
    let end_char = ci.saturating_sub(1);
    let slice: String = chars[char_start..end_char.min(chars.len())].iter().collect();
    Some(slice)
}

/// Parse a sequence of `name = value` lines (accumulating multi-line
/// values by tracking brace/bracket depth) into an ordered list. Lines
/// that pack several inline-map entries onto one line (HCL permits
/// `{ a = "1", b = "2" }` as well as one-entry-per-line) are split into one
/// pseudo-line per entry first, so the rest of the scan sees a uniform
/// one-assignment-per-line shape.
fn parse_block(content: &str) -> Vec<(String, Value)> {
    let lines = expand_inline_assignments(content);
    let mut result = Vec::new();
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            i += 1;
            continue;
        }
        let Some(caps) = ASSIGNMENT.captures(line) else {
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
        if let Some(parsed) = parse_value(val.trim()) {
            result.push((key, parsed));
        }
        i += 1;
    }
    result
}

/// Splits `content` into lines, expanding any line holding multiple
/// top-level `key = value, key = value` assignments (as HCL allows inside
/// `{ ... }`) into one assignment per pseudo-line.
fn expand_inline_assignments(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in content.split('\n') {
        let stripped = raw_line.trim();
        if stripped.contains(", ") && stripped.contains('=') {
            let parts = split_top_level_commas(stripped);
            if parts.len() > 1 && parts.iter().all(|p| KEY_EQ_RE.is_match(p.trim_start())) {
                lines.extend(parts);
                continue;
            }
        }
        lines.push(raw_line.to_string());
    }
    lines
}

/// Split `s` on top-level commas, respecting quoted strings and `{}`/`[]`
/// nesting (no function-call parens expected in this literal-only parser).
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_str = false;
    let mut current = String::new();
    for ch in s.chars() {
        match ch {
            '"' => {
                in_str = !in_str;
                current.push(ch);
            }
            '{' | '[' if !in_str => {
                depth += 1;
                current.push(ch);
            }
            '}' | ']' if !in_str => {
                depth -= 1;
                current.push(ch);
            }
            ',' if !in_str && depth == 0 => {
                parts.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
}

fn bracket_delta(s: &str) -> i32 {
    let open = s.chars().filter(|c| *c == '{' || *c == '[').count() as i32;
    let close = s.chars().filter(|c| *c == '}' || *c == ']').count() as i32;
    open - close
}

fn parse_value(raw: &str) -> Option<Value> {
    let s = raw.trim();
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        let inner = &s[1..s.len() - 1];
        if looks_like_expression(inner) {
            return None;
        }
        return Some(Value::String(inner.to_string()));
    }
    if INT_RE.is_match(s) {
        return s.parse::<i64>().ok().map(Value::Int);
    }
    if FLOAT_RE.is_match(s) {
        return s.parse::<f64>().ok().map(Value::Float);
    }
    match s {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if let Some(stripped) = s.strip_prefix('{') {
        let inner = stripped.trim_end();
        let inner = inner.strip_suffix('}').unwrap_or(inner);
        return Some(Value::Map(parse_block(inner)));
    }
    if s.starts_with('[') {
        return Some(Value::List(parse_list(s)));
    }
    // function calls / local refs → dynamic, skip
    if FN_CALL_HEAD.is_match(s) || s.starts_with("local.") {
        return None;
    }
    Some(Value::String(s.to_string()))
}

fn parse_list(raw: &str) -> Vec<Value> {
    let mut inner = raw.trim();
    if let Some(stripped) = inner.strip_prefix('[') {
        inner = stripped;
    }
    let trimmed_end = inner.trim_end();
    let inner = trimmed_end.strip_suffix(']').unwrap_or(trimmed_end);

    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut in_str = false;
    for ch in inner.chars() {
        if ch == '"' {
            in_str = !in_str;
        } else if !in_str {
            match ch {
                '{' | '[' => depth += 1,
                '}' | ']' => depth -= 1,
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

    items.into_iter().filter_map(|item| parse_value(&item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_locals() {
        let content = r#"
locals {
  org_id = "111"
  count  = 3
  ratio  = 1.5
  active = true
  empty  = null
}
"#;
        let parsed = parse(content, false);
        let map: std::collections::HashMap<_, _> = parsed.into_iter().collect();
        assert_eq!(map["org_id"], Value::String("111".into()));
        assert_eq!(map["count"], Value::Int(3));
        assert_eq!(map["ratio"], Value::Float(1.5));
        assert_eq!(map["active"], Value::Bool(true));
        assert_eq!(map["empty"], Value::Null);
    }

    #[test]
    fn filters_dynamic_expressions() {
        let content = r#"
locals {
  static_val = "fine"
  dynamic_val = "${local.x}"
  fn_val = lower("x")
  ref_val = local.y
}
"#;
        let parsed = parse(content, false);
        let keys: Vec<_> = parsed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["static_val"]);
    }

    #[test]
    fn filters_common_reserved_keys() {
        let content = r#"
locals {
  repo_root = "/x"
  normal = "keep"
}
"#;
        let parsed = parse(content, true);
        let keys: Vec<_> = parsed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["normal"]);
    }

    #[test]
    fn parses_inline_list_and_map() {
        let content = r#"
locals {
  tags = ["a", "b"]
  labels = {
    a = "1"
    b = "2"
  }
}
"#;
        let parsed = parse(content, false);
        let map: std::collections::HashMap<_, _> = parsed.into_iter().collect();
        assert_eq!(
            map["tags"],
            Value::List(vec![Value::String("a".into()), Value::String("b".into())])
        );
        assert!(matches!(map["labels"], Value::Map(_)));
    }

    #[test]
    fn brace_inside_string_does_not_affect_depth() {
        let content = r#"
locals {
  tricky = "has } a brace"
}
"#;
        let parsed = parse(content, false);
        let map: std::collections::HashMap<_, _> = parsed.into_iter().collect();
        assert_eq!(map["tricky"], Value::String("has } a brace".into()));
    }
}
