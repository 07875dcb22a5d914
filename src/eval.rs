//! C6 — expression evaluator (SPEC_FULL §4.6). The heart of the renderer.
//!
//! Operates on raw expression substrings (bracket-depth-aware splitting,
//! not AST traversal) against a mutable [`EvalContext`]. Never panics on
//! malformed input: anything it cannot make sense of becomes an
//! unresolved-marker string plus an entry in `unresolved`.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dependency::DependencyResolver;
use crate::locator::{find_in_parent_folders, normalize_path};
use crate::value::Value;

static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"(.*)"$"#).unwrap());
static FOR_HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*for\s+").unwrap());
static FOR_VARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^for\s+([\w,\s]+?)\s+in\s+").unwrap());
static INCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^include\.(\w+)\.locals\.([\w.]+)(.*)$").unwrap());
static DEPENDENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^dependency\.([\w-]+)\.outputs\.(\w+)(.*)$").unwrap());
static LOCAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^local\.([\w.]+)(.*)$").unwrap());
static BASENAME_TGDIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^basename\(get_terragrunt_dir\(\)\)$").unwrap());
static DIRNAME_CHAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((?:basename|dirname)\()+get_terragrunt_dir\(\)\)+$").unwrap());
static TGDIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^get_terragrunt_dir\(\)$").unwrap());
static GET_ENV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^get_env\((.+)\)$").unwrap());
static IDX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^\[(.+?)\](.*)$").unwrap());
static COMPLEX_CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\(").unwrap());
static INPUTS_SELF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^inputs\.\w+").unwrap());
static BARE_IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());
static INTERP_SUB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());
static MAP_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\w-]+)\s*=\s*(.*)$").unwrap());
static KEY_EQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[\w-]+\s*=").unwrap());
static FIND_IN_PARENTS_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"find_in_parent_folders\("([^"]+)"\)"#).unwrap());
static RTC_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"read_terragrunt_config\(\s*"([^"]*)"\s*\)"#).unwrap());

macro_rules! fn_re {
    ($name:ident, $pat:literal) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pat).unwrap());
    };
}

fn_re!(TRY_RE, r"(?s)^try\((.+)\)$");
fn_re!(MERGE_RE, r"(?s)^merge\((.+)\)$");
fn_re!(CONCAT_RE, r"(?s)^concat\((.+)\)$");
fn_re!(DISTINCT_RE, r"(?s)^distinct\((.+)\)$");
fn_re!(FLATTEN_RE, r"(?s)^flatten\((.+)\)$");
fn_re!(KEYS_RE, r"(?s)^keys\((.+)\)$");
fn_re!(VALUES_RE, r"(?s)^values\((.+)\)$");
fn_re!(SORT_RE, r"(?s)^sort\((.+)\)$");
fn_re!(CONTAINS_RE, r"(?s)^contains\((.+)\)$");
fn_re!(INDEX_RE, r"(?s)^index\((.+)\)$");
fn_re!(TOSTRING_RE, r"(?s)^tostring\((.+)\)$");
fn_re!(STARTSWITH_RE, r"(?s)^startswith\((.+)\)$");
fn_re!(ENDSWITH_RE, r"(?s)^endswith\((.+)\)$");
fn_re!(LOWER_RE, r"(?s)^lower\((.+)\)$");
fn_re!(UPPER_RE, r"(?s)^upper\((.+)\)$");
fn_re!(TITLE_RE, r"(?s)^title\((.+)\)$");
fn_re!(SPLIT_RE, r"(?s)^split\((.+)\)$");
fn_re!(SUBSTR_RE, r"(?s)^substr\((.+)\)$");
fn_re!(FORMAT_RE, r"(?s)^format\((.+)\)$");
fn_re!(LOOKUP_RE, r"(?s)^lookup\((.+)\)$");
fn_re!(REPLACE_RE, r"(?s)^replace\((.+)\)$");
fn_re!(TRIMSUFFIX_RE, r"(?s)^trimsuffix\((.+)\)$");

/// Mutable evaluation state threaded through every `resolve_*` call for one
/// render. Not `Clone`: `locals_ctx` save/restore around `for`-expression
/// scopes clones the inner `Value`, not the whole context.
pub struct EvalContext {
    pub base_locals: Value,
    pub extra_includes: std::collections::HashMap<String, Value>,
    pub dep_resolver: DependencyResolver,
    pub resource_path: PathBuf,
    pub repo_root: PathBuf,
    pub locals_ctx: Value,
    pub unresolved: Vec<String>,
    rtc_cache: std::collections::HashMap<String, Value>,
}

impl EvalContext {
    pub fn new(
        resource_path: PathBuf,
        repo_root: PathBuf,
        base_locals: Value,
        dep_resolver: DependencyResolver,
    ) -> Self {
        Self {
            base_locals,
            extra_includes: std::collections::HashMap::new(),
            dep_resolver,
            resource_path,
            repo_root,
            locals_ctx: Value::empty_map(),
            unresolved: Vec::new(),
            rtc_cache: std::collections::HashMap::new(),
        }
    }

    pub fn set_locals_context(&mut self, ctx: Value) {
        self.locals_ctx = ctx;
    }

    fn locals_set(&mut self, key: String, val: Value) {
        match &mut self.locals_ctx {
            Value::Map(m) => map_set(m, key, val),
            _ => self.locals_ctx = Value::Map(vec![(key, val)]),
        }
    }

    pub fn track_unresolved(&mut self, token: &str) {
        let clean = token.trim_start_matches('<').trim_end_matches('>').to_string();
        if !self.unresolved.contains(&clean) {
            self.unresolved.push(clean);
        }
    }

    /// Recursively resolve every string leaf of `value`; maps/lists recurse,
    /// everything else passes through unchanged.
    pub fn resolve_value(&mut self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Map(m) => Value::Map(m.iter().map(|(k, v)| (k.clone(), self.resolve_value(v))).collect()),
            Value::List(l) => Value::List(l.iter().map(|v| self.resolve_value(v)).collect()),
            other => other.clone(),
        }
    }

    fn resolve_string(&mut self, s: &str) -> Value {
        if s.starts_with("${") && s.ends_with('}') {
            if let Some(end) = find_matching_close(s, 1) {
                if end == s.len() - 1 {
                    return self.resolve_expr(s[2..end].trim());
                }
            }
        }

        if s.contains("${") {
            let mut out = String::new();
            let mut last = 0;
            for caps in INTERP_SUB_RE.captures_iter(s) {
                let m = caps.get(0).unwrap();
                out.push_str(&s[last..m.start()]);
                let inner = caps.get(1).unwrap().as_str();
                let resolved = self.resolve_expr(inner.trim());
                let is_marker = matches!(&resolved, Value::String(rs) if crate::value::is_unresolved_str(rs));
                if is_marker {
                    out.push_str(m.as_str());
                } else {
                    out.push_str(&resolved.to_string());
                }
                last = m.end();
            }
            out.push_str(&s[last..]);
            if out.contains("${") {
                self.track_unresolved(&out);
            }
            return Value::String(out);
        }

        Value::String(s.to_string())
    }

    /// Resolve a single bare expression (no surrounding quotes/`${}`).
    pub fn resolve_expr(&mut self, e: &str) -> Value {
        let e = e.trim();

        match e {
            "{}" => return Value::empty_map(),
            "[]" => return Value::List(Vec::new()),
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" => return Value::Null,
            _ => {}
        }
        if INT_RE.is_match(e) {
            if let Ok(i) = e.parse::<i64>() {
                return Value::Int(i);
            }
        }
        if FLOAT_RE.is_match(e) {
            if let Ok(f) = e.parse::<f64>() {
                return Value::Float(f);
            }
        }
        if let Some(caps) = QUOTED_RE.captures(e) {
            let inner = caps.get(1).unwrap().as_str();
            if !inner.contains("${") {
                return Value::String(inner.to_string());
            }
            return self.resolve_string(inner);
        }

        if let Some(stripped) = e.strip_prefix('{') {
            if let Some(inner) = stripped.strip_suffix('}') {
                let inner = inner.trim();
                if FOR_HEAD_RE.is_match(inner) {
                    if let Some(v) = self.resolve_for_expr(inner, true) {
                        return v;
                    }
                    self.track_unresolved("<for-expression>");
                    return Value::String("<for-expression>".to_string());
                }
                return self.parse_hcl_map(inner);
            }
        }

        if let Some(stripped) = e.strip_prefix('[') {
            if let Some(inner) = stripped.strip_suffix(']') {
                let inner = inner.trim();
                if inner.is_empty() {
                    return Value::List(Vec::new());
                }
                if FOR_HEAD_RE.is_match(inner) {
                    if let Some(v) = self.resolve_for_expr(inner, false) {
                        return v;
                    }
                    self.track_unresolved("<for-expression>");
                    return Value::String("<for-expression>".to_string());
                }
                let parts = split_top_level(inner);
                return Value::List(parts.iter().map(|p| self.resolve_expr(p.trim())).collect());
            }
        }

        if let Some(caps) = INCLUDE_RE.captures(e) {
            let name = caps.get(1).unwrap().as_str();
            let dotted = caps.get(2).unwrap().as_str();
            let suffix = caps.get(3).unwrap().as_str();
            let ctx = if name == "base" {
                Some(self.base_locals.clone())
            } else {
                self.extra_includes.get(name).cloned()
            };
            if let Some(ctx) = ctx {
                if suffix.is_empty() || suffix.starts_with('[') {
                    let val = dot_lookup(&ctx, dotted);
                    return self.apply_index_suffix(val, suffix);
                }
                // complex suffix: fall through to ternary/comparison below.
            }
        }

        if let Some(caps) = DEPENDENCY_RE.captures(e) {
            let name = caps.get(1).unwrap().as_str().to_string();
            let key = caps.get(2).unwrap().as_str().to_string();
            let suffix = caps.get(3).unwrap().as_str();
            let resolved_suffix = self.resolve_local_refs_in_suffix(suffix);
            return Value::String(self.dep_resolver.resolve_ref_with_suffix(&name, &key, &resolved_suffix));
        }

        if let Some(caps) = LOCAL_RE.captures(e) {
            let dotted = caps.get(1).unwrap().as_str();
            let suffix = caps.get(2).unwrap().as_str();
            if suffix.is_empty() || suffix.starts_with('[') {
                let val = dot_lookup(&self.locals_ctx, dotted);
                return self.apply_index_suffix(val, suffix);
            }
            // complex suffix: fall through.
        }

        if BASENAME_TGDIR_RE.is_match(e) {
            return Value::String(basename(&self.resource_path));
        }
        if DIRNAME_CHAIN_RE.is_match(e) {
            if let Some(v) = self.resolve_dirname_chain(e) {
                return v;
            }
        }
        if TGDIR_RE.is_match(e) {
            return Value::String(self.resource_path.to_string_lossy().to_string());
        }
        if let Some(caps) = GET_ENV_RE.captures(e) {
            let args = split_top_level(caps.get(1).unwrap().as_str());
            if args.len() == 2 {
                return self.resolve_expr(args[1].trim());
            }
            return Value::String("".to_string());
        }

        if let Some(v) = self.try_function_call(e) {
            return v;
        }

        if FOR_VARS_RE.is_match(e) {
            if let Some(v) = self.resolve_for_expr(e, false) {
                return v;
            }
            self.track_unresolved("<for-expression>");
            return Value::String("<for-expression>".to_string());
        }

        if let Some(idx) = find_depth0_token(e, " ? ") {
            let cond = &e[..idx];
            let rest = &e[idx + 3..];
            if let Some(colon) = find_depth0_for_colon(rest) {
                let t_expr = rest[..colon].trim();
                let f_expr = rest[colon + 2..].trim();
                return self.resolve_ternary(cond.trim(), t_expr, f_expr);
            }
        }

        for op in [" != ", " == "] {
            if let Some(idx) = find_depth0_token(e, op) {
                let lhs = self.resolve_expr(e[..idx].trim());
                let rhs = self.resolve_expr(e[idx + op.len()..].trim());
                if is_marker(&lhs) || is_marker(&rhs) {
                    let short = collapse_ws(e, 60);
                    self.track_unresolved(&format!("<cmp({short})>"));
                    return Value::String(format!("<cmp({short})>"));
                }
                let eq = lhs == rhs;
                return Value::Bool(if op == " == " { eq } else { !eq });
            }
        }

        if COMPLEX_CALL_RE.is_match(e) {
            let short = collapse_ws(e, 80);
            self.track_unresolved(&format!("<{short}>"));
            return Value::String(format!("<{short}>"));
        }

        if INPUTS_SELF_RE.is_match(e) {
            let short = collapse_ws(e, 80);
            self.track_unresolved(&format!("<{short}>"));
            return Value::String(format!("<{short}>"));
        }

        if BARE_IDENT_RE.is_match(e) {
            if let Some(v) = self.locals_ctx.map_get(e) {
                return v.clone();
            }
        }

        Value::String(e.to_string())
    }

    fn apply_index_suffix(&mut self, val: Value, suffix: &str) -> Value {
        if suffix.is_empty() {
            return val;
        }
        let Some(caps) = IDX_RE.captures(suffix) else { return val };
        let idx_expr = caps.get(1).unwrap().as_str().trim();
        let idx_val = self.resolve_expr(idx_expr);
        match (&val, &idx_val) {
            (Value::List(l), Value::Int(i)) => {
                let len = l.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if idx >= 0 && (idx as usize) < l.len() {
                    return l[idx as usize].clone();
                }
            }
            (Value::Map(_), Value::String(k)) => {
                if let Some(v) = val.map_get(k) {
                    return v.clone();
                }
            }
            _ => {}
        }
        let short = collapse_ws(suffix, 40);
        Value::String(format!("<index{short}>"))
    }

    fn resolve_local_refs_in_suffix(&mut self, suffix: &str) -> String {
        if !suffix.contains("local.") {
            return suffix.to_string();
        }
        static LOCAL_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"local\.([\w.]+)").unwrap());
        let result = LOCAL_REF_RE.replace_all(suffix, |caps: &regex::Captures| {
            dot_lookup(&self.locals_ctx.clone(), &caps[1]).to_string()
        });
        result.to_string()
    }

    fn resolve_dirname_chain(&mut self, e: &str) -> Option<Value> {
        static CHAIN_HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(basename|dirname)\(").unwrap());
        let mut ops = Vec::new();
        let mut rest = e;
        loop {
            let caps = CHAIN_HEAD_RE.captures(rest)?;
            ops.push(caps.get(1).unwrap().as_str().to_string());
            rest = &rest[caps.get(0).unwrap().end()..];
            if rest.starts_with("get_terragrunt_dir()") {
                break;
            }
        }
        let mut path = self.resource_path.clone();
        for op in ops.iter().rev() {
            path = if op == "basename" {
                PathBuf::from(basename(&path))
            } else {
                path.parent().map(|p| p.to_path_buf()).unwrap_or(path)
            };
        }
        Some(Value::String(path.to_string_lossy().to_string()))
    }

    fn try_function_call(&mut self, e: &str) -> Option<Value> {
        if let Some(c) = TRY_RE.captures(e) {
            return Some(self.resolve_try(&c[1]));
        }
        if let Some(c) = MERGE_RE.captures(e) {
            return Some(self.resolve_merge(&c[1]));
        }
        if let Some(c) = FORMAT_RE.captures(e) {
            return Some(self.resolve_format(&c[1]));
        }
        if let Some(c) = LOOKUP_RE.captures(e) {
            return Some(self.resolve_lookup(&c[1]));
        }
        if let Some(c) = REPLACE_RE.captures(e) {
            return Some(self.resolve_replace(&c[1]));
        }
        if let Some(c) = TRIMSUFFIX_RE.captures(e) {
            return Some(self.resolve_trimsuffix(&c[1]));
        }
        if let Some(c) = CONCAT_RE.captures(e) {
            return Some(self.resolve_concat(&c[1]));
        }
        if let Some(c) = DISTINCT_RE.captures(e) {
            let v = self.resolve_expr(&c[1]);
            return Some(match v {
                Value::List(l) => {
                    let mut out: Vec<Value> = Vec::new();
                    for item in l {
                        if !out.contains(&item) {
                            out.push(item);
                        }
                    }
                    Value::List(out)
                }
                other => other,
            });
        }
        if let Some(c) = FLATTEN_RE.captures(e) {
            let v = self.resolve_expr(&c[1]);
            return Some(match v {
                Value::List(l) => {
                    let mut out = Vec::new();
                    for item in l {
                        match item {
                            Value::List(inner) => out.extend(inner),
                            other => out.push(other),
                        }
                    }
                    Value::List(out)
                }
                other => other,
            });
        }
        if let Some(c) = KEYS_RE.captures(e) {
            let v = self.resolve_expr(&c[1]);
            return Some(match v {
                Value::Map(m) => Value::List(m.into_iter().map(|(k, _)| Value::String(k)).collect()),
                other => other,
            });
        }
        if let Some(c) = VALUES_RE.captures(e) {
            let v = self.resolve_expr(&c[1]);
            return Some(match v {
                Value::Map(m) => Value::List(m.into_iter().map(|(_, v)| v).collect()),
                other => other,
            });
        }
        if let Some(c) = SORT_RE.captures(e) {
            let v = self.resolve_expr(&c[1]);
            return Some(match v {
                Value::List(mut l) => {
                    l.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
                    Value::List(l)
                }
                other => other,
            });
        }
        if let Some(c) = CONTAINS_RE.captures(e) {
            return Some(self.resolve_contains(&c[1]));
        }
        if let Some(c) = INDEX_RE.captures(e) {
            return Some(self.resolve_index(&c[1]));
        }
        if let Some(c) = TOSTRING_RE.captures(e) {
            let v = self.resolve_expr(&c[1]);
            return Some(Value::String(v.to_string()));
        }
        if let Some(c) = STARTSWITH_RE.captures(e) {
            return Some(self.resolve_affix(&c[1], true));
        }
        if let Some(c) = ENDSWITH_RE.captures(e) {
            return Some(self.resolve_affix(&c[1], false));
        }
        if let Some(c) = LOWER_RE.captures(e) {
            return Some(self.resolve_case(&c[1], |s| s.to_lowercase()));
        }
        if let Some(c) = UPPER_RE.captures(e) {
            return Some(self.resolve_case(&c[1], |s| s.to_uppercase()));
        }
        if let Some(c) = TITLE_RE.captures(e) {
            return Some(self.resolve_case(&c[1], title_case));
        }
        if let Some(c) = SPLIT_RE.captures(e) {
            return Some(self.resolve_split(&c[1]));
        }
        if let Some(c) = SUBSTR_RE.captures(e) {
            return Some(self.resolve_substr(&c[1]));
        }
        if e.starts_with("templatefile(") {
            self.track_unresolved("<templatefile(...)>");
            return Some(Value::String("<templatefile(...)>".to_string()));
        }
        if e.starts_with("read_terragrunt_config(") {
            return Some(self.resolve_read_terragrunt_config(e));
        }
        None
    }

    fn resolve_try(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.is_empty() {
            return Value::String(format!("<try({args_str})>"));
        }
        for part in &parts {
            let saved = self.unresolved.clone();
            let val = self.resolve_expr(part.trim());
            if !is_marker(&val) {
                return val;
            }
            self.unresolved = saved;
        }
        self.resolve_expr(parts.last().unwrap().trim())
    }

    fn resolve_merge(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        let mut result: Vec<(String, Value)> = Vec::new();
        for part in &parts {
            if let Value::Map(m) = self.resolve_expr(part.trim()) {
                for (k, v) in m {
                    map_set(&mut result, k, v);
                }
            }
        }
        if result.is_empty() && !parts.is_empty() {
            let short = collapse_ws(args_str, 40);
            return Value::String(format!("<merge({short})>"));
        }
        Value::Map(result)
    }

    fn resolve_concat(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        let mut result = Vec::new();
        let mut all_ok = true;
        for part in &parts {
            match self.resolve_expr(part.trim()) {
                Value::List(l) => result.extend(l),
                other if is_marker(&other) => all_ok = false,
                other => result.push(other),
            }
        }
        if !all_ok {
            let short = collapse_ws(args_str, 80);
            self.track_unresolved(&format!("<concat({short})>"));
            return Value::String(format!("<concat({short})>"));
        }
        Value::List(result)
    }

    fn resolve_lookup(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() < 2 {
            return Value::String(format!("<lookup({args_str})>"));
        }
        let map_val = self.resolve_expr(parts[0].trim());
        let key_val = self.resolve_expr(parts[1].trim());
        let default_val = if parts.len() > 2 { Some(self.resolve_expr(parts[2].trim())) } else { None };
        if let (Value::Map(_), Value::String(k)) = (&map_val, &key_val) {
            if let Some(v) = map_val.map_get(k) {
                return v.clone();
            }
        }
        default_val.unwrap_or_else(|| Value::String("<lookup(...)>".to_string()))
    }

    fn resolve_replace(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 3 {
            return Value::String(format!("<replace({args_str})>"));
        }
        let s = self.resolve_expr(parts[0].trim());
        let old = self.resolve_expr(parts[1].trim());
        let new = self.resolve_expr(parts[2].trim());
        if let (Value::String(s), Value::String(old), Value::String(new)) = (&s, &old, &new) {
            Value::String(s.replace(old.as_str(), new.as_str()))
        } else {
            Value::String("<replace(...)>".to_string())
        }
    }

    fn resolve_trimsuffix(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 2 {
            return Value::String(format!("<trimsuffix({args_str})>"));
        }
        let s = self.resolve_expr(parts[0].trim());
        let suffix = self.resolve_expr(parts[1].trim());
        if let (Value::String(s), Value::String(suf)) = (&s, &suffix) {
            Value::String(s.strip_suffix(suf.as_str()).unwrap_or(s).to_string())
        } else {
            Value::String("<trimsuffix(...)>".to_string())
        }
    }

    fn resolve_contains(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 2 {
            return Value::String(format!("<contains({args_str})>"));
        }
        let list_val = self.resolve_expr(parts[0].trim());
        let item = self.resolve_expr(parts[1].trim());
        match list_val {
            Value::List(l) => Value::Bool(l.contains(&item)),
            _ => Value::String("<contains(...)>".to_string()),
        }
    }

    fn resolve_index(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 2 {
            return Value::String(format!("<index({args_str})>"));
        }
        let list_val = self.resolve_expr(parts[0].trim());
        let item = self.resolve_expr(parts[1].trim());
        match list_val {
            Value::List(l) => match l.iter().position(|v| v == &item) {
                Some(p) => Value::Int(p as i64),
                None => Value::String("<index(...)>".to_string()),
            },
            _ => Value::String("<index(...)>".to_string()),
        }
    }

    fn resolve_affix(&mut self, args_str: &str, prefix: bool) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 2 {
            return Value::String(format!("<affix({args_str})>"));
        }
        let s = self.resolve_expr(parts[0].trim());
        let affix = self.resolve_expr(parts[1].trim());
        if let (Value::String(s), Value::String(affix)) = (&s, &affix) {
            Value::Bool(if prefix { s.starts_with(affix.as_str()) } else { s.ends_with(affix.as_str()) })
        } else {
            Value::String("<affix(...)>".to_string())
        }
    }

    fn resolve_case(&mut self, args_str: &str, f: impl Fn(&str) -> String) -> Value {
        let v = self.resolve_expr(args_str.trim());
        match &v {
            Value::String(s) if !crate::value::is_unresolved_str(s) => Value::String(f(s)),
            _ => {
                let short = collapse_ws(args_str, 40);
                Value::String(format!("<fn({short})>"))
            }
        }
    }

    fn resolve_split(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 2 {
            return Value::String(format!("<split({args_str})>"));
        }
        let sep = self.resolve_expr(parts[0].trim());
        let s = self.resolve_expr(parts[1].trim());
        if let (Value::String(sep), Value::String(s)) = (&sep, &s) {
            Value::List(s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect())
        } else {
            Value::String("<split(...)>".to_string())
        }
    }

    fn resolve_substr(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.len() != 3 {
            return Value::String(format!("<substr({args_str})>"));
        }
        let s = self.resolve_expr(parts[0].trim());
        let offset = self.resolve_expr(parts[1].trim());
        let length = self.resolve_expr(parts[2].trim());
        let (Value::String(s), Value::Int(off), Value::Int(len)) = (&s, &offset, &length) else {
            return Value::String("<substr(...)>".to_string());
        };
        let chars: Vec<char> = s.chars().collect();
        let n = chars.len() as i64;
        // Mirrors the original's plain `val[offset:offset+length]` Python slice: both
        // ends are normalised independently (negative wraps from the end, then
        // clamps into [0, n]) rather than treating a negative length specially, so
        // e.g. substr("hello", 1, -1) == "" rather than running to the end.
        let normalize = |i: i64| -> i64 {
            let idx = if i < 0 { n + i } else { i };
            idx.clamp(0, n)
        };
        let start = normalize(*off);
        let end = normalize(off + len);
        if end <= start {
            return Value::String(String::new());
        }
        Value::String(chars[start as usize..end as usize].iter().collect())
    }

    fn resolve_format(&mut self, args_str: &str) -> Value {
        let parts = split_top_level(args_str);
        if parts.is_empty() {
            return Value::String(format!("<format({args_str})>"));
        }
        let fmt = self.resolve_expr(parts[0].trim());
        let Value::String(fmt) = fmt else {
            return Value::String("<format(...)>".to_string());
        };
        let args: Vec<Value> = parts[1..].iter().map(|p| self.resolve_expr(p.trim())).collect();
        match sprintf(&fmt, &args) {
            Some(s) => Value::String(s),
            None => {
                let short = collapse_ws(args_str, 60);
                Value::String(format!("<format({short})>"))
            }
        }
    }

    fn resolve_ternary(&mut self, cond: &str, t_expr: &str, f_expr: &str) -> Value {
        let cond_val = self.resolve_expr(cond);
        let truthy = match &cond_val {
            Value::Bool(b) => *b,
            Value::String(s) if crate::value::is_unresolved_str(s) => true,
            Value::String(s) => !s.is_empty(),
            Value::Null => false,
            _ => true,
        };
        self.resolve_expr(if truthy { t_expr } else { f_expr })
    }

    fn resolve_for_expr(&mut self, inner: &str, is_map: bool) -> Option<Value> {
        let caps = FOR_VARS_RE.captures(inner)?;
        let var_str = caps.get(1).unwrap().as_str().trim();
        let vars_list: Vec<String> = var_str.split(',').map(|v| v.trim().to_string()).collect();
        let rest = &inner[caps.get(0).unwrap().end()..];

        let colon_idx = find_depth0_for_colon(rest)?;
        let iterable_expr = rest[..colon_idx].trim();
        let body = rest[colon_idx + 2..].trim();

        let iterable = self.resolve_expr(iterable_expr);
        let saved_locals = self.locals_ctx.clone();

        let out = if is_map {
            let (arrow_idx, sep_len) = find_arrow(body)?;
            let key_expr = body[..arrow_idx].trim().to_string();
            let val_expr = body[arrow_idx + sep_len..].trim().to_string();
            let mut result: Vec<(String, Value)> = Vec::new();
            match iterable {
                Value::List(items) => {
                    for item in items {
                        self.locals_set(vars_list[0].clone(), item);
                        let key = self.resolve_expr(&key_expr);
                        let val = self.resolve_expr(&val_expr);
                        if let Value::String(k) = key {
                            map_set(&mut result, k, val);
                        }
                    }
                }
                Value::Map(m) => {
                    for (k, v) in m {
                        self.locals_set(vars_list[0].clone(), Value::String(k));
                        if vars_list.len() > 1 {
                            self.locals_set(vars_list[1].clone(), v);
                        }
                        let key = self.resolve_expr(&key_expr);
                        let val = self.resolve_expr(&val_expr);
                        if let Value::String(kk) = key {
                            map_set(&mut result, kk, val);
                        }
                    }
                }
                _ => {}
            }
            Value::Map(result)
        } else {
            let if_idx = find_depth0_token(body, " if ");
            let (body_expr, cond_expr) = match if_idx {
                Some(idx) => (body[..idx].trim().to_string(), Some(body[idx + 4..].trim().to_string())),
                None => (body.trim().to_string(), None),
            };
            let mut result_list = Vec::new();
            match iterable {
                Value::Map(m) => {
                    for (k, v) in m {
                        self.locals_set(vars_list[0].clone(), Value::String(k));
                        if vars_list.len() > 1 {
                            self.locals_set(vars_list[1].clone(), v);
                        }
                        if let Some(ce) = &cond_expr {
                            if matches!(self.resolve_expr(ce), Value::Bool(false)) {
                                continue;
                            }
                        }
                        result_list.push(self.resolve_expr(&body_expr));
                    }
                }
                Value::List(items) => {
                    for item in items {
                        self.locals_set(vars_list[0].clone(), item);
                        if let Some(ce) = &cond_expr {
                            if matches!(self.resolve_expr(ce), Value::Bool(false)) {
                                continue;
                            }
                        }
                        result_list.push(self.resolve_expr(&body_expr));
                    }
                }
                _ => {}
            }
            Value::List(result_list)
        };

        self.locals_ctx = saved_locals;
        Some(out)
    }

    fn resolve_read_terragrunt_config(&mut self, expr: &str) -> Value {
        let unresolved_marker = || Value::String("<read_terragrunt_config(...)>".to_string());

        let resolved_path = if let Some(caps) = FIND_IN_PARENTS_CALL_RE.captures(expr) {
            find_in_parent_folders(&self.resource_path, &self.repo_root, &caps[1])
        } else if let Some(caps) = RTC_PATH_RE.captures(expr) {
            let mut raw_path = caps[1].to_string();
            if raw_path.contains("${") {
                match self.resolve_string(&raw_path) {
                    Value::String(s) if !crate::value::is_unresolved_str(&s) => raw_path = s,
                    _ => {
                        self.track_unresolved("<read_terragrunt_config(...)>");
                        return unresolved_marker();
                    }
                }
            }
            let mut p = PathBuf::from(&raw_path);
            if !p.is_absolute() {
                p = self.resource_path.join(p);
            }
            let p = normalize_path(&p);
            if p.is_file() { Some(p) } else { None }
        } else {
            None
        };

        let Some(resolved) = resolved_path else {
            self.track_unresolved("<read_terragrunt_config(...)>");
            return unresolved_marker();
        };

        let cache_key = resolved.to_string_lossy().to_string();
        if let Some(cached) = self.rtc_cache.get(&cache_key) {
            tracing::debug!(path = %cache_key, "read_terragrunt_config cache hit");
            return cached.clone();
        }

        tracing::debug!(path = %cache_key, "read_terragrunt_config parsing via bridge");
        match crate::bridge::parse(&resolved) {
            Ok(parsed) => {
                let blocks = crate::bridge::extract_blocks(&parsed);
                let mut locals_dict: Vec<(String, Value)> = Vec::new();
                for block in &blocks.locals {
                    if let serde_json::Value::Object(o) = block {
                        for (k, v) in o {
                            map_set(&mut locals_dict, k.clone(), Value::from_json(v));
                        }
                    }
                }
                let resolved_locals: Vec<(String, Value)> =
                    locals_dict.into_iter().map(|(k, v)| { let rv = self.resolve_value(&v); (k, rv) }).collect();
                let result = Value::Map(vec![("locals".to_string(), Value::Map(resolved_locals))]);
                self.rtc_cache.insert(cache_key, result.clone());
                result
            }
            Err(_) => {
                self.track_unresolved("<read_terragrunt_config(...)>");
                unresolved_marker()
            }
        }
    }

    fn parse_hcl_map(&mut self, inner: &str) -> Value {
        let mut lines: Vec<String> = Vec::new();
        for raw_line in inner.split('\n') {
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

        let mut result: Vec<(String, Value)> = Vec::new();
        let mut i = 0usize;
        while i < lines.len() {
            let line = lines[i].trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                i += 1;
                continue;
            }
            let Some(caps) = MAP_KEY_RE.captures(line) else {
                i += 1;
                continue;
            };
            let key = caps[1].to_string();
            let mut val_raw = caps[2].trim().to_string();
            if let Some(stripped) = val_raw.strip_suffix(',') {
                val_raw = stripped.trim_end().to_string();
            }
            let mut depth = bracket_delta_str_aware(&val_raw);
            while depth > 0 && i + 1 < lines.len() {
                i += 1;
                let next_line = lines[i].clone();
                val_raw.push('\n');
                val_raw.push_str(&next_line);
                depth += bracket_delta_str_aware(&next_line);
            }
            let v = if val_raw.trim().is_empty() {
                Value::String(String::new())
            } else {
                self.resolve_expr(val_raw.trim())
            };
            map_set(&mut result, key, v);
            i += 1;
        }
        Value::Map(result)
    }

    /// Resolve a raw set of `locals` assignments (from one or more parsed
    /// blocks) to a fixed point, bounded at 10 progress passes plus one
    /// final non-reverting pass.
    pub fn resolve_locals(&mut self, blocks: &[Value], seed: Option<Vec<(String, Value)>>) -> Vec<(String, Value)> {
        let mut raw: Vec<(String, Value)> = Vec::new();
        for block in blocks {
            if let Value::Map(m) = block {
                for (k, v) in m {
                    map_set(&mut raw, k.clone(), v.clone());
                }
            }
        }

        let mut resolved: Vec<(String, Value)> = seed.unwrap_or_default();
        let seeded_keys: Vec<String> = resolved.iter().map(|(k, _)| k.clone()).collect();
        let mut remaining: Vec<(String, Value)> =
            raw.into_iter().filter(|(k, _)| !seeded_keys.contains(k)).collect();

        for _pass in 0..10 {
            if remaining.is_empty() {
                break;
            }
            let mut progress = false;
            let mut still: Vec<(String, Value)> = Vec::new();
            let pending_keys: Vec<String> = remaining.iter().map(|(k, _)| k.clone()).collect();

            for (k, v) in remaining {
                let raw_repr = value_repr(&v);
                let refs_pending = pending_keys.iter().any(|other| {
                    other != &k && raw_repr.contains(&format!("local.{other}"))
                });
                if refs_pending {
                    still.push((k, v));
                    continue;
                }
                self.locals_ctx = Value::Map(resolved.clone());
                let saved_unresolved = self.unresolved.clone();
                let result = self.resolve_value(&v);
                if result.is_unresolved() {
                    still.push((k, v));
                    self.unresolved = saved_unresolved;
                } else {
                    map_set(&mut resolved, k, result);
                    progress = true;
                }
            }
            remaining = still;
            if !progress {
                break;
            }
        }

        for (k, v) in remaining {
            self.locals_ctx = Value::Map(resolved.clone());
            let result = self.resolve_value(&v);
            map_set(&mut resolved, k, result);
        }

        self.locals_ctx = Value::Map(resolved.clone());
        resolved
    }

    /// Resolve an `inputs` section: a list of object blocks merged verbatim,
    /// or a bare expression block (e.g. `merge(local.x, {...})`).
    pub fn resolve_inputs(&mut self, blocks: &[Value]) -> Vec<(String, Value)> {
        let mut raw: Vec<(String, Value)> = Vec::new();
        for block in blocks {
            match block {
                Value::Map(m) => {
                    for (k, v) in m {
                        map_set(&mut raw, k.clone(), v.clone());
                    }
                }
                Value::String(s) => {
                    if let Value::Map(m) = self.resolve_expr(s) {
                        for (k, v) in m {
                            map_set(&mut raw, k, v);
                        }
                    }
                }
                _ => {}
            }
        }
        raw.into_iter().map(|(k, v)| { let rv = self.resolve_value(&v); (k, rv) }).collect()
    }
}

fn map_set(map: &mut Vec<(String, Value)>, key: String, val: Value) {
    if let Some(entry) = map.iter_mut().find(|(k, _)| *k == key) {
        entry.1 = val;
    } else {
        map.push((key, val));
    }
}

fn is_marker(v: &Value) -> bool {
    matches!(v, Value::String(s) if crate::value::is_unresolved_str(s))
}

fn basename(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

fn collapse_ws(s: &str, max: usize) -> String {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    let collapsed = WS_RE.replace_all(s, " ").to_string();
    collapsed.chars().take(max).collect()
}

/// A crude textual dump of a `Value` tree used only to substring-search for
/// `local.<name>` references when deciding pass ordering in `resolve_locals`.
fn value_repr(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::List(l) => l.iter().map(value_repr).collect::<Vec<_>>().join(" "),
        Value::Map(m) => m.iter().map(|(k, v)| format!("{k} {}", value_repr(v))).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Minimal Go/Terraform-style `%`-verb formatter: `%s`, `%d`, `%f`, `%v`,
/// `%q`. Returns `None` on verb/argument-count mismatch.
fn sprintf(fmt: &str, args: &[Value]) -> Option<String> {
    let mut out = String::new();
    let mut arg_i = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let verb = chars.next()?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args.get(arg_i)?;
        arg_i += 1;
        match verb {
            's' | 'v' => out.push_str(&arg.to_string()),
            'd' => out.push_str(&arg.as_i64()?.to_string()),
            'f' => out.push_str(&arg.to_string()),
            'q' => out.push_str(&format!("\"{}\"", arg)),
            _ => return None,
        }
    }
    if arg_i != args.len() {
        return None;
    }
    Some(out)
}

fn bracket_delta_str_aware(s: &str) -> i32 {
    let mut depth = 0i32;
    let mut in_str = false;
    let chars: Vec<char> = s.chars().collect();
    for (ci, &ch) in chars.iter().enumerate() {
        if ch == '"' && (ci == 0 || chars[ci - 1] != '\\') {
            in_str = !in_str;
        } else if !in_str {
            match ch {
                '{' | '[' => depth += 1,
                '}' | ']' => depth -= 1,
                _ => {}
            }
        }
    }
    depth
}

/// Look up a dotted path inside a `Value::Map`, returning an unresolved
/// marker string if any segment is missing or the root isn't a map.
fn dot_lookup(ctx: &Value, dotted: &str) -> Value {
    let mut current = ctx;
    for part in dotted.split('.') {
        match current.map_get(part) {
            Some(v) => current = v,
            None => return Value::String(format!("<unresolved: {dotted}>")),
        }
    }
    current.clone()
}

/// Find the matching `}` for the `{` understood to be at `open_idx` (an
/// escaped/quoted-string-aware depth scan), returning its byte index.
fn find_matching_close(s: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 1i32;
    let mut in_str = false;
    let mut prev: Option<char> = None;
    for (i, ch) in s.char_indices() {
        if i <= open_idx {
            continue;
        }
        if ch == '"' && prev != Some('\\') {
            in_str = !in_str;
        } else if !in_str {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        prev = Some(ch);
    }
    None
}

/// Find the first occurrence of `token` at bracket depth 0, outside quoted
/// strings. Returns the byte offset of the match.
pub fn find_depth0_token(s: &str, token: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_str = false;
    let mut prev: Option<char> = None;
    for (i, ch) in s.char_indices() {
        if ch == '"' && prev != Some('\\') {
            in_str = !in_str;
        } else if !in_str {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {
                    if depth == 0 && s[i..].starts_with(token) {
                        return Some(i);
                    }
                }
            }
        }
        prev = Some(ch);
    }
    None
}

/// Find the `for`-expression body separator: a `:` at bracket depth 0 that
/// is preceded by whitespace and followed by whitespace (or end of
/// string) — distinct from a ternary's ` : ` appearing later in the body.
/// Returns the byte offset of the space immediately before the colon.
pub fn find_depth0_for_colon(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_str = false;
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut prev: Option<char> = None;
    for idx in 0..chars.len() {
        let (i, ch) = chars[idx];
        if ch == '"' && prev != Some('\\') {
            in_str = !in_str;
        } else if !in_str {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth == 0 => {
                    let prev_is_space = idx > 0 && chars[idx - 1].1 == ' ';
                    let next = chars.get(idx + 1).map(|(_, c)| *c);
                    let next_is_ws_or_end = next.is_none() || next == Some(' ') || next == Some('\n');
                    if prev_is_space && next_is_ws_or_end {
                        return Some(chars[idx - 1].0);
                    }
                }
                _ => {}
            }
        }
        prev = Some(ch);
    }
    None
}

/// Locate a map-form `for` body's `=>` separator at bracket depth 0,
/// returning `(byte offset, separator length)`. Accepts both `=>` and the
/// padded ` => ` form so `key_expr`/`val_expr` slicing stays consistent.
fn find_arrow(s: &str) -> Option<(usize, usize)> {
    if let Some(idx) = find_depth0_token(s, " => ") {
        return Some((idx, 4));
    }
    find_depth0_token(s, "=>").map(|idx| (idx, 2))
}

/// Split `s` on top-level commas, respecting quoted strings, backslash
/// escapes, and `()[]{}` nesting.
pub fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_str = false;
    let mut escape = false;
    let mut current = String::new();
    for ch in s.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }
        match ch {
            '\\' => {
                escape = true;
                current.push(ch);
            }
            '"' => {
                in_str = !in_str;
                current.push(ch);
            }
            '(' | '[' | '{' if !in_str => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' if !in_str => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyResolver;

    fn ctx() -> EvalContext {
        EvalContext::new(
            PathBuf::from("/repo/live/a/b/c/module"),
            PathBuf::from("/repo"),
            Value::empty_map(),
            DependencyResolver::default(),
        )
    }

    #[test]
    fn s4_try_fallback() {
        let mut c = ctx();
        let v = c.resolve_expr(r#"try(local.missing, "fallback")"#);
        assert_eq!(v, Value::String("fallback".to_string()));
        assert!(c.unresolved.is_empty());
    }

    #[test]
    fn s6_templatefile_unresolved() {
        let mut c = ctx();
        let v = c.resolve_expr(r#"templatefile("x.tpl", {})"#);
        assert_eq!(v, Value::String("<templatefile(...)>".to_string()));
        assert!(c.unresolved.contains(&"templatefile(...)".to_string()));
    }

    #[test]
    fn s7_pure_interpolation_preserves_type() {
        let mut c = ctx();
        c.locals_ctx = Value::Map(vec![("port".to_string(), Value::Int(8080))]);
        let v = c.resolve_string("${local.port}");
        assert_eq!(v, Value::Int(8080));
    }

    #[test]
    fn mixed_interpolation_stringifies() {
        let mut c = ctx();
        c.locals_ctx = Value::Map(vec![("port".to_string(), Value::Int(8080))]);
        let v = c.resolve_string("host:${local.port}");
        assert_eq!(v, Value::String("host:8080".to_string()));
    }

    #[test]
    fn ternary_picks_branch() {
        let mut c = ctx();
        let v = c.resolve_expr(r#""a" == "a" ? "yes" : "no""#);
        assert_eq!(v, Value::String("yes".to_string()));
    }

    #[test]
    fn for_expression_list_form() {
        let mut c = ctx();
        c.locals_ctx = Value::Map(vec![(
            "names".to_string(),
            Value::List(vec![Value::String("a".to_string()), Value::String("b".to_string())]),
        )]);
        let v = c.resolve_expr("[for n in local.names : upper(n)]");
        assert_eq!(
            v,
            Value::List(vec![Value::String("A".to_string()), Value::String("B".to_string())])
        );
    }

    #[test]
    fn for_expression_map_form_with_filter() {
        let mut c = ctx();
        c.locals_ctx = Value::Map(vec![(
            "items".to_string(),
            Value::List(vec![Value::String("x".to_string()), Value::String("y".to_string())]),
        )]);
        let v = c.resolve_expr(r#"{for v in local.items : v => upper(v)}"#);
        let Value::Map(m) = v else { panic!("expected map") };
        assert_eq!(m.len(), 2);
        assert_eq!(m.iter().find(|(k, _)| k == "x").unwrap().1, Value::String("X".to_string()));
    }

    #[test]
    fn for_expression_does_not_leak_binding() {
        let mut c = ctx();
        c.locals_ctx = Value::Map(vec![("names".to_string(), Value::List(vec![Value::String("a".to_string())]))]);
        let _ = c.resolve_expr("[for n in local.names : n]");
        assert!(c.locals_ctx.map_get("n").is_none());
    }

    #[test]
    fn s5_dependency_via_eval() {
        let mut c = ctx();
        let mut dep = DependencyResolver::default();
        dep.paths.insert("net".to_string(), "../../network".to_string());
        c.dep_resolver = dep;
        let v = c.resolve_expr("dependency.net.outputs.vpc_id");
        assert_eq!(v, Value::String("#dependency|../../network, vpc_id|".to_string()));
    }

    #[test]
    fn comparison_with_unresolved_side_stays_unresolved() {
        let mut c = ctx();
        let v = c.resolve_expr("local.missing == local.other_missing");
        assert!(is_marker(&v));
    }

    #[test]
    fn merge_combines_maps() {
        let mut c = ctx();
        let v = c.resolve_expr(r#"merge({a = "1"}, {b = "2"})"#);
        let Value::Map(m) = v else { panic!("expected map") };
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn resolve_locals_defers_dependent_key() {
        let mut c = ctx();
        let blocks = vec![Value::Map(vec![
            ("a".to_string(), Value::String(r#"${try(local.b, "x")}"#.to_string())),
            ("b".to_string(), Value::String("resolved".to_string())),
        ])];
        let resolved = c.resolve_locals(&blocks, None);
        let map: std::collections::HashMap<_, _> = resolved.into_iter().collect();
        assert_eq!(map["b"], Value::String("resolved".to_string()));
        assert_eq!(map["a"], Value::String("resolved".to_string()));
    }

    #[test]
    fn resolve_locals_respects_seed() {
        let mut c = ctx();
        let seed = vec![("common_vars".to_string(), Value::empty_map())];
        let blocks = vec![Value::Map(vec![("common_vars".to_string(), Value::String("should not win".to_string()))])];
        let resolved = c.resolve_locals(&blocks, Some(seed));
        let map: std::collections::HashMap<_, _> = resolved.into_iter().collect();
        assert_eq!(map["common_vars"], Value::empty_map());
    }

    #[test]
    fn split_top_level_respects_nesting_and_quotes() {
        let parts = split_top_level(r#"a, {x = "1, 2"}, [1, 2]"#);
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn substr_negative_offset_positive_length() {
        let mut c = ctx();
        let v = c.resolve_expr(r#"substr("hello", -3, 2)"#);
        assert_eq!(v, Value::String("ll".to_string()));
    }

    #[test]
    fn substr_negative_length_matches_plain_slice_semantics() {
        // Matches the ground-truth original's plain `val[offset:offset+length]`
        // slicing: a negative length is not "run to the end", it's folded into
        // the end index like any other offset, so both of these are empty.
        let mut c = ctx();
        assert_eq!(c.resolve_expr(r#"substr("hello", 1, -1)"#), Value::String(String::new()));
        assert_eq!(c.resolve_expr(r#"substr("hello", -3, -1)"#), Value::String(String::new()));
    }
}
