use std::collections::HashMap;
use std::path::PathBuf;

/// Reset SIGPIPE to default behavior so piping (e.g. `tgrender ... | less`) exits
/// cleanly instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tgrender::bridge;
use tgrender::error::RenderError;
use tgrender::hierarchy::HierarchyMerger;
use tgrender::locator;
use tgrender::output;
use tgrender::render;
use tgrender::value::Value;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
    Table,
}

/// Offline evaluator that reproduces `terragrunt render` for a resource path
/// without invoking Terragrunt itself.
#[derive(Parser)]
#[command(name = "tgrender", version, about, long_about = None)]
struct Cli {
    /// Path to a resource directory (default: current directory)
    #[arg(default_value = ".")]
    resource_path: String,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "json")]
    format: OutputFormat,

    /// Filter output to specific key(s) — repeatable
    #[arg(short = 'k', long = "key")]
    keys: Vec<String>,

    /// Include which hierarchy file (or resource/template) each value originated from
    #[arg(long = "show-sources")]
    show_sources: bool,

    /// Show only the computed standard_labels (hierarchy-only mode)
    #[arg(long = "show-labels")]
    show_labels: bool,

    /// Show only the metadata dict from inputs (--full mode only)
    #[arg(long = "show-metadata")]
    show_metadata: bool,

    /// Render full config: template defaults deep-merged with resource overrides,
    /// expressions resolved against the hierarchy. Requires hcl2json on PATH.
    #[arg(long = "full")]
    full: bool,

    /// Disable coloured output (colours are auto-detected on TTYs by default)
    #[arg(long = "no-colour", visible_alias = "no-color")]
    no_colour: bool,

    /// Raise log verbosity to debug
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if cli.no_colour {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let raw = PathBuf::from(&cli.resource_path);
    let raw = if raw.is_absolute() { raw } else { std::env::current_dir()?.join(raw) };

    if !raw.is_dir() {
        return Err(RenderError::PathNotDirectory(raw).into());
    }
    let rp = raw.canonicalize().unwrap_or(raw);

    let repo_root = locator::find_repo_root(&rp)?;

    let (rel, rel_display) = match rp.strip_prefix(&repo_root) {
        Ok(rel) => (rel.to_path_buf(), rel.to_string_lossy().to_string()),
        Err(_) => (PathBuf::new(), String::new()),
    };
    if rel.as_os_str().is_empty() || !rel_display.starts_with("live") {
        let got = if rp == repo_root { "(repo root)".to_string() } else { rel_display };
        return Err(RenderError::PathOutsideLive(got).into());
    }

    if cli.full {
        run_full(cli, &rp, &repo_root)
    } else {
        run_hierarchy(cli, &rp, &repo_root)
    }
}

fn run_full(cli: &Cli, rp: &std::path::Path, repo_root: &std::path::Path) -> Result<()> {
    if !bridge::is_available() {
        return Err(RenderError::ToolUnavailable.into());
    }

    let result = render::render(rp, repo_root)?;

    let mut full_sources: HashMap<String, String> = if cli.show_sources { result.sources.clone() } else { HashMap::new() };

    let entries: Vec<(String, Value)> = if cli.show_metadata {
        let metadata = result.inputs.map_get("metadata").cloned().unwrap_or_else(Value::empty_map);
        vec![("metadata".to_string(), metadata)]
    } else if !cli.keys.is_empty() {
        let filtered_inputs: Vec<(String, Value)> = result
            .inputs
            .as_map()
            .unwrap_or(&[])
            .iter()
            .filter(|(k, _)| cli.keys.contains(k))
            .cloned()
            .collect();
        if !full_sources.is_empty() {
            full_sources.retain(|k, _| cli.keys.contains(k));
        }
        vec![
            ("terraform_source".to_string(), Value::String(result.terraform_source.clone())),
            ("inputs".to_string(), Value::Map(filtered_inputs)),
            ("unresolved".to_string(), unresolved_list(&result.unresolved)),
        ]
    } else {
        vec![
            ("terraform_source".to_string(), Value::String(result.terraform_source.clone())),
            ("inputs".to_string(), result.inputs.clone()),
            ("unresolved".to_string(), unresolved_list(&result.unresolved)),
        ]
    };

    emit(cli, entries, full_sources);
    Ok(())
}

fn run_hierarchy(cli: &Cli, rp: &std::path::Path, repo_root: &std::path::Path) -> Result<()> {
    let mut merger = HierarchyMerger::new(rp.to_path_buf(), repo_root.to_path_buf());
    let (merged, mut derived, labels) = merger.merge()?;
    tgrender::hierarchy::add_resource_name(&mut derived, rp);

    let mut sources: HashMap<String, String> = HashMap::new();
    if cli.show_sources && !cli.show_labels {
        for (k, v) in &merger.sources {
            let rel = PathBuf::from(v).strip_prefix(repo_root).map(|p| p.to_string_lossy().to_string()).unwrap_or_else(|_| v.clone());
            sources.insert(k.clone(), rel);
        }
    }

    let entries: Vec<(String, Value)> = if cli.show_labels {
        vec![("standard_labels".to_string(), labels)]
    } else if !cli.keys.is_empty() {
        let all_data = flat_union(&merged, &derived);
        let mut filtered = Vec::new();
        for key in &cli.keys {
            if let Some(v) = all_data.map_get(key) {
                filtered.push((key.clone(), v.clone()));
            } else if key == "standard_labels" {
                filtered.push((key.clone(), labels.clone()));
            }
        }
        if !sources.is_empty() {
            sources.retain(|k, _| cli.keys.contains(k));
        }
        filtered
    } else {
        vec![
            ("merged".to_string(), merged),
            ("derived".to_string(), derived),
            ("standard_labels".to_string(), labels),
        ]
    };

    emit(cli, entries, sources);
    Ok(())
}

fn unresolved_list(items: &[String]) -> Value {
    Value::List(items.iter().cloned().map(Value::String).collect())
}

/// `{**merged, **derived}` — flat top-level union, `derived` winning on key
/// collision; neither side is merged recursively.
fn flat_union(merged: &Value, derived: &Value) -> Value {
    let mut result: Vec<(String, Value)> = merged.as_map().map(|m| m.to_vec()).unwrap_or_default();
    for (k, v) in derived.as_map().unwrap_or(&[]) {
        match result.iter_mut().find(|(rk, _)| rk == k) {
            Some(entry) => entry.1 = v.clone(),
            None => result.push((k.clone(), v.clone())),
        }
    }
    Value::Map(result)
}

fn sources_to_value(sources: &HashMap<String, String>) -> Value {
    let mut keys: Vec<&String> = sources.keys().collect();
    keys.sort();
    Value::Map(keys.into_iter().map(|k| (k.clone(), Value::String(sources[k].clone()))).collect())
}

/// Shared rendering tail for both modes: table format pops `sources` out and
/// passes it alongside the data (per-column), JSON/YAML embed it as a
/// trailing `sources` key when non-empty and requested.
fn emit(cli: &Cli, mut entries: Vec<(String, Value)>, sources: HashMap<String, String>) {
    match cli.format {
        OutputFormat::Table => {
            let data = Value::Map(entries);
            let sources_ref = if cli.show_sources && !sources.is_empty() { Some(&sources) } else { None };
            println!("{}", output::as_table(&data, sources_ref));
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            if cli.show_sources && !sources.is_empty() {
                entries.push(("sources".to_string(), sources_to_value(&sources)));
            }
            let data = Value::Map(entries);
            match cli.format {
                OutputFormat::Json => println!("{}", output::as_json(&data)),
                OutputFormat::Yaml => println!("{}", output::as_yaml(&data)),
                OutputFormat::Table => unreachable!(),
            }
        }
    }
}
