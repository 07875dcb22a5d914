//! The closed error taxonomy surfaced at the CLI boundary (SPEC_FULL §7).
//!
//! Expression evaluation itself never raises one of these — unresolvable
//! expressions become unresolved markers instead (see `eval`). These
//! variants only cover the handful of ways the surrounding pipeline
//! (path resolution, file I/O, the external bridge) can fail outright.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("resource path is not a directory: {0}")]
    PathNotDirectory(PathBuf),

    #[error(
        "path must be inside the live/ hierarchy, e.g.:\n  live/non-production/development/platform/dp-dev-01/europe-west2/gke/cluster-01\n\nGot: {0}"
    )]
    PathOutsideLive(String),

    #[error("could not locate repository root (root.hcl or _common/base.hcl) from {0}")]
    RepoNotFound(PathBuf),

    #[error("required hierarchy file '{file}' not found between {resource} and repo root")]
    MissingHierarchyFile { file: String, resource: PathBuf },

    #[error("required file not found: {0}")]
    MissingCommonFile(PathBuf),

    #[error("no terragrunt.hcl found at {0}")]
    MissingResourceFile(PathBuf),

    #[error(
        "hcl2json not found on PATH.\nInstall: go install github.com/tmccombs/hcl2json@latest\n     or: download from https://github.com/tmccombs/hcl2json/releases"
    )]
    ToolUnavailable,

    #[error("hcl2json failed on {path}: {stderr}")]
    ToolFailed { path: PathBuf, stderr: String },

    #[error("failed to parse {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type RenderResult<T> = Result<T, RenderError>;
