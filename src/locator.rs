//! C1 — repo root discovery and hierarchy-file location (SPEC_FULL §4.1).

use std::path::{Path, PathBuf};

use crate::error::RenderError;

/// The fixed, ordered hierarchy file kinds, outermost to closest to the
/// resource. `account` and `common` are required; the rest are optional.
pub const HIERARCHY_FILES: [(&str, bool); 4] = [
    ("account.hcl", true),
    ("env.hcl", false),
    ("project.hcl", false),
    ("region.hcl", false),
];

/// Walk upward from `start` until a directory containing `root.hcl` or
/// `_common/base.hcl` is found. That directory is the repo root.
pub fn find_repo_root(start: &Path) -> Result<PathBuf, RenderError> {
    let mut current = if start.is_dir() {
        start.to_path_buf()
    } else {
        start
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| start.to_path_buf())
    };
    loop {
        if current.join("root.hcl").is_file() || current.join("_common/base.hcl").is_file() {
            return Ok(current);
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => break,
        }
    }
    Err(RenderError::RepoNotFound(start.to_path_buf()))
}

/// Mimics Terragrunt's `find_in_parent_folders`: ascend from `resource_path`
/// to `repo_root` (inclusive) looking for the first ancestor containing
/// `filename`.
pub fn find_in_parent_folders(resource_path: &Path, repo_root: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = resource_path.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if current == repo_root {
            break;
        }
        match current.parent() {
            Some(parent) if parent.starts_with(repo_root) || parent == repo_root => {
                current = parent.to_path_buf();
            }
            _ => break,
        }
    }
    None
}

/// Lexically normalize a path (resolve `.`/`..` components) without
/// requiring the path to exist, unlike `Path::canonicalize`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// An ordered listing of every hierarchy file's resolved path (or `None`
/// for an absent optional file), keyed by filename, plus the fixed
/// `common.hcl` entry.
pub struct HclFileLocator {
    resource_path: PathBuf,
    repo_root: PathBuf,
}

impl HclFileLocator {
    pub fn new(resource_path: PathBuf, repo_root: PathBuf) -> Self {
        Self { resource_path, repo_root }
    }

    /// Returns filename -> resolved path, in hierarchy order, plus
    /// `common.hcl` pinned at `<repo_root>/_common/common.hcl`.
    pub fn locate_all(&self) -> Result<Vec<(String, Option<PathBuf>)>, RenderError> {
        let mut result = Vec::with_capacity(HIERARCHY_FILES.len() + 1);
        for (filename, required) in HIERARCHY_FILES {
            let path = find_in_parent_folders(&self.resource_path, &self.repo_root, filename);
            if path.is_none() && required {
                return Err(RenderError::MissingHierarchyFile {
                    file: filename.to_string(),
                    resource: self.resource_path.clone(),
                });
            }
            result.push((filename.to_string(), path));
        }

        let common_path = self.repo_root.join("_common").join("common.hcl");
        if !common_path.is_file() {
            return Err(RenderError::MissingCommonFile(common_path));
        }
        result.push(("common.hcl".to_string(), Some(common_path)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("root.hcl"), "").unwrap();
        fs::create_dir_all(root.join("_common")).unwrap();
        fs::write(root.join("_common/common.hcl"), "locals {}\n").unwrap();
        let resource = root.join("live/account/env/project/region/module");
        fs::create_dir_all(&resource).unwrap();
        (dir, root, resource)
    }

    #[test]
    fn finds_repo_root_from_nested_resource() {
        let (_dir, root, resource) = setup_repo();
        assert_eq!(find_repo_root(&resource).unwrap(), root);
    }

    #[test]
    fn errors_when_no_sentinel_exists() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        assert!(find_repo_root(&nested).is_err());
    }

    #[test]
    fn locates_nearest_ancestor_file() {
        let (_dir, root, resource) = setup_repo();
        fs::write(root.join("account.hcl"), "locals { org_id = \"111\" }\n").unwrap();
        fs::write(
            root.join("live/account/env.hcl"),
            "locals { env = \"dev\" }\n",
        )
        .unwrap();

        let locator = HclFileLocator::new(resource.clone(), root.clone());
        let files = locator.locate_all().unwrap();
        let account = files.iter().find(|(n, _)| n == "account.hcl").unwrap();
        assert_eq!(account.1.as_ref().unwrap(), &root.join("account.hcl"));
        let env = files.iter().find(|(n, _)| n == "env.hcl").unwrap();
        assert_eq!(env.1.as_ref().unwrap(), &root.join("live/account/env.hcl"));
        let project = files.iter().find(|(n, _)| n == "project.hcl").unwrap();
        assert!(project.1.is_none());
    }

    #[test]
    fn missing_required_file_errors() {
        let (_dir, root, resource) = setup_repo();
        let locator = HclFileLocator::new(resource, root);
        let err = locator.locate_all().unwrap_err();
        assert!(matches!(err, RenderError::MissingHierarchyFile { .. }));
    }
}
