//! Integration tests for the hierarchy merger and locator against real
//! on-disk fixtures (SPEC_FULL §8, "Testable Properties"). These exercise
//! only the native parser path — no `hcl2json` binary required, so they
//! run unconditionally.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use tgrender::error::RenderError;
use tgrender::hierarchy::HierarchyMerger;
use tgrender::locator::find_repo_root;
use tgrender::value::Value;

/// Builds a throwaway repo with `root.hcl`, `_common/common.hcl`,
/// `account.hcl` and a `live/...` resource directory, returning
/// `(tempdir, repo_root, resource_path)`.
fn scaffold_repo() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    fs::write(root.join("root.hcl"), "").unwrap();
    fs::create_dir_all(root.join("_common")).unwrap();
    let resource = root.join("live/non-production/development/platform/dp-dev-01/europe-west2/gke/cluster-01");
    fs::create_dir_all(&resource).unwrap();
    (dir, root, resource)
}

/// S1 — flat merge: a key set by multiple hierarchy files takes the value
/// from the file latest in `[account, env, project, region, common]`, and
/// `sources` attributes it to that file.
#[test]
fn s1_flat_merge_later_file_wins_with_correct_source() {
    let (_dir, root, resource) = scaffold_repo();
    fs::write(root.join("account.hcl"), "locals {\n  org_id = \"111\"\n  env = \"dev\"\n}\n").unwrap();
    fs::write(root.join("_common/common.hcl"), "locals {\n  env = \"prod\"\n}\n").unwrap();

    let mut merger = HierarchyMerger::new(resource.clone(), root.clone());
    let (merged, _derived, _labels) = merger.merge().unwrap();

    assert_eq!(merged.map_get("env").unwrap(), &Value::String("prod".to_string()));
    assert_eq!(merged.map_get("org_id").unwrap(), &Value::String("111".to_string()));

    let env_source = merger.sources.get("env").unwrap();
    assert!(env_source.ends_with("common.hcl"));
}

/// Nearer-ancestor `env.hcl`/`region.hcl` files are picked up and still
/// lose to `common.hcl` at the end of the merge order.
#[test]
fn nearest_ancestor_optional_files_are_located_and_ordered() {
    let (_dir, root, resource) = scaffold_repo();
    fs::write(root.join("account.hcl"), "locals { region = \"us-east1\" }\n").unwrap();
    fs::write(root.join("live/non-production/env.hcl"), "locals { environment = \"dev\" }\n").unwrap();
    fs::write(root.join("_common/common.hcl"), "locals {}\n").unwrap();

    let mut merger = HierarchyMerger::new(resource, root);
    let (merged, derived, _labels) = merger.merge().unwrap();

    assert_eq!(merged.map_get("environment").unwrap(), &Value::String("dev".to_string()));
    assert_eq!(derived.map_get("region").unwrap(), &Value::String("us-east1".to_string()));
}

/// `account.hcl` is a required hierarchy file; its absence is reported as
/// `MissingHierarchyFile`, not silently skipped.
#[test]
fn missing_required_account_file_errors() {
    let (_dir, root, resource) = scaffold_repo();
    fs::write(root.join("_common/common.hcl"), "locals {}\n").unwrap();

    let mut merger = HierarchyMerger::new(resource, root);
    let err = merger.merge().unwrap_err();
    assert!(matches!(err, RenderError::MissingHierarchyFile { .. }));
}

/// `_common/common.hcl` is pinned at a fixed path and required independent
/// of the resource's ancestry.
#[test]
fn missing_common_file_errors() {
    let (_dir, root, resource) = scaffold_repo();
    fs::write(root.join("account.hcl"), "locals {}\n").unwrap();

    let mut merger = HierarchyMerger::new(resource, root);
    let err = merger.merge().unwrap_err();
    assert!(matches!(err, RenderError::MissingCommonFile(_)));
}

/// No `root.hcl` or `_common/base.hcl` anywhere up the tree — repo root
/// can't be located at all.
#[test]
fn repo_root_not_found_without_sentinel() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("some/deeply/nested/path");
    fs::create_dir_all(&nested).unwrap();

    let err = find_repo_root(&nested).unwrap_err();
    assert!(matches!(err, RenderError::RepoNotFound(_)));
}

/// Standard labels are seeded from derived environment facts and extended,
/// in order, by org/env/project labels found in the merged hierarchy.
#[test]
fn standard_labels_extended_in_order() {
    let (_dir, root, resource) = scaffold_repo();
    fs::write(
        root.join("account.hcl"),
        "locals {\n  environment = \"prod\"\n  org_labels = { team = \"platform\" }\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("_common/common.hcl"),
        "locals {\n  project_labels = { team = \"override-me\", cost_center = \"123\" }\n}\n",
    )
    .unwrap();

    let mut merger = HierarchyMerger::new(resource, root);
    let (_merged, _derived, labels) = merger.merge().unwrap();

    assert_eq!(labels.map_get("managed_by").unwrap(), &Value::String("terragrunt".to_string()));
    // project_labels (later in the extension order) overrides org_labels for the same key.
    assert_eq!(labels.map_get("team").unwrap(), &Value::String("override-me".to_string()));
    assert_eq!(labels.map_get("cost_center").unwrap(), &Value::String("123".to_string()));
}
