//! End-to-end checks of the `covpages` binary.

use std::process::Command;

fn covpages() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_covpages"));
    for var in [
        "GITHUB_REPOSITORY",
        "GITHUB_REF_NAME",
        "GITHUB_SHA",
        "GITHUB_EVENT_NAME",
        "PR_NUMBER",
        "MAIN_BRANCHES",
        "GITHUB_TOKEN",
        "PAGES_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn path_json(args: &[&str]) -> serde_json::Value {
    let output = covpages().arg("path").args(args).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_path_for_pull_request() {
    let value = path_json(&["--event", "pull_request", "--branch", "refs/pull/5/merge", "--pr-number", "5"]);
    assert_eq!(value["type"], "pr");
    assert_eq!(value["path"], "pr/5");
}

#[test]
fn test_path_for_feature_branch() {
    let value = path_json(&["--branch", "feature/x"]);
    assert_eq!(value["type"], "branch");
    assert_eq!(value["identifier"], "feature-x");
}

#[test]
fn test_path_from_environment() {
    let output = covpages()
        .arg("path")
        .env("GITHUB_REF_NAME", "trunk")
        .env("MAIN_BRANCHES", "trunk")
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["type"], "root");
    assert_eq!(value["path"], "");
}

#[test]
fn test_deploy_without_files_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    let output = covpages()
        .args(["deploy", "--repository", "owner/repo", "--coverage-dir"])
        .arg(temp.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no coverage files"));
}

#[test]
fn test_rollback_with_empty_ref_fails() {
    let output = covpages()
        .args(["rollback", "", "--repository", "owner/repo"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no backup reference"));
}
