//! Integration tests for the deployment transaction.

mod common;

use common::{manager_with, test_config, MockGit, COMMIT_SHA};
use covpages_core::cancel::CancellationToken;
use covpages_core::config::PathConfig;
use covpages_core::deploy::{build_deployment_path, DeploymentOptions, DeploymentPath, PathType};
use covpages_core::error::CovpagesError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn options(branch: &str) -> DeploymentOptions {
    DeploymentOptions::new("owner/repo", branch, "abcdef0123456789")
        .with_file("coverage.html", "<html>report</html>")
        .with_file("coverage.svg", "<svg/>")
}

#[tokio::test]
async fn test_dry_run_never_pushes_but_computes_urls() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    let result = manager
        .deploy(&CancellationToken::new(), &options("main").with_dry_run(true))
        .await
        .unwrap();

    assert!(!git.called("push_changes"));
    assert!(!git.called("push_changes_force"));
    assert_eq!(
        git.calls(),
        vec![
            "acquire_lock",
            "clone_or_create_branch",
            "commit_changes",
            "release_lock"
        ]
    );
    assert!(!git.called("create_backup"));

    assert!(result.dry_run);
    assert_eq!(result.commit_sha, COMMIT_SHA);
    assert_eq!(result.deployment_url, "https://owner.github.io/repo/coverage.html");
    assert_eq!(
        result.additional_urls,
        vec![
            "https://owner.github.io/repo/coverage.svg",
            "https://owner.github.io/repo/index.html"
        ]
    );
    assert_eq!(result.files_deployed, 2);
    assert!(result.backup_ref.is_none());
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_root_deploy_layout_and_commit_message() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap();

    assert!(git.called("push_changes"));
    assert!(git.called("create_backup"));
    assert_eq!(
        *git.committed_files.lock().unwrap(),
        vec!["coverage.html", "coverage.svg", "index.html"]
    );
    assert_eq!(
        *git.commit_messages.lock().unwrap(),
        vec!["Deploy coverage for main (abcdef0)"]
    );
}

#[tokio::test]
async fn test_branch_deploy_mirrors_latest_to_root() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    let result = manager
        .deploy(&CancellationToken::new(), &options("feature/login"))
        .await
        .unwrap();

    assert_eq!(result.target_path, DeploymentPath::branch("feature/login"));
    assert_eq!(
        result.deployment_url,
        "https://owner.github.io/repo/branch/feature-login/coverage.html"
    );
    assert_eq!(
        *git.committed_files.lock().unwrap(),
        vec![
            "branch/feature-login/coverage.html",
            "branch/feature-login/coverage.svg",
            "coverage.html",
            "coverage.svg",
            "index.html"
        ]
    );
    assert_eq!(
        *git.commit_messages.lock().unwrap(),
        vec!["Deploy coverage for branch feature-login (abcdef0)"]
    );
}

#[tokio::test]
async fn test_pr_deploy_uses_pr_path_and_force() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    let opts = options("refs/pull/42/merge")
        .with_event("pull_request", "42")
        .with_force(true);
    let result = manager.deploy(&CancellationToken::new(), &opts).await.unwrap();

    assert_eq!(result.target_path.path_type, PathType::Pr);
    assert_eq!(
        result.deployment_url,
        "https://owner.github.io/repo/pr/42/coverage.html"
    );
    assert!(git.called("push_changes_force"));
    assert_eq!(
        *git.commit_messages.lock().unwrap(),
        vec!["Deploy coverage for PR #42 (abcdef0)"]
    );
}

#[tokio::test]
async fn test_cleanup_removes_sources_and_keeps_published_reports() {
    let git = Arc::new(
        MockGit::new()
            .with_existing("main.go", "package main")
            .with_existing("src/lib.rs", "fn main() {}")
            .with_existing("pr/7/coverage.html", "old pr report")
            .with_existing(".nojekyll", ""),
    );
    let manager = manager_with(git.clone(), test_config());

    let result = manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap();

    assert_eq!(result.files_removed, 2);
    assert_eq!(
        *git.committed_files.lock().unwrap(),
        vec![
            ".nojekyll",
            "coverage.html",
            "coverage.svg",
            "index.html",
            "pr/7/coverage.html"
        ]
    );
}

#[tokio::test]
async fn test_extra_cleanup_patterns() {
    let git = Arc::new(MockGit::new().with_existing("notes.txt", "scratch"));
    let manager = manager_with(git.clone(), test_config());

    let opts = options("main").with_cleanup_patterns(vec!["*.txt".to_string()]);
    let result = manager.deploy(&CancellationToken::new(), &opts).await.unwrap();

    assert_eq!(result.files_removed, 1);
    assert!(!git.committed_files.lock().unwrap().contains(&"notes.txt".to_string()));
}

#[tokio::test]
async fn test_lock_failure_touches_nothing() {
    let git = Arc::new(MockGit::new().failing_on("acquire_lock"));
    let manager = manager_with(git.clone(), test_config());

    let err = manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap_err();

    assert!(matches!(err, CovpagesError::LockFailed { ref name, .. } if name == "owner-repo-main"));
    assert_eq!(git.calls(), vec!["acquire_lock"]);
}

#[tokio::test]
async fn test_backup_failure_is_a_warning() {
    let git = Arc::new(MockGit::new().failing_on("create_backup"));
    let manager = manager_with(git.clone(), test_config());

    let result = manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap();

    assert!(result.backup_ref.is_none());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("backup failed"));
    assert!(git.called("push_changes"));
}

#[tokio::test]
async fn test_push_failure_aborts_and_releases_lock() {
    let git = Arc::new(MockGit::new().failing_on("push_changes"));
    let manager = manager_with(git.clone(), test_config());

    let err = manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap_err();

    assert!(matches!(err, CovpagesError::DeploymentStep { step: "push", .. }));
    assert!(err.to_string().contains("simulated failure"));
    assert_eq!(git.calls().last().map(String::as_str), Some("release_lock"));
}

#[tokio::test]
async fn test_commit_failure_skips_push() {
    let git = Arc::new(MockGit::new().failing_on("commit_changes"));
    let manager = manager_with(git.clone(), test_config());

    let err = manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap_err();

    assert!(matches!(err, CovpagesError::DeploymentStep { step: "commit", .. }));
    assert!(!git.called("push_changes"));
    assert!(git.called("release_lock"));
}

#[tokio::test]
async fn test_release_failure_is_a_warning() {
    let git = Arc::new(MockGit::new().failing_on("release_lock"));
    let manager = manager_with(git.clone(), test_config());

    let result = manager
        .deploy(&CancellationToken::new(), &options("main"))
        .await
        .unwrap();

    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("failed to release lock owner-repo-main"));
}

#[tokio::test]
async fn test_invalid_file_name_aborts() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    let opts = DeploymentOptions::new("owner/repo", "main", "abc").with_file("../escape.html", "x");
    let err = manager.deploy(&CancellationToken::new(), &opts).await.unwrap_err();

    assert!(matches!(err, CovpagesError::DeploymentStep { step: "place_files", .. }));
    assert!(!git.called("commit_changes"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = manager.deploy(&cancel, &options("main")).await.unwrap_err();
    assert!(matches!(err, CovpagesError::Cancelled));
    assert!(git.calls().is_empty());
}

#[tokio::test]
async fn test_rollback_without_backup_ref() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    let err = manager
        .rollback(&CancellationToken::new(), "")
        .await
        .unwrap_err();

    assert!(matches!(err, CovpagesError::NoBackupForRollback));
    assert!(git.calls().is_empty());
}

#[tokio::test]
async fn test_rollback_restores_via_git() {
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git.clone(), test_config());

    manager
        .rollback(&CancellationToken::new(), "refs/coverage-backups/gh-pages-1")
        .await
        .unwrap();

    assert_eq!(git.calls(), vec!["clone_or_create_branch", "rollback"]);
}

#[test]
fn test_deployment_path_properties() {
    let config = PathConfig::default();

    let pr = build_deployment_path("pull_request", "anything", "42", &config);
    assert_eq!(pr, DeploymentPath::pull_request("42"));
    assert_eq!((pr.root.as_str(), pr.identifier.as_str()), ("pr", "42"));

    let root = build_deployment_path("push", "main", "", &config);
    assert_eq!(root.path_type, PathType::Root);

    let branch = build_deployment_path("push", "feature/x", "", &config);
    assert_eq!(branch.path_type, PathType::Branch);
    assert_eq!((branch.root.as_str(), branch.identifier.as_str()), ("branch", "feature-x"));
}

/// Minimal HTTP server answering every request with `status`.
async fn serve_status(status: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while read < buf.len() {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_verify_all_urls_ok() {
    let base = serve_status("200 OK").await;
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git, test_config().with_pages_url(base));

    let opts = options("feature/x");
    let result = manager.deploy(&CancellationToken::new(), &opts).await.unwrap();
    manager
        .verify(&CancellationToken::new(), &opts, &result)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_verify_fails_on_non_200() {
    let base = serve_status("404 Not Found").await;
    let git = Arc::new(MockGit::new());
    let manager = manager_with(git, test_config().with_pages_url(base.clone()));

    let opts = options("main");
    let result = manager.deploy(&CancellationToken::new(), &opts).await.unwrap();
    let err = manager
        .verify(&CancellationToken::new(), &opts, &result)
        .await
        .unwrap_err();

    match err {
        CovpagesError::VerificationFailed { url, status } => {
            assert_eq!(status, 404);
            assert_eq!(url, format!("{}/coverage.html", base));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_verify_skipped_for_dry_run() {
    let git = Arc::new(MockGit::new());
    // Unroutable pages URL: any request would fail.
    let manager = manager_with(git, test_config().with_pages_url("http://127.0.0.1:1"));

    let opts = options("main").with_dry_run(true);
    let result = manager.deploy(&CancellationToken::new(), &opts).await.unwrap();
    manager
        .verify(&CancellationToken::new(), &opts, &result)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_verify_cancelled_during_propagation_delay() {
    let git = Arc::new(MockGit::new());
    let config = test_config().with_propagation_delay(Duration::from_secs(30));
    let manager = manager_with(git, config);

    let opts = options("main");
    let result = manager.deploy(&CancellationToken::new(), &opts).await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = manager.verify(&cancel, &opts, &result).await.unwrap_err();
    assert!(matches!(err, CovpagesError::Cancelled));
}
