//! Integration tests for fallback execution of real operations.

mod common;

use common::{manager_with, test_config, MockGit};
use covpages_core::cancel::CancellationToken;
use covpages_core::config::FallbackConfig;
use covpages_core::deploy::{DeployOperation, DeploymentOptions};
use covpages_core::error::CovpagesError;
use covpages_core::fallback::{
    keys, DeploymentStrategy, DeploymentStrategyConfig, FallbackManager, GitHubApiStrategy,
    GitHubStrategyConfig, Metadata, Operation, OperationType,
};
use covpages_core::resilience::{retry, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// GitHub read that always hits a rate limit.
struct RateLimitedRead {
    metadata: Metadata,
}

impl RateLimitedRead {
    fn new(cache_key: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(keys::CACHE_KEY.to_string(), serde_json::json!(cache_key));
        Self { metadata }
    }
}

#[async_trait::async_trait]
impl Operation for RateLimitedRead {
    fn operation_type(&self) -> OperationType {
        OperationType::GitHubApi
    }

    async fn execute(&self, _cancel: &CancellationToken) -> covpages_core::error::Result<()> {
        Err(CovpagesError::GitHubApi {
            message: "github secondary rate limit".into(),
            status_code: Some(429),
        })
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

fn fallback_manager(temp: &TempDir) -> FallbackManager {
    let manager = FallbackManager::new(FallbackConfig {
        retry_delay: Duration::from_millis(1),
        ..FallbackConfig::default()
    });
    manager
        .register_strategy(Arc::new(DeploymentStrategy::new(DeploymentStrategyConfig::new(
            temp.path().join("fallback"),
        ))))
        .unwrap();
    manager
        .register_strategy(Arc::new(GitHubApiStrategy::new(GitHubStrategyConfig::new(
            temp.path(),
        ))))
        .unwrap();
    manager
}

fn write_reports(temp: &TempDir) -> Vec<std::path::PathBuf> {
    let report = temp.path().join("coverage.html");
    let badge = temp.path().join("coverage.svg");
    std::fs::write(&report, "<html>report</html>").unwrap();
    std::fs::write(&badge, "<svg/>").unwrap();
    vec![report, badge]
}

#[tokio::test]
async fn test_successful_deploy_needs_no_fallback() {
    let temp = TempDir::new().unwrap();
    let git = Arc::new(MockGit::new());
    let deployer = Arc::new(manager_with(git.clone(), test_config()));
    let fallback = fallback_manager(&temp);

    let op = DeployOperation::from_files(
        deployer,
        DeploymentOptions::new("owner/repo", "main", "abcdef0123"),
        write_reports(&temp),
    )
    .await
    .unwrap();
    assert_eq!(op.options().coverage_files.len(), 2);

    fallback
        .execute_with_fallback(&CancellationToken::new(), &op)
        .await
        .unwrap();

    let result = op.last_result().expect("result recorded");
    assert_eq!(result.files_deployed, 2);
    assert_eq!(fallback.metrics().total_fallbacks, 0);
}

#[tokio::test]
async fn test_failed_push_is_staged_locally() {
    let temp = TempDir::new().unwrap();
    let git = Arc::new(MockGit::new().failing_on("push_changes"));
    let deployer = Arc::new(manager_with(git.clone(), test_config()));
    let fallback = fallback_manager(&temp);

    let op = DeployOperation::from_files(
        deployer,
        DeploymentOptions::new("owner/repo", "feature/x", "abcdef0123"),
        write_reports(&temp),
    )
    .await
    .unwrap();

    fallback
        .execute_with_fallback(&CancellationToken::new(), &op)
        .await
        .unwrap();

    assert!(op.last_result().is_none());
    let staged = temp.path().join("fallback/feature-x");
    assert!(staged.join("coverage.html").exists());
    assert!(staged.join("coverage.svg").exists());

    let metrics = fallback.metrics();
    assert_eq!(metrics.total_fallbacks, 1);
    assert_eq!(metrics.successful_fallbacks, 1);
    assert_eq!(metrics.strategies["deployment"].success_count, 1);
    assert!(!metrics.strategies.contains_key("github-api"));
    assert!(git.called("release_lock"));
}

#[tokio::test]
async fn test_deploy_failure_without_deployment_strategy() {
    let temp = TempDir::new().unwrap();
    let git = Arc::new(MockGit::new().failing_on("push_changes"));
    let deployer = Arc::new(manager_with(git.clone(), test_config()));

    // Only the GitHub strategy, which does not claim git push failures.
    let fallback = FallbackManager::new(FallbackConfig::default());
    fallback
        .register_strategy(Arc::new(GitHubApiStrategy::new(GitHubStrategyConfig::new(
            temp.path(),
        ))))
        .unwrap();

    let op = DeployOperation::from_files(
        deployer,
        DeploymentOptions::new("owner/repo", "main", "abc"),
        write_reports(&temp),
    )
    .await
    .unwrap();

    let err = fallback
        .execute_with_fallback(&CancellationToken::new(), &op)
        .await
        .unwrap_err();

    match &err {
        CovpagesError::NoFallbackAvailable {
            operation_type,
            source,
        } => {
            assert_eq!(operation_type, "deployment");
            assert!(matches!(**source, CovpagesError::DeploymentStep { step: "push", .. }));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(fallback.metrics().failed_fallbacks, 1);
}

#[tokio::test]
async fn test_skip_deployment_accepts_failure() {
    let temp = TempDir::new().unwrap();
    let git = Arc::new(MockGit::new().failing_on("push_changes"));
    let deployer = Arc::new(manager_with(git, test_config()));

    let fallback = FallbackManager::new(FallbackConfig::default());
    fallback
        .register_strategy(Arc::new(DeploymentStrategy::new(
            DeploymentStrategyConfig::new(temp.path()).skipping(),
        )))
        .unwrap();

    let op = DeployOperation::new(
        deployer,
        DeploymentOptions::new("owner/repo", "main", "abc").with_file("coverage.html", "x"),
    );
    fallback
        .execute_with_fallback(&CancellationToken::new(), &op)
        .await
        .unwrap();
    assert_eq!(fallback.metrics().successful_fallbacks, 1);
}

#[tokio::test]
async fn test_missing_source_files_fail_before_deploy() {
    let temp = TempDir::new().unwrap();
    let deployer = Arc::new(manager_with(Arc::new(MockGit::new()), test_config()));

    let result = DeployOperation::from_files(
        deployer,
        DeploymentOptions::new("owner/repo", "main", "abc"),
        vec![temp.path().join("missing.html")],
    )
    .await;
    assert!(matches!(result, Err(CovpagesError::Io { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_retry_and_breaker_around_flaky_dependency() {
    let breaker = CircuitBreaker::with_config(
        "github",
        CircuitBreakerConfig {
            max_failures: 10,
            reset_timeout: Duration::from_secs(60),
        },
    );
    let policy = RetryPolicy::github_api().with_jitter_fraction(0.0);
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let breaker_ref = &breaker;

    let value = retry(&CancellationToken::new(), &policy, move || async move {
        breaker_ref
            .call(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CovpagesError::Http {
                        status: 503,
                        url: "https://api.github.com".into(),
                    })
                } else {
                    Ok(n)
                }
            })
            .await
    })
    .await
    .unwrap();

    assert_eq!(value, 3);
    assert_eq!(breaker.stats().total_failures, 2);
}

#[tokio::test]
async fn test_api_read_is_not_swallowed_by_skipping_deployment_strategy() {
    let temp = TempDir::new().unwrap();
    let fallback = FallbackManager::new(FallbackConfig {
        retry_delay: Duration::from_millis(1),
        ..FallbackConfig::default()
    });
    fallback
        .register_strategy(Arc::new(GitHubApiStrategy::new(GitHubStrategyConfig::new(
            temp.path(),
        ))))
        .unwrap();
    fallback
        .register_strategy(Arc::new(DeploymentStrategy::new(
            DeploymentStrategyConfig::new(temp.path()).skipping(),
        )))
        .unwrap();

    let err = fallback
        .execute_with_fallback(&CancellationToken::new(), &RateLimitedRead::new("releases"))
        .await
        .unwrap_err();

    // Cache miss, and the deployment strategy does not claim GitHub errors.
    assert!(matches!(err, CovpagesError::AllFallbacksFailed { .. }));
    let metrics = fallback.metrics();
    assert_eq!(metrics.successful_fallbacks, 0);
    assert!(!metrics.strategies.contains_key("deployment"));
}
