//! Transactional publish of coverage artifacts to the hosting branch.
//!
//! A deployment runs under an advisory lock and after a best-effort backup:
//!
//! 1. lock `<repo>-<branch>`
//! 2. back up the current remote branch state
//! 3. materialize the branch into a fresh temp directory
//! 4. remove source/build leftovers
//! 5. place the coverage files (and mirror report + badge to the root)
//! 6. regenerate the navigation index
//! 7. commit
//! 8. push, unless dry run
//!
//! Any failure in steps 3-8 aborts the call. The lock is always released.

use crate::cancel::CancellationToken;
use crate::config::{DeployConfig, DeploymentManagerConfig, PathConfig};
use crate::deploy::path::{sanitize, DeploymentPath, PathType};
use crate::deploy::traits::{DynCleanupEngine, DynGitOperations, DynHtmlGenerator};
use crate::deploy::types::{DeploymentOptions, DeploymentResult};
use crate::error::{CovpagesError, Result};
use crate::resilience::catch_panic;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Orchestrates deployments through injected git, cleanup and HTML
/// collaborators. Holds no state between calls.
pub struct DeploymentManager {
    config: DeploymentManagerConfig,
    path_config: PathConfig,
    git: DynGitOperations,
    cleanup: DynCleanupEngine,
    html: DynHtmlGenerator,
    http: reqwest::Client,
}

impl DeploymentManager {
    pub fn new(
        config: DeploymentManagerConfig,
        git: DynGitOperations,
        cleanup: DynCleanupEngine,
        html: DynHtmlGenerator,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(DeployConfig::USER_AGENT)
            .build()
            .map_err(|e| CovpagesError::Network {
                message: format!("Failed to create verification client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            config,
            path_config: PathConfig::default(),
            git,
            cleanup,
            html,
            http,
        })
    }

    pub fn with_path_config(mut self, path_config: PathConfig) -> Self {
        self.path_config = path_config;
        self
    }

    pub fn config(&self) -> &DeploymentManagerConfig {
        &self.config
    }

    pub fn path_config(&self) -> &PathConfig {
        &self.path_config
    }

    /// Publish `options.coverage_files`.
    pub async fn deploy(
        &self,
        cancel: &CancellationToken,
        options: &DeploymentOptions,
    ) -> Result<DeploymentResult> {
        cancel.check()?;
        let started = Instant::now();
        let target = options.resolve_target(&self.path_config);
        let lock = lock_name(&options.repository, &options.branch);

        info!(
            repository = %options.repository,
            branch = %options.branch,
            target = %target,
            files = options.coverage_files.len(),
            dry_run = options.dry_run,
            "Starting deployment"
        );

        self.git
            .acquire_lock(cancel, &lock, self.config.effective_lock_ttl())
            .await
            .map_err(|e| CovpagesError::LockFailed {
                name: lock.clone(),
                source: Box::new(e),
            })?;
        debug!(lock = %lock, "Acquired deployment lock");

        let mut warnings = Vec::new();
        let outcome = catch_panic(self.deploy_locked(cancel, options, &target, &mut warnings)).await;

        // Released even when the caller has cancelled.
        if let Err(e) = self.git.release_lock(&CancellationToken::new(), &lock).await {
            warn!(lock = %lock, error = %e, "Failed to release deployment lock");
            warnings.push(format!("failed to release lock {}: {}", lock, e));
        }

        let mut result = outcome?;
        result.deployment_time = started.elapsed();
        result.warnings = warnings;

        info!(
            commit = %result.commit_sha,
            url = %result.deployment_url,
            deployed = result.files_deployed,
            removed = result.files_removed,
            elapsed_ms = result.deployment_time.as_millis() as u64,
            "Deployment complete"
        );
        Ok(result)
    }

    async fn deploy_locked(
        &self,
        cancel: &CancellationToken,
        options: &DeploymentOptions,
        target: &DeploymentPath,
        warnings: &mut Vec<String>,
    ) -> Result<DeploymentResult> {
        // Backups are pushed to the remote, so a dry run never takes one.
        let backup_ref = if options.dry_run {
            None
        } else {
            self.backup(cancel, warnings).await
        };

        cancel.check()?;
        let work_dir = temp_dir("covpages-deploy-").map_err(|e| CovpagesError::step("materialize", e))?;
        let dir = work_dir.path();
        self.git
            .clone_or_create_branch(cancel, dir)
            .await
            .map_err(|e| CovpagesError::step("materialize", e))?;

        cancel.check()?;
        let mut remove = self.config.remove_patterns.clone();
        remove.extend(options.cleanup_patterns.iter().cloned());
        let files_removed = self
            .cleanup
            .cleanup_files(dir, &remove, &self.config.preserve_patterns)
            .map_err(|e| CovpagesError::step("cleanup", e))?;
        debug!(removed = files_removed, "Cleaned publishing branch");

        cancel.check()?;
        let files_deployed = self
            .place_files(dir, options, target)
            .map_err(|e| CovpagesError::step("place_files", e))?;

        let reports = self
            .html
            .discover_reports(dir)
            .map_err(|e| CovpagesError::step("navigation", e))?;
        self.html
            .generate_index_html(dir, &reports)
            .map_err(|e| CovpagesError::step("navigation", e))?;
        debug!(reports = reports.len(), "Regenerated navigation index");

        cancel.check()?;
        let message = commit_message(target, options);
        let commit_sha = self
            .git
            .commit_changes(cancel, dir, &message)
            .await
            .map_err(|e| CovpagesError::step("commit", e))?;

        if options.dry_run {
            info!(commit = %commit_sha, "Dry run, skipping push");
        } else {
            cancel.check()?;
            self.git
                .push_changes(cancel, dir, options.force)
                .await
                .map_err(|e| CovpagesError::step("push", e))?;
        }

        let (deployment_url, additional_urls) = self.urls(target);
        if deployment_url.is_empty() {
            warnings.push("pages URL not configured, deployment URLs unavailable".to_string());
        }

        Ok(DeploymentResult {
            commit_sha,
            deployment_url,
            additional_urls,
            target_path: target.clone(),
            files_deployed,
            files_removed,
            deployment_time: Duration::ZERO,
            deployed_at: Utc::now(),
            backup_ref,
            dry_run: options.dry_run,
            warnings: Vec::new(),
        })
    }

    /// Best-effort snapshot. `None` means rollback is unavailable for this run.
    async fn backup(&self, cancel: &CancellationToken, warnings: &mut Vec<String>) -> Option<String> {
        let backup_dir = match temp_dir("covpages-backup-") {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Backup skipped");
                warnings.push(format!("backup skipped: {}", e));
                return None;
            }
        };

        match self.git.create_backup(cancel, backup_dir.path()).await {
            Ok(backup_ref) if backup_ref.is_empty() => {
                debug!("Publishing branch does not exist yet, nothing to back up");
                None
            }
            Ok(backup_ref) => {
                info!(backup_ref = %backup_ref, "Created backup");
                Some(backup_ref)
            }
            Err(e) => {
                warn!(error = %e, "Backup failed, rollback unavailable for this deployment");
                warnings.push(format!("backup failed: {}", e));
                None
            }
        }
    }

    fn place_files(
        &self,
        dir: &Path,
        options: &DeploymentOptions,
        target: &DeploymentPath,
    ) -> Result<usize> {
        let base = target.relative_dir();
        for (name, content) in &options.coverage_files {
            let rel = safe_relative(name)?;
            self.html.generate_report_html(dir, &base.join(&rel), content)?;

            // Stable "latest" URLs at the branch root.
            if !target.is_root() && (name == DeployConfig::REPORT_FILE || name == DeployConfig::BADGE_FILE) {
                self.html.generate_report_html(dir, &rel, content)?;
            }
        }
        Ok(options.coverage_files.len())
    }

    fn urls(&self, target: &DeploymentPath) -> (String, Vec<String>) {
        let base = self.config.pages_url.trim_end_matches('/');
        if base.is_empty() {
            return (String::new(), Vec::new());
        }

        let prefix = if target.is_root() {
            base.to_string()
        } else {
            format!("{}/{}", base, target)
        };
        (
            format!("{}/{}", prefix, DeployConfig::REPORT_FILE),
            vec![
                format!("{}/{}", prefix, DeployConfig::BADGE_FILE),
                format!("{}/{}", base, DeployConfig::INDEX_FILE),
            ],
        )
    }

    /// Check that every deployed URL answers 200.
    ///
    /// Waits the configured propagation delay first. The whole check is
    /// bounded by `options.verification_timeout`; each request by the
    /// manager's client timeout. Dry runs are not verified.
    pub async fn verify(
        &self,
        cancel: &CancellationToken,
        options: &DeploymentOptions,
        result: &DeploymentResult,
    ) -> Result<()> {
        if options.dry_run || result.dry_run {
            debug!("Dry run, skipping verification");
            return Ok(());
        }

        let urls = result.all_urls();
        info!(
            urls = urls.len(),
            delay_ms = self.config.propagation_delay.as_millis() as u64,
            "Waiting for pages propagation"
        );
        cancel.sleep(self.config.propagation_delay).await?;

        let timeout = options.verification_timeout;
        tokio::select! {
            checked = tokio::time::timeout(timeout, self.check_urls(&urls)) => {
                checked.map_err(|_| CovpagesError::Timeout(timeout))?
            }
            _ = cancel.cancelled() => Err(CovpagesError::Cancelled),
        }
    }

    async fn check_urls(&self, urls: &[String]) -> Result<()> {
        for url in urls {
            let response = self.http.head(url).send().await.map_err(|e| CovpagesError::Network {
                message: format!("HEAD {} failed: {}", url, e),
                source: Some(e),
            })?;
            let status = response.status().as_u16();
            if status != 200 {
                return Err(CovpagesError::VerificationFailed {
                    url: url.clone(),
                    status,
                });
            }
            debug!(url = %url, "Verified");
        }
        info!(urls = urls.len(), "Deployment verified");
        Ok(())
    }

    /// Restore the publishing branch to `backup_ref`.
    pub async fn rollback(&self, cancel: &CancellationToken, backup_ref: &str) -> Result<()> {
        let backup_ref = backup_ref.trim();
        if backup_ref.is_empty() {
            return Err(CovpagesError::NoBackupForRollback);
        }
        cancel.check()?;

        warn!(backup_ref = %backup_ref, "Rolling back deployment");
        let work_dir = temp_dir("covpages-rollback-").map_err(|e| CovpagesError::step("rollback", e))?;
        self.git
            .clone_or_create_branch(cancel, work_dir.path())
            .await
            .map_err(|e| CovpagesError::step("rollback", e))?;
        self.git
            .rollback(cancel, work_dir.path(), backup_ref)
            .await
            .map_err(|e| CovpagesError::step("rollback", e))?;

        info!(backup_ref = %backup_ref, "Rollback complete");
        Ok(())
    }
}

/// Advisory lock name for a repository branch.
pub fn lock_name(repository: &str, branch: &str) -> String {
    sanitize(&format!("{}-{}", repository, branch))
}

fn commit_message(target: &DeploymentPath, options: &DeploymentOptions) -> String {
    let sha = options.short_sha();
    match target.path_type {
        PathType::Root | PathType::Main => {
            format!("Deploy coverage for {} ({})", options.branch, sha)
        }
        PathType::Branch => format!("Deploy coverage for branch {} ({})", target.identifier, sha),
        PathType::Pr => format!("Deploy coverage for PR #{} ({})", target.identifier, sha),
    }
}

fn temp_dir(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| CovpagesError::Io {
            message: format!("Failed to create temp directory: {}", e),
            path: None,
            source: Some(e),
        })
}

/// Reject names that would escape the target directory.
fn safe_relative(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path.to_path_buf())
    } else {
        Err(CovpagesError::Config {
            message: format!("invalid coverage file name: {:?}", name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name() {
        assert_eq!(lock_name("owner/repo", "main"), "owner-repo-main");
        assert_eq!(lock_name("owner/repo", "feature/x y"), "owner-repo-feature-x-y");
    }

    #[test]
    fn test_commit_messages() {
        let options = DeploymentOptions::new("o/r", "main", "0123456789abcdef");
        assert_eq!(
            commit_message(&DeploymentPath::root(), &options),
            "Deploy coverage for main (0123456)"
        );
        assert_eq!(
            commit_message(&DeploymentPath::branch("feature/x"), &options),
            "Deploy coverage for branch feature-x (0123456)"
        );
        assert_eq!(
            commit_message(&DeploymentPath::pull_request("42"), &options),
            "Deploy coverage for PR #42 (0123456)"
        );
    }

    #[test]
    fn test_safe_relative() {
        assert!(safe_relative("coverage.html").is_ok());
        assert!(safe_relative("assets/style.css").is_ok());
        assert!(safe_relative("../escape.html").is_err());
        assert!(safe_relative("/etc/passwd").is_err());
        assert!(safe_relative("").is_err());
    }
}
