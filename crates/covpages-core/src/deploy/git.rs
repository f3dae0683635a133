//! [`GitOperations`] over the `git` binary.
//!
//! Locks and backups live in custom ref namespaces on the remote so they need
//! nothing beyond push access:
//!
//! - `refs/coverage-locks/<name>`: advisory lock, commit message carries the expiry
//! - `refs/coverage-backups/<branch>-<timestamp>`: snapshot of the publishing branch,
//!   only the newest [`DEFAULT_BACKUP_RETENTION`] per branch are kept

use crate::cancel::CancellationToken;
use crate::deploy::path::sanitize;
use crate::deploy::traits::GitOperations;
use crate::error::{CovpagesError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const LOCK_REF_PREFIX: &str = "refs/coverage-locks/";
const BACKUP_REF_PREFIX: &str = "refs/coverage-backups/";
const EXPIRES_PREFIX: &str = "expires=";
const DEFAULT_PAGES_BRANCH: &str = "gh-pages";
pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// Git CLI wrapper bound to one remote and one publishing branch.
#[derive(Debug, Clone)]
pub struct GitCli {
    remote_url: String,
    token: Option<String>,
    branch: String,
    author_name: String,
    author_email: String,
    backup_retention: usize,
}

impl GitCli {
    /// `remote_url` may be any URL or path git accepts.
    pub fn new(remote_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            token: None,
            branch: branch.into(),
            author_name: "github-actions[bot]".to_string(),
            author_email: "41898282+github-actions[bot]@users.noreply.github.com".to_string(),
            backup_retention: DEFAULT_BACKUP_RETENTION,
        }
    }

    /// `gh-pages` of `owner/repo` on github.com, authenticated with `token`.
    pub fn for_github(repository: &str, token: Option<String>) -> Self {
        let mut git = Self::new(
            format!("https://github.com/{}.git", repository),
            DEFAULT_PAGES_BRANCH,
        );
        git.token = token.filter(|t| !t.is_empty());
        git
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    /// Number of backup refs kept per branch. At least one is always kept.
    pub fn with_backup_retention(mut self, keep: usize) -> Self {
        self.backup_retention = keep.max(1);
        self
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn authenticated_url(&self) -> String {
        match (&self.token, self.remote_url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://x-access-token:{}@{}", token, rest),
            _ => self.remote_url.clone(),
        }
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    async fn run(&self, cancel: &CancellationToken, dir: &Path, args: &[&str]) -> Result<String> {
        cancel.check()?;
        let command = args.first().copied().unwrap_or("git").to_string();
        debug!(dir = %dir.display(), "git {}", self.redact(&args.join(" ")));

        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg(format!("user.name={}", self.author_name))
            .arg("-c")
            .arg(format!("user.email={}", self.author_email))
            .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| CovpagesError::Git {
                command: command.clone(),
                message: format!("failed to run git: {}", e),
            })?,
            _ = cancel.cancelled() => return Err(CovpagesError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(CovpagesError::Git {
                command,
                message: self.redact(message.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Empty repository in `dir` with `origin` configured.
    async fn init_repo(&self, cancel: &CancellationToken, dir: &Path) -> Result<()> {
        self.run(cancel, dir, &["init", "-q"]).await?;
        let url = self.authenticated_url();
        self.run(cancel, dir, &["remote", "add", "origin", &url]).await?;
        Ok(())
    }

    async fn remote_ref_exists(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        refname: &str,
    ) -> Result<bool> {
        let out = self.run(cancel, dir, &["ls-remote", "origin", refname]).await?;
        Ok(!out.is_empty())
    }

    /// Backup refs of this branch on the remote, oldest first.
    async fn backup_refs(&self, cancel: &CancellationToken, dir: &Path) -> Result<Vec<String>> {
        let pattern = format!("{}{}-*", BACKUP_REF_PREFIX, sanitize(&self.branch));
        let out = self
            .run(cancel, dir, &["ls-remote", "--refs", "origin", &pattern])
            .await?;
        let mut refs: Vec<String> = out
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(str::to_string)
            .collect();
        // Timestamps are fixed width, so name order is age order.
        refs.sort();
        Ok(refs)
    }

    /// Delete all but the newest `backup_retention` backup refs. Failures
    /// leave refs behind and are only logged.
    async fn prune_backups(&self, cancel: &CancellationToken, dir: &Path) {
        let refs = match self.backup_refs(cancel, dir).await {
            Ok(refs) => refs,
            Err(e) => {
                warn!(error = %e, "Failed to list backup refs");
                return;
            }
        };
        let excess = refs.len().saturating_sub(self.backup_retention);
        for stale in &refs[..excess] {
            match self
                .run(cancel, dir, &["push", "-q", "origin", "--delete", stale])
                .await
            {
                Ok(_) => debug!(backup_ref = %stale, "Pruned old backup"),
                Err(e) => warn!(backup_ref = %stale, error = %e, "Failed to prune old backup"),
            }
        }
    }

    async fn push_lock(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        refname: &str,
        expected: &str,
    ) -> Result<()> {
        let lease = format!("--force-with-lease={}:{}", refname, expected);
        let spec = format!("HEAD:{}", refname);
        self.run(cancel, dir, &["push", "-q", &lease, "origin", &spec])
            .await
            .map(|_| ())
    }
}

fn scratch_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("covpages-git-")
        .tempdir()
        .map_err(|e| CovpagesError::Io {
            message: format!("Failed to create scratch directory: {}", e),
            path: None,
            source: Some(e),
        })
}

fn parse_expiry(message: &str) -> Option<DateTime<Utc>> {
    message
        .lines()
        .find_map(|line| line.trim().strip_prefix(EXPIRES_PREFIX))
        .and_then(|ts| DateTime::parse_from_rfc3339(ts.trim()).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

#[async_trait]
impl GitOperations for GitCli {
    async fn clone_or_create_branch(&self, cancel: &CancellationToken, dir: &Path) -> Result<()> {
        self.init_repo(cancel, dir).await?;

        if self.remote_ref_exists(cancel, dir, &self.branch_ref()).await? {
            self.run(cancel, dir, &["fetch", "-q", "--depth", "1", "origin", &self.branch])
                .await?;
            self.run(cancel, dir, &["checkout", "-q", "-B", &self.branch, "FETCH_HEAD"])
                .await?;
            debug!(branch = %self.branch, "Checked out publishing branch");
        } else {
            self.run(cancel, dir, &["checkout", "-q", "--orphan", &self.branch])
                .await?;
            tokio::fs::write(dir.join(".nojekyll"), b"")
                .await
                .map_err(|e| CovpagesError::io_with_path(e, dir.join(".nojekyll")))?;
            info!(branch = %self.branch, "Created publishing branch");
        }
        Ok(())
    }

    async fn commit_changes(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        message: &str,
    ) -> Result<String> {
        self.run(cancel, dir, &["add", "-A"]).await?;
        self.run(cancel, dir, &["commit", "-q", "--allow-empty", "-m", message])
            .await?;
        self.run(cancel, dir, &["rev-parse", "HEAD"]).await
    }

    async fn push_changes(&self, cancel: &CancellationToken, dir: &Path, force: bool) -> Result<()> {
        let spec = format!("HEAD:{}", self.branch_ref());
        let mut args = vec!["push", "-q"];
        if force {
            args.push("--force");
        }
        args.extend(["origin", spec.as_str()]);
        self.run(cancel, dir, &args).await?;
        info!(branch = %self.branch, force, "Pushed publishing branch");
        Ok(())
    }

    async fn acquire_lock(&self, cancel: &CancellationToken, name: &str, ttl: Duration) -> Result<()> {
        let scratch = scratch_dir()?;
        let dir = scratch.path();
        self.init_repo(cancel, dir).await?;

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let expires = Utc::now() + ttl;
        let message = format!("coverage lock {}\n\n{}{}", name, EXPIRES_PREFIX, expires.to_rfc3339());
        self.run(cancel, dir, &["commit", "-q", "--allow-empty", "-m", &message])
            .await?;

        let refname = format!("{}{}", LOCK_REF_PREFIX, name);
        let contended = match self.push_lock(cancel, dir, &refname, "").await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // Someone holds it; take over only if their lease has run out.
        if self.run(cancel, dir, &["fetch", "-q", "origin", &refname]).await.is_err() {
            return Err(contended);
        }
        let holder = self.run(cancel, dir, &["rev-parse", "FETCH_HEAD"]).await?;
        let body = self
            .run(cancel, dir, &["log", "-1", "--format=%B", "FETCH_HEAD"])
            .await?;

        match parse_expiry(&body) {
            Some(expiry) if expiry <= Utc::now() => {
                self.push_lock(cancel, dir, &refname, &holder).await?;
                warn!(lock = name, expired = %expiry, "Took over expired deployment lock");
                Ok(())
            }
            Some(expiry) => Err(CovpagesError::Git {
                command: "lock".to_string(),
                message: format!("lock {} is held until {}", name, expiry.to_rfc3339()),
            }),
            None => Err(contended),
        }
    }

    async fn release_lock(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        let scratch = scratch_dir()?;
        self.init_repo(cancel, scratch.path()).await?;
        let refname = format!("{}{}", LOCK_REF_PREFIX, name);
        self.run(cancel, scratch.path(), &["push", "-q", "origin", "--delete", &refname])
            .await?;
        Ok(())
    }

    async fn create_backup(&self, cancel: &CancellationToken, dir: &Path) -> Result<String> {
        self.init_repo(cancel, dir).await?;
        if !self.remote_ref_exists(cancel, dir, &self.branch_ref()).await? {
            return Ok(String::new());
        }

        self.run(cancel, dir, &["fetch", "-q", "--depth", "1", "origin", &self.branch])
            .await?;
        let sha = self.run(cancel, dir, &["rev-parse", "FETCH_HEAD"]).await?;
        let backup_ref = format!(
            "{}{}-{}",
            BACKUP_REF_PREFIX,
            sanitize(&self.branch),
            Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let spec = format!("{}:{}", sha, backup_ref);
        self.run(cancel, dir, &["push", "-q", "origin", &spec]).await?;
        self.prune_backups(cancel, dir).await;
        Ok(backup_ref)
    }

    async fn rollback(&self, cancel: &CancellationToken, dir: &Path, backup_ref: &str) -> Result<()> {
        self.run(cancel, dir, &["fetch", "-q", "origin", backup_ref]).await?;
        self.run(cancel, dir, &["reset", "-q", "--hard", "FETCH_HEAD"]).await?;
        self.push_changes(cancel, dir, true).await?;

        if let Err(e) = self
            .run(cancel, dir, &["push", "-q", "origin", "--delete", backup_ref])
            .await
        {
            warn!(backup_ref, error = %e, "Failed to delete consumed backup ref");
        }
        Ok(())
    }
}
