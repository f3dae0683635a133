//! Collaborator interfaces the deployment manager delegates to.
//!
//! The manager owns sequencing and failure policy; git plumbing, file cleanup
//! and HTML output live behind these traits so each can be swapped or mocked.

use crate::cancel::CancellationToken;
use crate::deploy::path::PathType;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Git plumbing against the publishing branch.
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Check out the publishing branch into `dir`, creating it if absent.
    async fn clone_or_create_branch(&self, cancel: &CancellationToken, dir: &Path) -> Result<()>;

    /// Stage everything in `dir` and commit. Returns the new commit SHA.
    async fn commit_changes(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        message: &str,
    ) -> Result<String>;

    async fn push_changes(&self, cancel: &CancellationToken, dir: &Path, force: bool)
        -> Result<()>;

    /// Take the advisory lock `name`, held for at most `ttl`.
    async fn acquire_lock(&self, cancel: &CancellationToken, name: &str, ttl: Duration)
        -> Result<()>;

    async fn release_lock(&self, cancel: &CancellationToken, name: &str) -> Result<()>;

    /// Snapshot the current remote branch state. Returns an opaque reference.
    async fn create_backup(&self, cancel: &CancellationToken, dir: &Path) -> Result<String>;

    /// Restore the remote branch to `backup_ref`, using `dir` as scratch space.
    async fn rollback(&self, cancel: &CancellationToken, dir: &Path, backup_ref: &str)
        -> Result<()>;
}

/// Removes stale files from a checked-out publishing branch.
pub trait CleanupEngine: Send + Sync {
    /// Delete files under `dir` matching `remove` but not `preserve`.
    /// Returns the number of entries removed.
    fn cleanup_files(&self, dir: &Path, remove: &[String], preserve: &[String]) -> Result<usize>;
}

/// A previously published report found on the branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub kind: PathType,
    /// Display name: branch name, PR number, or `latest` for the root report.
    pub name: String,
    /// Report path relative to the branch root, `/` separated.
    pub rel_path: String,
}

/// Writes reports and the navigation index.
pub trait HtmlGenerator: Send + Sync {
    /// Write report bytes to `rel_path` under `dir`, creating parents.
    fn generate_report_html(&self, dir: &Path, rel_path: &Path, content: &[u8]) -> Result<()>;

    /// Find published reports under `dir`.
    fn discover_reports(&self, dir: &Path) -> Result<Vec<ReportEntry>>;

    /// Write the navigation index at the root of `dir`.
    fn generate_index_html(&self, dir: &Path, reports: &[ReportEntry]) -> Result<()>;
}

pub type DynGitOperations = Arc<dyn GitOperations>;
pub type DynCleanupEngine = Arc<dyn CleanupEngine>;
pub type DynHtmlGenerator = Arc<dyn HtmlGenerator>;
