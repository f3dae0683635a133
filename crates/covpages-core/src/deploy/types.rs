//! Deployment inputs and outputs.

use crate::config::{DeployConfig, PathConfig};
use crate::deploy::path::{build_deployment_path, DeploymentPath};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Parameters of a single deployment.
#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    /// File name to contents; names are relative to the target path.
    pub coverage_files: BTreeMap<String, Vec<u8>>,
    /// `owner/repo`.
    pub repository: String,
    pub branch: String,
    pub commit_sha: String,
    pub pr_number: String,
    pub event_name: String,
    /// Explicit target; computed from the event context when `None`.
    pub target_path: Option<DeploymentPath>,
    /// Extra removal patterns on top of the manager's configured set.
    pub cleanup_patterns: Vec<String>,
    pub dry_run: bool,
    pub force: bool,
    pub verification_timeout: Duration,
}

impl DeploymentOptions {
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            coverage_files: BTreeMap::new(),
            repository: repository.into(),
            branch: branch.into(),
            commit_sha: commit_sha.into(),
            pr_number: String::new(),
            event_name: "push".to_string(),
            target_path: None,
            cleanup_patterns: Vec::new(),
            dry_run: false,
            force: false,
            verification_timeout: DeployConfig::VERIFICATION_TIMEOUT,
        }
    }

    pub fn with_event(mut self, event_name: impl Into<String>, pr_number: impl Into<String>) -> Self {
        self.event_name = event_name.into();
        self.pr_number = pr_number.into();
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.coverage_files.insert(name.into(), content.into());
        self
    }

    pub fn with_target_path(mut self, path: DeploymentPath) -> Self {
        self.target_path = Some(path);
        self
    }

    pub fn with_cleanup_patterns(mut self, patterns: Vec<String>) -> Self {
        self.cleanup_patterns = patterns;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    /// The explicit target path, or one derived from the event context.
    pub fn resolve_target(&self, config: &PathConfig) -> DeploymentPath {
        self.target_path.clone().unwrap_or_else(|| {
            build_deployment_path(&self.event_name, &self.branch, &self.pr_number, config)
        })
    }

    /// Leading characters of the source commit SHA.
    pub fn short_sha(&self) -> &str {
        let end = self
            .commit_sha
            .char_indices()
            .nth(DeployConfig::SHORT_SHA_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.commit_sha.len());
        &self.commit_sha[..end]
    }
}

/// Outcome of a deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    /// SHA of the commit on the publishing branch.
    pub commit_sha: String,
    pub deployment_url: String,
    pub additional_urls: Vec<String>,
    pub target_path: DeploymentPath,
    pub files_deployed: usize,
    pub files_removed: usize,
    pub deployment_time: Duration,
    pub deployed_at: DateTime<Utc>,
    /// Handle for [`rollback`](crate::deploy::DeploymentManager::rollback);
    /// `None` when the backup step failed.
    pub backup_ref: Option<String>,
    pub dry_run: bool,
    pub warnings: Vec<String>,
}

impl DeploymentResult {
    /// Every URL the deployment should make reachable.
    pub fn all_urls(&self) -> Vec<String> {
        std::iter::once(self.deployment_url.clone())
            .chain(self.additional_urls.iter().cloned())
            .filter(|u| !u.is_empty())
            .collect()
    }
}
