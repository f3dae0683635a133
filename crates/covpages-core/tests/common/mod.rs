//! Mock collaborators shared by integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use covpages_core::cancel::CancellationToken;
use covpages_core::config::DeploymentManagerConfig;
use covpages_core::deploy::{DeploymentManager, GitOperations, PatternCleanupEngine, StaticIndexGenerator};
use covpages_core::error::{CovpagesError, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walkdir::WalkDir;

pub const COMMIT_SHA: &str = "1111111111111111111111111111111111111111";

/// Git stand-in that records every call and can be told to fail one of them.
#[derive(Default)]
pub struct MockGit {
    pub calls: Mutex<Vec<String>>,
    /// Files present in the working directory at commit time.
    pub committed_files: Mutex<Vec<String>>,
    pub commit_messages: Mutex<Vec<String>>,
    /// Files the "remote branch" already holds.
    pub existing_files: Vec<(&'static str, &'static str)>,
    pub fail_on: Option<&'static str>,
    pub backup_ref: String,
}

impl MockGit {
    pub fn new() -> Self {
        Self {
            backup_ref: "refs/coverage-backups/gh-pages-1".to_string(),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, call: &'static str) -> Self {
        self.fail_on = Some(call);
        self
    }

    pub fn with_existing(mut self, rel: &'static str, content: &'static str) -> Self {
        self.existing_files.push((rel, content));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c == name)
    }

    fn record(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail_on == Some(name) {
            return Err(CovpagesError::Git {
                command: name.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

#[async_trait]
impl GitOperations for MockGit {
    async fn clone_or_create_branch(&self, _cancel: &CancellationToken, dir: &Path) -> Result<()> {
        self.record("clone_or_create_branch")?;
        for (rel, content) in &self.existing_files {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        Ok(())
    }

    async fn commit_changes(
        &self,
        _cancel: &CancellationToken,
        dir: &Path,
        message: &str,
    ) -> Result<String> {
        self.record("commit_changes")?;
        *self.committed_files.lock().unwrap() = list_files(dir);
        self.commit_messages.lock().unwrap().push(message.to_string());
        Ok(COMMIT_SHA.to_string())
    }

    async fn push_changes(&self, _cancel: &CancellationToken, _dir: &Path, force: bool) -> Result<()> {
        self.record(if force { "push_changes_force" } else { "push_changes" })
    }

    async fn acquire_lock(&self, _cancel: &CancellationToken, name: &str, ttl: Duration) -> Result<()> {
        assert!(ttl <= Duration::from_secs(300), "lock ttl above 5 minutes");
        assert!(!name.contains('/'), "lock name not sanitized: {}", name);
        self.record("acquire_lock")
    }

    async fn release_lock(&self, _cancel: &CancellationToken, _name: &str) -> Result<()> {
        self.record("release_lock")
    }

    async fn create_backup(&self, _cancel: &CancellationToken, _dir: &Path) -> Result<String> {
        self.record("create_backup")?;
        Ok(self.backup_ref.clone())
    }

    async fn rollback(&self, _cancel: &CancellationToken, _dir: &Path, _backup_ref: &str) -> Result<()> {
        self.record("rollback")
    }
}

pub fn test_config() -> DeploymentManagerConfig {
    DeploymentManagerConfig::for_repository("Owner/repo")
        .with_propagation_delay(Duration::ZERO)
        .with_request_timeout(Duration::from_secs(2))
}

pub fn manager_with(git: Arc<MockGit>, config: DeploymentManagerConfig) -> DeploymentManager {
    DeploymentManager::new(
        config,
        git,
        Arc::new(PatternCleanupEngine::new()),
        Arc::new(StaticIndexGenerator::new()),
    )
    .expect("manager")
}
