//! A deployment wrapped as a fallback-capable [`Operation`].

use crate::cancel::CancellationToken;
use crate::deploy::manager::DeploymentManager;
use crate::deploy::types::{DeploymentOptions, DeploymentResult};
use crate::error::{CovpagesError, Result};
use crate::fallback::{keys, Metadata, Operation, OperationType};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Runs [`DeploymentManager::deploy`] as the primary path. Metadata lists the
/// on-disk source files under [`keys::FILES`] so the deployment fallback can
/// stage them locally.
pub struct DeployOperation {
    manager: Arc<DeploymentManager>,
    options: DeploymentOptions,
    metadata: Metadata,
    last_result: Mutex<Option<DeploymentResult>>,
}

impl DeployOperation {
    /// Operation for in-memory files; the fallback has nothing to stage.
    pub fn new(manager: Arc<DeploymentManager>, options: DeploymentOptions) -> Self {
        Self::with_sources(manager, options, Vec::new())
    }

    /// Read `files` into the options, keyed by file name. Two inputs with the
    /// same file name are rejected.
    pub async fn from_files(
        manager: Arc<DeploymentManager>,
        mut options: DeploymentOptions,
        files: Vec<PathBuf>,
    ) -> Result<Self> {
        for path in &files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CovpagesError::Config {
                    message: format!("invalid coverage file path: {}", path.display()),
                })?;
            if options.coverage_files.contains_key(name) {
                return Err(CovpagesError::Config {
                    message: format!("duplicate coverage file name: {}", path.display()),
                });
            }
            let content = tokio::fs::read(path)
                .await
                .map_err(|e| CovpagesError::io_with_path(e, path))?;
            options.coverage_files.insert(name.to_string(), content);
        }
        Ok(Self::with_sources(manager, options, files))
    }

    fn with_sources(
        manager: Arc<DeploymentManager>,
        options: DeploymentOptions,
        files: Vec<PathBuf>,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            keys::FILES.to_string(),
            Value::Array(
                files
                    .iter()
                    .map(|p| Value::String(p.to_string_lossy().into_owned()))
                    .collect(),
            ),
        );
        metadata.insert(keys::BRANCH.to_string(), Value::String(options.branch.clone()));
        if !options.pr_number.is_empty() {
            metadata.insert(
                keys::PR_NUMBER.to_string(),
                Value::String(options.pr_number.clone()),
            );
        }

        Self {
            manager,
            options,
            metadata,
            last_result: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &DeploymentOptions {
        &self.options
    }

    /// Result of the last successful primary run.
    pub fn last_result(&self) -> Option<DeploymentResult> {
        self.last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Operation for DeployOperation {
    fn operation_type(&self) -> OperationType {
        OperationType::Deployment
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<()> {
        let result = self.manager.deploy(cancel, &self.options).await?;
        *self
            .last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result);
        Ok(())
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
