//! Deployment fallback: keep the coverage artifacts on local disk when the
//! publishing branch cannot be updated.

use crate::cancel::CancellationToken;
use crate::error::{CovpagesError, Result};
use crate::fallback::{error_text, keys, optional_string, FallbackStrategy, Operation, OperationType};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

const NAME: &str = "deployment";
const PRIORITY: u32 = 2;

// Whole words only: "git" must not match "github".
static HANDLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(deploy(?:ment)?|gh-pages|git|push(?:ed|ing)?)\b").unwrap());

/// Settings for [`DeploymentStrategy`].
#[derive(Debug, Clone)]
pub struct DeploymentStrategyConfig {
    pub enabled: bool,
    /// Treat a failed deployment as done without staging anything.
    pub skip_deployment: bool,
    /// Root directory files are staged into.
    pub fallback_dir: PathBuf,
}

impl DeploymentStrategyConfig {
    pub fn new(fallback_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            skip_deployment: false,
            fallback_dir: fallback_dir.into(),
        }
    }

    pub fn skipping(mut self) -> Self {
        self.skip_deployment = true;
        self
    }
}

pub struct DeploymentStrategy {
    config: DeploymentStrategyConfig,
}

impl DeploymentStrategy {
    pub fn new(config: DeploymentStrategyConfig) -> Self {
        Self { config }
    }

    fn declared_files(operation: &dyn Operation) -> Result<Vec<PathBuf>> {
        match operation.metadata().get(keys::FILES) {
            Some(Value::Array(items)) => Ok(items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()),
            _ => Err(CovpagesError::MissingMetadata {
                key: keys::FILES.to_string(),
                operation_type: operation.operation_type().to_string(),
            }),
        }
    }

    async fn stage_file(source: &Path, target_dir: &Path) -> Result<PathBuf> {
        let file_name = source.file_name().ok_or_else(|| CovpagesError::Config {
            message: format!("file path has no file name: {}", source.display()),
        })?;
        let target = target_dir.join(file_name);
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| CovpagesError::io_with_path(e, source))?;
        Ok(target)
    }
}

#[async_trait]
impl FallbackStrategy for DeploymentStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn can_handle(&self, err: &CovpagesError) -> bool {
        HANDLED.is_match(&error_text(err))
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: &dyn Operation,
        err: &CovpagesError,
    ) -> Result<()> {
        cancel.check()?;

        let op_type = operation.operation_type();
        if op_type != OperationType::Deployment {
            return Err(CovpagesError::UnsupportedOperation {
                strategy: NAME.to_string(),
                operation_type: op_type.to_string(),
            });
        }

        if self.config.skip_deployment {
            warn!(error = %err, "Deployment failed, skipping as configured");
            return Ok(());
        }

        let files = Self::declared_files(operation)?;
        let target_dir = match optional_string(operation, keys::BRANCH) {
            Some(branch) => self.config.fallback_dir.join(branch.replace('/', "-")),
            None => self.config.fallback_dir.clone(),
        };
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| CovpagesError::io_with_path(e, &target_dir))?;

        let mut staged = 0usize;
        let mut last_err = None;
        let mut seen = HashSet::new();
        for file in &files {
            if let Some(name) = file.file_name() {
                if !seen.insert(name.to_os_string()) {
                    warn!(path = %file.display(), "Duplicate file name, not staging it");
                    last_err = Some(CovpagesError::Config {
                        message: format!("duplicate file name: {}", file.display()),
                    });
                    continue;
                }
            }
            match Self::stage_file(file, &target_dir).await {
                Ok(target) => {
                    staged += 1;
                    info!(path = %target.display(), "Staged deployment file locally");
                }
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to stage file, continuing");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if staged == 0 => Err(CovpagesError::FallbackFailed {
                strategy: NAME.to_string(),
                message: format!("no files staged: {}", e),
            }),
            _ => {
                info!(
                    staged,
                    declared = files.len(),
                    dir = %target_dir.display(),
                    "Deployment fallback complete"
                );
                Ok(())
            }
        }
    }
}
