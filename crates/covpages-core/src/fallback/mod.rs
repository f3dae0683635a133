//! Degraded-mode execution for operations whose primary path failed.
//!
//! An [`Operation`] is tried first as-is. When it fails, the
//! [`FallbackManager`] hands the error to the registered
//! [`FallbackStrategy`] implementations that claim it, lowest priority value
//! first, until one succeeds.

mod deployment;
mod github;
mod manager;
mod metrics;

pub use deployment::{DeploymentStrategy, DeploymentStrategyConfig};
pub use github::{GitHubApiStrategy, GitHubStrategyConfig};
pub use manager::FallbackManager;
pub use metrics::{FallbackMetrics, StrategyMetrics};

use crate::cancel::CancellationToken;
use crate::error::{CovpagesError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Key/value bag attached to an operation and read by strategies.
pub type Metadata = HashMap<String, Value>;

/// Metadata keys shared between operations and strategies.
pub mod keys {
    /// Cache key for a GitHub read (`github_api`).
    pub const CACHE_KEY: &str = "cache_key";
    /// Artifact name used as the staging subdirectory (`artifact_upload`).
    pub const ARTIFACT_NAME: &str = "artifact_name";
    /// Path of the artifact file to stage (`artifact_upload`).
    pub const ARTIFACT_PATH: &str = "artifact_path";
    /// Body of a PR comment (`pr_comment`).
    pub const COMMENT_BODY: &str = "comment_body";
    /// PR number, string or integer.
    pub const PR_NUMBER: &str = "pr_number";
    /// Array of file paths to stage (`deployment`).
    pub const FILES: &str = "files";
    /// Branch being deployed.
    pub const BRANCH: &str = "branch";
}

/// Discriminator telling strategies what kind of work failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// GitHub API read that can be served from cache.
    GitHubApi,
    /// Upload of a build artifact.
    ArtifactUpload,
    /// Comment on a pull request.
    PrComment,
    /// Publish to the hosting branch.
    Deployment,
    /// Anything else.
    Custom(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::GitHubApi => "github_api",
            OperationType::ArtifactUpload => "artifact_upload",
            OperationType::PrComment => "pr_comment",
            OperationType::Deployment => "deployment",
            OperationType::Custom(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "github_api" => OperationType::GitHubApi,
            "artifact_upload" => OperationType::ArtifactUpload,
            "pr_comment" => OperationType::PrComment,
            "deployment" => OperationType::Deployment,
            _ => OperationType::Custom(s.to_string()),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named unit of side-effecting work.
#[async_trait]
pub trait Operation: Send + Sync {
    fn operation_type(&self) -> OperationType;

    /// Run the primary path.
    async fn execute(&self, cancel: &CancellationToken) -> Result<()>;

    /// Payload read by strategies.
    fn metadata(&self) -> &Metadata;
}

/// An alternate execution path for failed operations.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    /// Unique name, used for metrics.
    fn name(&self) -> &str;

    /// Lower values run first.
    fn priority(&self) -> u32;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Whether this strategy applies to the primary failure.
    fn can_handle(&self, err: &CovpagesError) -> bool;

    async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: &dyn Operation,
        err: &CovpagesError,
    ) -> Result<()>;
}

/// Shared handle to a strategy.
pub type DynFallbackStrategy = Arc<dyn FallbackStrategy>;

/// Required string metadata, failing with [`CovpagesError::MissingMetadata`].
pub fn required_str<'a>(operation: &'a dyn Operation, key: &str) -> Result<&'a str> {
    match operation.metadata().get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        _ => Err(CovpagesError::MissingMetadata {
            key: key.to_string(),
            operation_type: operation.operation_type().to_string(),
        }),
    }
}

/// Optional metadata rendered as a string (numbers are formatted).
pub fn optional_string(operation: &dyn Operation, key: &str) -> Option<String> {
    match operation.metadata().get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Lowercased text of an error and all of its sources.
pub(crate) fn error_text(err: &CovpagesError) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_lowercase()
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedOperation;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_type_round_trip_names() {
        assert_eq!(OperationType::parse("deployment"), OperationType::Deployment);
        assert_eq!(OperationType::parse("PR_COMMENT"), OperationType::PrComment);
        assert_eq!(
            OperationType::parse("status_check"),
            OperationType::Custom("status_check".into())
        );
        assert_eq!(OperationType::ArtifactUpload.to_string(), "artifact_upload");
    }

    #[test]
    fn test_required_str() {
        let op = ScriptedOperation::succeeding(OperationType::ArtifactUpload)
            .with_metadata(keys::ARTIFACT_NAME, json!("coverage"))
            .with_metadata(keys::ARTIFACT_PATH, json!(""));

        assert_eq!(required_str(&op, keys::ARTIFACT_NAME).unwrap(), "coverage");
        let err = required_str(&op, keys::ARTIFACT_PATH).unwrap_err();
        assert!(matches!(err, CovpagesError::MissingMetadata { ref key, .. } if key == "artifact_path"));
    }

    #[test]
    fn test_optional_string_formats_numbers() {
        let op = ScriptedOperation::succeeding(OperationType::PrComment)
            .with_metadata(keys::PR_NUMBER, json!(42));
        assert_eq!(optional_string(&op, keys::PR_NUMBER).as_deref(), Some("42"));
        assert_eq!(optional_string(&op, keys::BRANCH), None);
    }

    #[test]
    fn test_error_text_includes_sources() {
        let err = CovpagesError::step(
            "push",
            CovpagesError::Git {
                command: "push".into(),
                message: "Rejected".into(),
            },
        );
        let text = error_text(&err);
        assert!(text.contains("deployment step 'push' failed"));
        assert!(text.contains("git push failed: rejected"));
    }
}
