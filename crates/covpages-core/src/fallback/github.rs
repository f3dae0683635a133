//! GitHub API fallback: cached reads, local artifact staging, logged comments.
//!
//! Reads are served from a two-tier cache (in-memory with TTL, then JSON on
//! disk). Callers populate it with [`GitHubApiStrategy::cache_response`] after
//! every successful API read so a later outage can be bridged.

use crate::cancel::CancellationToken;
use crate::config::FallbackDefaults;
use crate::error::{CovpagesError, Result};
use crate::fallback::{
    error_text, keys, optional_string, required_str, FallbackStrategy, Operation, OperationType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const NAME: &str = "github-api";
const PRIORITY: u32 = 1;

const HANDLED_PATTERNS: &[&str] = &[
    "github",
    "rate limit",
    "abuse detection",
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "connection refused",
];

/// Settings for [`GitHubApiStrategy`].
#[derive(Debug, Clone)]
pub struct GitHubStrategyConfig {
    pub enabled: bool,
    /// Directory holding the on-disk response cache.
    pub cache_dir: PathBuf,
    /// Directory artifacts are staged into when uploads fail.
    pub staging_dir: PathBuf,
    pub cache_ttl: Duration,
}

impl GitHubStrategyConfig {
    /// Config rooted at `base`, with `github-cache/` and `artifacts/` below it.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            enabled: true,
            cache_dir: base.join("github-cache"),
            staging_dir: base.join("artifacts"),
            cache_ttl: FallbackDefaults::GITHUB_CACHE_TTL,
        }
    }
}

/// On-disk form of a cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    key: String,
    cached_at: DateTime<Utc>,
    ttl_secs: u64,
    data: Value,
}

impl CachedResponse {
    fn is_fresh(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.cached_at);
        age.num_seconds() < self.ttl_secs as i64
    }
}

/// Degraded path for GitHub API operations.
pub struct GitHubApiStrategy {
    config: GitHubStrategyConfig,
    memory_cache: Cache<String, Value>,
}

impl GitHubApiStrategy {
    pub fn new(config: GitHubStrategyConfig) -> Self {
        let memory_cache = Cache::builder()
            .time_to_live(config.cache_ttl)
            .max_capacity(FallbackDefaults::GITHUB_CACHE_CAPACITY)
            .build();
        Self {
            config,
            memory_cache,
        }
    }

    /// Store a successful API response for later fallback reads.
    pub fn cache_response(&self, key: &str, data: Value) -> Result<()> {
        self.memory_cache.insert(key.to_string(), data.clone());

        let path = self.disk_cache_path(key);
        std::fs::create_dir_all(&self.config.cache_dir).map_err(|e| CovpagesError::Io {
            message: format!("Failed to create cache directory: {}", e),
            path: Some(self.config.cache_dir.clone()),
            source: Some(e),
        })?;

        let entry = CachedResponse {
            key: key.to_string(),
            cached_at: Utc::now(),
            ttl_secs: self.config.cache_ttl.as_secs(),
            data,
        };
        let contents = serde_json::to_string_pretty(&entry)?;

        // Readers never see a half-written entry.
        let temp_path = path.with_extension(format!("json.tmp.{}", std::process::id()));
        std::fs::write(&temp_path, contents).map_err(|e| CovpagesError::Io {
            message: format!("Failed to write cache entry: {}", e),
            path: Some(temp_path.clone()),
            source: Some(e),
        })?;
        std::fs::rename(&temp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            CovpagesError::Io {
                message: format!("Failed to commit cache entry: {}", e),
                path: Some(path.clone()),
                source: Some(e),
            }
        })?;
        Ok(())
    }

    /// Look up a cached response, memory first, then disk.
    ///
    /// Expired disk entries are still returned (with a warning); a stale
    /// answer beats none during an outage.
    pub fn cached_response(&self, key: &str) -> Option<Value> {
        if let Some(data) = self.memory_cache.get(&key.to_string()) {
            debug!(key, "GitHub cache hit (memory)");
            return Some(data);
        }

        let entry = self.read_disk(key)?;
        if entry.is_fresh() {
            debug!(key, "GitHub cache hit (disk)");
            self.memory_cache.insert(key.to_string(), entry.data.clone());
        } else {
            warn!(key, cached_at = %entry.cached_at, "Serving stale GitHub cache entry");
        }
        Some(entry.data)
    }

    fn read_disk(&self, key: &str) -> Option<CachedResponse> {
        let path = self.disk_cache_path(key);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Failed to parse cache entry {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    fn disk_cache_path(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.config.cache_dir.join(format!("{}.json", safe_key))
    }

    fn serve_from_cache(&self, operation: &dyn Operation) -> Result<()> {
        let key = required_str(operation, keys::CACHE_KEY)?;
        match self.cached_response(key) {
            Some(_) => {
                info!(key, "Served GitHub read from cache");
                Ok(())
            }
            None => Err(CovpagesError::FallbackFailed {
                strategy: NAME.to_string(),
                message: format!("no cached response for '{}'", key),
            }),
        }
    }

    async fn stage_artifact(&self, operation: &dyn Operation) -> Result<()> {
        let name = required_str(operation, keys::ARTIFACT_NAME)?;
        let source = PathBuf::from(required_str(operation, keys::ARTIFACT_PATH)?);

        let file_name = source.file_name().ok_or_else(|| CovpagesError::Config {
            message: format!("artifact path has no file name: {}", source.display()),
        })?;
        let target_dir = self.config.staging_dir.join(name);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| CovpagesError::io_with_path(e, &target_dir))?;

        let target = target_dir.join(file_name);
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| CovpagesError::io_with_path(e, &source))?;

        info!(
            artifact = name,
            path = %target.display(),
            "Staged artifact locally"
        );
        Ok(())
    }

    fn log_comment(&self, operation: &dyn Operation) -> Result<()> {
        let body = required_str(operation, keys::COMMENT_BODY)?;
        let pr = optional_string(operation, keys::PR_NUMBER).unwrap_or_else(|| "?".into());
        info!(pr = %pr, chars = body.len(), "PR comment not posted, logged instead");
        debug!(pr = %pr, body, "PR comment body");
        Ok(())
    }
}

#[async_trait]
impl FallbackStrategy for GitHubApiStrategy {
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
        let text = error_text(err);
        HANDLED_PATTERNS.iter().any(|p| text.contains(p))
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: &dyn Operation,
        err: &CovpagesError,
    ) -> Result<()> {
        cancel.check()?;
        debug!(operation = %operation.operation_type(), error = %err, "GitHub API fallback");

        match operation.operation_type() {
            OperationType::GitHubApi => self.serve_from_cache(operation),
            OperationType::ArtifactUpload => self.stage_artifact(operation).await,
            OperationType::PrComment => self.log_comment(operation),
            other => Err(CovpagesError::UnsupportedOperation {
                strategy: NAME.to_string(),
                operation_type: other.to_string(),
            }),
        }
    }
}
