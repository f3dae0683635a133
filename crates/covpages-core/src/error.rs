//! Error types for covpages.
//!
//! One enum covers the whole crate. Variants that wrap another failure keep it
//! as a boxed `#[source]` so callers can walk `Error::source()` down to the
//! root cause.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for covpages.
#[derive(Debug, Error)]
pub enum CovpagesError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("GitHub API error: {message}")]
    GitHubApi {
        message: String,
        status_code: Option<u16>,
    },

    // Resilience errors
    #[error("non-retryable error: {source}")]
    NonRetryable {
        #[source]
        source: Box<CovpagesError>,
    },

    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<CovpagesError>,
    },

    #[error("context canceled")]
    Cancelled,

    #[error("circuit breaker is open: {name}")]
    CircuitBreakerOpen { name: String },

    #[error("panic recovered: {0}")]
    PanicRecovered(String),

    // Fallback errors
    #[error("no fallback available for operation {operation_type}: {source}")]
    NoFallbackAvailable {
        operation_type: String,
        #[source]
        source: Box<CovpagesError>,
    },

    #[error("all fallbacks failed for operation {operation_type}: {source}")]
    AllFallbacksFailed {
        operation_type: String,
        #[source]
        source: Box<CovpagesError>,
    },

    #[error("missing required metadata key '{key}' for operation {operation_type}")]
    MissingMetadata { key: String, operation_type: String },

    #[error("strategy {strategy} does not support operation {operation_type}")]
    UnsupportedOperation {
        strategy: String,
        operation_type: String,
    },

    #[error("fallback {strategy} failed: {message}")]
    FallbackFailed { strategy: String, message: String },

    // Deployment errors
    #[error("deployment step '{step}' failed: {source}")]
    DeploymentStep {
        step: &'static str,
        #[source]
        source: Box<CovpagesError>,
    },

    #[error("failed to acquire deployment lock {name}: {source}")]
    LockFailed {
        name: String,
        #[source]
        source: Box<CovpagesError>,
    },

    #[error("no backup reference available for rollback")]
    NoBackupForRollback,

    #[error("verification failed for {url}: status {status}")]
    VerificationFailed { url: String, status: u16 },

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for covpages operations.
pub type Result<T> = std::result::Result<T, CovpagesError>;

// Conversion implementations for common error types

impl From<std::io::Error> for CovpagesError {
    fn from(err: std::io::Error) -> Self {
        CovpagesError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CovpagesError {
    fn from(err: serde_json::Error) -> Self {
        CovpagesError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CovpagesError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CovpagesError::Timeout(Duration::from_secs(0))
        } else {
            CovpagesError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl CovpagesError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CovpagesError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wrap an error as the failure of a named deployment step.
    pub fn step(step: &'static str, err: CovpagesError) -> Self {
        CovpagesError::DeploymentStep {
            step,
            source: Box::new(err),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        crate::resilience::classify::is_retryable_error(self)
    }

    /// Walk the source chain and return the innermost error.
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        let mut current: &(dyn std::error::Error + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CovpagesError::RetryExhausted {
            attempts: 3,
            source: Box::new(CovpagesError::Other("boom".into())),
        };
        assert_eq!(err.to_string(), "operation failed after 3 attempts: boom");
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(CovpagesError::Cancelled.to_string(), "context canceled");
    }

    #[test]
    fn test_root_cause_walks_chain() {
        let err = CovpagesError::AllFallbacksFailed {
            operation_type: "deployment".into(),
            source: Box::new(CovpagesError::step(
                "push",
                CovpagesError::Git {
                    command: "push".into(),
                    message: "rejected".into(),
                },
            )),
        };
        assert_eq!(err.root_cause().to_string(), "git push failed: rejected");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CovpagesError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!CovpagesError::NoBackupForRollback.is_retryable());
    }
}
