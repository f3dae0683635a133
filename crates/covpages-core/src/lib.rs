//! Covpages Core - resilient execution and deployment for CI coverage reports.
//!
//! This crate runs side-effecting CI work (GitHub API calls, publishing to a
//! hosting branch) reliably despite transient failures, and publishes coverage
//! artifacts atomically with backup and rollback. It has no CLI dependency;
//! the `covpages` binary is a thin layer on top.
//!
//! - [`resilience`]: retry with backoff and jitter, error classification,
//!   circuit breaking, panic containment
//! - [`fallback`]: priority-ordered degraded paths for failed operations
//! - [`deploy`]: target path taxonomy and the lock/backup/publish transaction
//!
//! # Example
//!
//! ```rust,ignore
//! use covpages_core::deploy::{DeployOperation, DeploymentManager, DeploymentOptions};
//! use covpages_core::fallback::FallbackManager;
//!
//! let op = DeployOperation::new(manager, DeploymentOptions::new("owner/repo", "main", sha));
//! fallback.execute_with_fallback(&cancel, &op).await?;
//! println!("{:?}", op.last_result());
//! ```

pub mod cancel;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fallback;
pub mod resilience;

pub use cancel::CancellationToken;
pub use config::{DeploymentManagerConfig, FallbackConfig, PathConfig};
pub use deploy::{
    build_deployment_path, DeployOperation, DeploymentManager, DeploymentOptions, DeploymentPath,
    DeploymentResult, PathType,
};
pub use error::{CovpagesError, Result};
pub use fallback::{FallbackManager, FallbackMetrics, FallbackStrategy, Operation, OperationType};
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};
