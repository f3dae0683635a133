//! Atomic, recoverable publishing of coverage artifacts.

mod cleanup;
mod git;
mod html;
mod manager;
mod operation;
mod path;
mod traits;
mod types;

pub use cleanup::PatternCleanupEngine;
pub use git::GitCli;
pub use html::StaticIndexGenerator;
pub use manager::{lock_name, DeploymentManager};
pub use operation::DeployOperation;
pub use path::{build_deployment_path, sanitize, DeploymentPath, PathType};
pub use traits::{
    CleanupEngine, DynCleanupEngine, DynGitOperations, DynHtmlGenerator, GitOperations,
    HtmlGenerator, ReportEntry,
};
pub use types::{DeploymentOptions, DeploymentResult};
