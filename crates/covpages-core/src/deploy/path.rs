//! Deployment target taxonomy.
//!
//! Maps CI event context (event name, branch, PR number) to the directory a
//! coverage report is published under:
//!
//! | Context                         | Path            |
//! |---------------------------------|-----------------|
//! | PR event or merge ref with PR   | `pr/<number>`   |
//! | configured main branch          | branch root     |
//! | any other branch                | `branch/<name>` |

use crate::config::{DeployConfig, PathConfig};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Anything outside the portable filename set.
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Runs of dashes left behind by substitution.
static DASH_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").unwrap());

const PR_EVENTS: &[&str] = &["pull_request", "pull_request_target"];
const MERGE_SUFFIX: &str = "/merge";

/// Kind of deployment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    Root,
    Main,
    Branch,
    Pr,
}

impl PathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Root => "root",
            PathType::Main => "main",
            PathType::Branch => "branch",
            PathType::Pr => "pr",
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a deployment lands on the publishing branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPath {
    pub path_type: PathType,
    /// First path segment (`branch` or `pr`); empty for root deployments.
    pub root: String,
    /// Sanitized branch name or PR number; empty for root deployments.
    pub identifier: String,
}

impl DeploymentPath {
    pub fn root() -> Self {
        Self {
            path_type: PathType::Root,
            root: String::new(),
            identifier: String::new(),
        }
    }

    pub fn branch(name: &str) -> Self {
        Self {
            path_type: PathType::Branch,
            root: DeployConfig::BRANCH_ROOT.to_string(),
            identifier: sanitize(name),
        }
    }

    pub fn pull_request(number: &str) -> Self {
        Self {
            path_type: PathType::Pr,
            root: DeployConfig::PR_ROOT.to_string(),
            identifier: sanitize(number),
        }
    }

    /// Whether files land at the branch root.
    pub fn is_root(&self) -> bool {
        matches!(self.path_type, PathType::Root | PathType::Main)
    }

    /// Directory relative to the branch root.
    pub fn relative_dir(&self) -> PathBuf {
        if self.is_root() {
            PathBuf::new()
        } else {
            PathBuf::from(&self.root).join(&self.identifier)
        }
    }
}

impl fmt::Display for DeploymentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            Ok(())
        } else {
            write!(f, "{}/{}", self.root, self.identifier)
        }
    }
}

/// Compute the deployment path for a CI event.
///
/// PR identity wins over the synthetic `refs/pull/N/merge` branch GitHub
/// checks out for pull requests.
///
/// ```
/// use covpages_core::config::PathConfig;
/// use covpages_core::deploy::{build_deployment_path, PathType};
///
/// let config = PathConfig::default();
/// let path = build_deployment_path("push", "feature/login", "", &config);
/// assert_eq!(path.path_type, PathType::Branch);
/// assert_eq!(path.to_string(), "branch/feature-login");
/// ```
pub fn build_deployment_path(
    event_name: &str,
    branch: &str,
    pr_number: &str,
    config: &PathConfig,
) -> DeploymentPath {
    let pr_number = pr_number.trim();
    let is_pr_event = PR_EVENTS.contains(&event_name);
    let is_merge_ref = branch.ends_with(MERGE_SUFFIX);

    if !pr_number.is_empty() && (is_pr_event || is_merge_ref) {
        return DeploymentPath::pull_request(pr_number);
    }

    let cleaned = clean_branch(branch);
    if config.is_main_branch(&cleaned) {
        return DeploymentPath::root();
    }
    DeploymentPath::branch(&cleaned)
}

/// Strip ref noise: `refs/heads/`, a trailing `/merge`, and `refs/` before `pull/`.
fn clean_branch(branch: &str) -> String {
    let mut name = branch.trim();
    name = name.strip_prefix("refs/heads/").unwrap_or(name);
    name = name.strip_suffix(MERGE_SUFFIX).unwrap_or(name);
    if let Some(rest) = name.strip_prefix("refs/") {
        if rest.starts_with("pull/") {
            name = rest;
        }
    }
    if name.is_empty() {
        DeployConfig::UNKNOWN_BRANCH.to_string()
    } else {
        name.to_string()
    }
}

/// Replace filesystem-unsafe characters with `-`.
pub fn sanitize(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "-");
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    let trimmed = collapsed.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        DeployConfig::UNKNOWN_BRANCH.to_string()
    } else {
        trimmed.to_string()
    }
}
