//! Centralized configuration for covpages.
//!
//! Constants for retry, circuit breaking, fallbacks and deployment, plus the
//! small value types callers pass in explicitly. Nothing in this module reads
//! process state; the CLI maps environment variables onto these values.

use std::time::Duration;

/// Retry tuning per dependency class.
pub struct RetryDefaults;

impl RetryDefaults {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const MAX_DELAY: Duration = Duration::from_secs(30);
    pub const MULTIPLIER: f64 = 2.0;
    pub const JITTER_FRACTION: f64 = 0.1;

    pub const NETWORK_MAX_ATTEMPTS: u32 = 5;
    pub const NETWORK_INITIAL_DELAY: Duration = Duration::from_millis(500);
    pub const NETWORK_MAX_DELAY: Duration = Duration::from_secs(10);
    pub const NETWORK_JITTER_FRACTION: f64 = 0.2;

    pub const GITHUB_MAX_ATTEMPTS: u32 = 3;
    pub const GITHUB_INITIAL_DELAY: Duration = Duration::from_secs(2);
    pub const GITHUB_MAX_DELAY: Duration = Duration::from_secs(60);
}

/// Circuit breaker defaults.
pub struct BreakerDefaults;

impl BreakerDefaults {
    pub const MAX_FAILURES: u32 = 5;
    pub const RESET_TIMEOUT: Duration = Duration::from_secs(60);
}

/// Fallback manager defaults.
pub struct FallbackDefaults;

impl FallbackDefaults {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_DELAY: Duration = Duration::from_millis(500);
    pub const MAX_RECOVERY_SAMPLES: usize = 100;
    pub const GITHUB_CACHE_TTL: Duration = Duration::from_secs(3600);
    pub const GITHUB_CACHE_CAPACITY: u64 = 256;
}

/// Deployment constants.
pub struct DeployConfig;

impl DeployConfig {
    pub const MAX_LOCK_TTL: Duration = Duration::from_secs(300);
    pub const PROPAGATION_DELAY: Duration = Duration::from_secs(30);
    pub const VERIFY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(120);
    pub const SHORT_SHA_LEN: usize = 7;
    pub const REPORT_FILE: &'static str = "coverage.html";
    pub const BADGE_FILE: &'static str = "coverage.svg";
    pub const INDEX_FILE: &'static str = "index.html";
    pub const BRANCH_ROOT: &'static str = "branch";
    pub const PR_ROOT: &'static str = "pr";
    pub const UNKNOWN_BRANCH: &'static str = "unknown";
    pub const DEFAULT_MAIN_BRANCHES: &'static [&'static str] = &["main", "master"];
    pub const USER_AGENT: &'static str = "covpages/0.6";
}

/// Source and build files that never belong on the publishing branch.
pub const DEFAULT_REMOVE_PATTERNS: &[&str] = &[
    "*.go",
    "go.mod",
    "go.sum",
    "*.rs",
    "Cargo.toml",
    "Cargo.lock",
    "Makefile",
    "Dockerfile",
    "*.out",
    "*.test",
    "*.yml",
    "*.yaml",
    ".github/",
    ".gitignore",
    "cmd/",
    "internal/",
    "pkg/",
    "src/",
    "vendor/",
    "node_modules/",
    "target/",
];

/// Published artifacts that survive cleanup even when a remove pattern matches.
pub const DEFAULT_PRESERVE_PATTERNS: &[&str] = &[
    ".nojekyll",
    "CNAME",
    "*.html",
    "*.svg",
    "branch/",
    "pr/",
];

/// Main-branch set used by the deployment path builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    pub main_branches: Vec<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            main_branches: DeployConfig::DEFAULT_MAIN_BRANCHES
                .iter()
                .map(|b| b.to_string())
                .collect(),
        }
    }
}

impl PathConfig {
    /// Parse a comma separated branch list. Blank input yields the defaults.
    pub fn from_list(list: &str) -> Self {
        let main_branches: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();

        if main_branches.is_empty() {
            Self::default()
        } else {
            Self { main_branches }
        }
    }

    pub fn is_main_branch(&self, branch: &str) -> bool {
        self.main_branches.iter().any(|b| b == branch)
    }
}

/// Settings for the fallback manager.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// When false, operations run verbatim without fallback or metrics.
    pub enabled: bool,
    /// Attempts per strategy, including the first.
    pub max_attempts: u32,
    /// Linear backoff step between strategy attempts.
    pub retry_delay: Duration,
    /// Bound on stored recovery-time samples.
    pub max_recovery_samples: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: FallbackDefaults::MAX_ATTEMPTS,
            retry_delay: FallbackDefaults::RETRY_DELAY,
            max_recovery_samples: FallbackDefaults::MAX_RECOVERY_SAMPLES,
        }
    }
}

/// Settings for the deployment manager.
#[derive(Debug, Clone)]
pub struct DeploymentManagerConfig {
    /// Base URL of the published site, without trailing slash.
    pub pages_url: String,
    pub lock_ttl: Duration,
    pub propagation_delay: Duration,
    pub request_timeout: Duration,
    pub remove_patterns: Vec<String>,
    pub preserve_patterns: Vec<String>,
}

impl Default for DeploymentManagerConfig {
    fn default() -> Self {
        Self {
            pages_url: String::new(),
            lock_ttl: DeployConfig::MAX_LOCK_TTL,
            propagation_delay: DeployConfig::PROPAGATION_DELAY,
            request_timeout: DeployConfig::VERIFY_REQUEST_TIMEOUT,
            remove_patterns: DEFAULT_REMOVE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            preserve_patterns: DEFAULT_PRESERVE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl DeploymentManagerConfig {
    /// Config for `owner/repo` published at the standard GitHub Pages URL.
    pub fn for_repository(repository: &str) -> Self {
        Self {
            pages_url: pages_url_for_repository(repository),
            ..Default::default()
        }
    }

    pub fn with_pages_url(mut self, url: impl Into<String>) -> Self {
        self.pages_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the lock TTL, clamped to [`DeployConfig::MAX_LOCK_TTL`].
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl.min(DeployConfig::MAX_LOCK_TTL);
        self
    }

    pub fn with_propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Effective lock TTL, never above five minutes.
    pub fn effective_lock_ttl(&self) -> Duration {
        self.lock_ttl.min(DeployConfig::MAX_LOCK_TTL)
    }
}

/// `owner/repo` to `https://owner.github.io/repo`.
pub fn pages_url_for_repository(repository: &str) -> String {
    match repository.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            format!("https://{}.github.io/{}", owner.to_lowercase(), name)
        }
        _ => String::new(),
    }
}
