//! Dry-run deployment against a throwaway local remote.
//!
//! Run with: `cargo run -p covpages-core --example dry_run_deploy -- <remote-path>`
//! where `<remote-path>` is a bare git repository (`git init --bare /tmp/pages.git`).

use covpages_core::config::DeploymentManagerConfig;
use covpages_core::deploy::{
    DeploymentManager, DeploymentOptions, GitCli, PatternCleanupEngine, StaticIndexGenerator,
};
use covpages_core::CancellationToken;
use std::sync::Arc;

#[tokio::main]
async fn main() -> covpages_core::Result<()> {
    tracing_subscriber::fmt().with_target(false).compact().init();

    let remote = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/pages.git".to_string());

    let manager = DeploymentManager::new(
        DeploymentManagerConfig::for_repository("example/project"),
        Arc::new(GitCli::new(remote, "gh-pages")),
        Arc::new(PatternCleanupEngine::new()),
        Arc::new(StaticIndexGenerator::new()),
    )?;

    let options = DeploymentOptions::new("example/project", "feature/demo", "0123456789abcdef")
        .with_file("coverage.html", "<html><body>81.4%</body></html>")
        .with_file("coverage.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>")
        .with_dry_run(true);

    let result = manager.deploy(&CancellationToken::new(), &options).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
