//! Subcommand implementations.

use crate::{CiContext, RemoteArgs};
use anyhow::{bail, Context, Result};
use covpages_core::config::{DeploymentManagerConfig, FallbackConfig, PathConfig};
use covpages_core::deploy::{
    build_deployment_path, DeployOperation, DeploymentManager, DeploymentOptions, GitCli,
    PatternCleanupEngine, StaticIndexGenerator,
};
use covpages_core::fallback::{
    DeploymentStrategy, DeploymentStrategyConfig, FallbackManager, GitHubApiStrategy,
    GitHubStrategyConfig,
};
use covpages_core::CancellationToken;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct DeployArgs {
    pub ctx: CiContext,
    pub remote: RemoteArgs,
    pub coverage_dir: PathBuf,
    pub pages_url: Option<String>,
    pub dry_run: bool,
    pub force: bool,
    pub verify: bool,
    pub fallback_dir: Option<PathBuf>,
    pub no_fallback: bool,
}

pub fn path(ctx: &CiContext) -> Result<()> {
    let config = PathConfig::from_list(&ctx.main_branches);
    let path = build_deployment_path(&ctx.event, &ctx.branch, &ctx.pr_number, &config);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "type": path.path_type,
            "root": path.root,
            "identifier": path.identifier,
            "path": path.to_string(),
        }))?
    );
    Ok(())
}

pub async fn deploy(args: DeployArgs) -> Result<()> {
    let ctx = &args.ctx;
    if ctx.repository.is_empty() {
        bail!("repository is required (--repository or GITHUB_REPOSITORY)");
    }

    let files = collect_files(&args.coverage_dir).await?;
    if files.is_empty() {
        bail!("no coverage files found in {}", args.coverage_dir.display());
    }

    let manager = Arc::new(build_manager(&ctx.repository, &args.remote, args.pages_url.as_deref())?
        .with_path_config(PathConfig::from_list(&ctx.main_branches)));

    let options = DeploymentOptions::new(&ctx.repository, &ctx.branch, &ctx.sha)
        .with_event(&ctx.event, &ctx.pr_number)
        .with_dry_run(args.dry_run)
        .with_force(args.force);
    let op = DeployOperation::from_files(manager.clone(), options, files).await?;

    let fallback_dir = args.fallback_dir.clone().unwrap_or_else(default_fallback_dir);
    let fallback = FallbackManager::new(FallbackConfig {
        enabled: !args.no_fallback,
        ..FallbackConfig::default()
    });
    fallback.register_strategy(Arc::new(DeploymentStrategy::new(DeploymentStrategyConfig::new(
        fallback_dir.join("deployments"),
    ))))?;
    fallback.register_strategy(Arc::new(GitHubApiStrategy::new(GitHubStrategyConfig::new(
        &fallback_dir,
    ))))?;

    let cancel = cancel_on_ctrl_c();
    fallback.execute_with_fallback(&cancel, &op).await?;

    let result = op.last_result();
    match &result {
        Some(result) if args.verify => {
            manager.verify(&cancel, op.options(), result).await?;
        }
        Some(_) => {}
        None => warn!(
            dir = %fallback_dir.display(),
            "Deployment did not reach the remote, fallback handled it"
        ),
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "deployment": result,
            "fallback": fallback.metrics(),
        }))?
    );
    Ok(())
}

pub async fn rollback(backup_ref: &str, repository: &str, remote: &RemoteArgs) -> Result<()> {
    let manager = build_manager(repository, remote, None)?;
    manager.rollback(&cancel_on_ctrl_c(), backup_ref).await?;
    info!(backup_ref, "Publishing branch restored");
    Ok(())
}

fn build_manager(
    repository: &str,
    remote: &RemoteArgs,
    pages_url: Option<&str>,
) -> Result<DeploymentManager> {
    let git = match &remote.remote {
        Some(url) => GitCli::new(url.as_str(), remote.pages_branch.as_str()),
        None => {
            if repository.is_empty() {
                bail!("repository is required when --remote is not given");
            }
            GitCli::for_github(repository, remote.token.clone())
                .with_branch(remote.pages_branch.as_str())
        }
    };

    let mut config = DeploymentManagerConfig::for_repository(repository);
    if let Some(url) = pages_url.filter(|u| !u.is_empty()) {
        config = config.with_pages_url(url);
    }

    let manager = DeploymentManager::new(
        config,
        Arc::new(git),
        Arc::new(PatternCleanupEngine::new()),
        Arc::new(StaticIndexGenerator::new()),
    )?;
    Ok(manager)
}

/// Visible, regular files directly inside `dir`, sorted by name.
async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read coverage directory {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn default_fallback_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("covpages")
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}
