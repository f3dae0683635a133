//! Covpages CLI - publish coverage reports to GitHub Pages from CI.
//!
//! Reads the GitHub Actions environment, deploys through the fallback manager
//! and prints machine-readable results on stdout. Logs go to stderr.

mod commands;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "covpages")]
#[command(about = "Publish coverage reports to GitHub Pages", version)]
struct Args {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// CI event context, normally supplied by GitHub Actions.
#[derive(ClapArgs, Debug, Clone)]
pub struct CiContext {
    /// Repository as owner/repo
    #[arg(long, env = "GITHUB_REPOSITORY", default_value = "")]
    pub repository: String,

    /// Branch or ref being built
    #[arg(long, env = "GITHUB_REF_NAME", default_value = "")]
    pub branch: String,

    /// Commit being built
    #[arg(long, env = "GITHUB_SHA", default_value = "")]
    pub sha: String,

    /// Triggering event name
    #[arg(long, env = "GITHUB_EVENT_NAME", default_value = "push")]
    pub event: String,

    /// Pull request number, if any
    #[arg(long, env = "PR_NUMBER", default_value = "")]
    pub pr_number: String,

    /// Comma separated branches published at the site root
    #[arg(long, env = "MAIN_BRANCHES", default_value = "main,master")]
    pub main_branches: String,
}

/// Where and how to reach the publishing branch.
#[derive(ClapArgs, Debug, Clone)]
pub struct RemoteArgs {
    /// Token used to push to github.com
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Git remote to publish to instead of the GitHub repository
    #[arg(long)]
    pub remote: Option<String>,

    /// Publishing branch
    #[arg(long, default_value = "gh-pages")]
    pub pages_branch: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the deployment path for the current CI context
    Path {
        #[command(flatten)]
        ctx: CiContext,
    },

    /// Deploy coverage files to the publishing branch
    Deploy {
        #[command(flatten)]
        ctx: CiContext,

        #[command(flatten)]
        remote: RemoteArgs,

        /// Directory holding coverage.html, coverage.svg and friends
        #[arg(long)]
        coverage_dir: PathBuf,

        /// Base URL of the published site
        #[arg(long, env = "PAGES_URL")]
        pages_url: Option<String>,

        /// Do everything except push
        #[arg(long)]
        dry_run: bool,

        /// Allow non-fast-forward pushes
        #[arg(long)]
        force: bool,

        /// Check the deployed URLs afterwards
        #[arg(long)]
        verify: bool,

        /// Local directory for fallback staging and the GitHub cache
        #[arg(long)]
        fallback_dir: Option<PathBuf>,

        /// Fail instead of falling back to local staging
        #[arg(long)]
        no_fallback: bool,
    },

    /// Restore the publishing branch from a backup reference
    Rollback {
        /// Backup reference printed by a previous deploy
        backup_ref: String,

        #[arg(long, env = "GITHUB_REPOSITORY", default_value = "")]
        repository: String,

        #[command(flatten)]
        remote: RemoteArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Path { ctx } => commands::path(&ctx),
        Command::Deploy {
            ctx,
            remote,
            coverage_dir,
            pages_url,
            dry_run,
            force,
            verify,
            fallback_dir,
            no_fallback,
        } => {
            commands::deploy(commands::DeployArgs {
                ctx,
                remote,
                coverage_dir,
                pages_url,
                dry_run,
                force,
                verify,
                fallback_dir,
                no_fallback,
            })
            .await
        }
        Command::Rollback {
            backup_ref,
            repository,
            remote,
        } => commands::rollback(&backup_ref, &repository, &remote).await,
    }
}
