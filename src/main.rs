use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reposync::credentials::{self, CredentialsExpired};
use reposync::prune::PruneError;
use reposync::sync::{ProfileOutcome, SyncError};
use reposync::{
    CancelToken, Config, FsLister, GitCli, GitHubClient, PruneReport, Pruner,
    ReleaseFilterCriteria, RemoteApi, RetryingClient, SyncOptions, SyncReport, SyncSource, Syncer,
};

#[derive(Parser)]
#[command(name = "reposync")]
#[command(about = "Keep local clones of GitHub repositories in sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Sync repositories owned by this user
    #[arg(long)]
    user: Option<String>,

    /// Sync repositories of this organization
    #[arg(long)]
    org: Option<String>,
}

impl SourceArgs {
    fn source(&self) -> Result<SyncSource> {
        match (&self.user, &self.org) {
            (Some(user), None) => Ok(SyncSource::User(user.clone())),
            (None, Some(org)) => Ok(SyncSource::Org(org.clone())),
            _ => bail!("Exactly one of --user or --org is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Clone, update and report repositories of a user or organization
    Sync {
        #[command(flatten)]
        source: SourceArgs,

        /// Target directory (defaults to <base_directory>/<user or org>)
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Only sync repositories matching these patterns
        #[arg(short, long)]
        include: Vec<String>,

        /// Never sync repositories matching these patterns
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Include private repositories
        #[arg(long)]
        include_private: bool,

        /// Report what would happen without cloning or pulling
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the profiles stored in the configuration file
    SyncProfiles {
        /// Only run these profiles
        #[arg(long)]
        only: Vec<String>,

        /// Report what would happen without cloning or pulling
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete old releases (and their tags) from a repository
    Prune {
        /// Repository in OWNER/NAME form
        #[arg(long)]
        repo: String,

        /// Delete releases older than this many days
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Keep this many of the most recent releases
        #[arg(long)]
        keep: Option<usize>,

        /// Show the selection without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the remaining API quota
    RateLimit,

    /// List the repositories a sync would see
    List {
        #[command(flatten)]
        source: SourceArgs,

        /// Include private repositories
        #[arg(long)]
        include_private: bool,
    },
}

type Client = RetryingClient<GitHubClient>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting reposync v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancelToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match cli.command {
        Commands::Sync {
            source,
            target,
            include,
            exclude,
            include_private,
            dry_run,
        } => {
            let source = source.source()?;
            let options = sync_options(
                &config,
                &source,
                target,
                include,
                exclude,
                include_private,
                dry_run,
                cli.verbose,
            );
            cmd_sync(&config, cancel, source, options).await
        }
        Commands::SyncProfiles { only, dry_run } => {
            cmd_sync_profiles(&config, cancel, &only, dry_run, cli.verbose).await
        }
        Commands::Prune {
            repo,
            max_age_days,
            keep,
            dry_run,
        } => {
            let criteria = ReleaseFilterCriteria {
                max_age_days,
                keep_count: keep,
            };
            cmd_prune(&config, cancel, &repo, criteria, dry_run).await
        }
        Commands::RateLimit => cmd_rate_limit(&config).await,
        Commands::List {
            source,
            include_private,
        } => cmd_list(&config, cancel, source.source()?, include_private).await,
    }
}

/// Initialize logging: RUST_LOG first, then --verbose, then the configured level
fn init_logging(verbose: bool, configured_level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn spawn_ctrl_c_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling...");
            cancel.cancel();
        }
    });
}

fn github_client(config: &Config) -> Result<GitHubClient> {
    let credentials = credentials::resolve(&config.github.auth_method)?;
    let client = GitHubClient::with_api_url(credentials.token(), &config.github.api_url)
        .context("Failed to create GitHub client")?;

    Ok(match &config.github.username {
        Some(username) => client.with_login(username.as_str()),
        None => client,
    })
}

fn retrying_client(config: &Config, cancel: &CancelToken) -> Result<Arc<Client>> {
    let client = RetryingClient::new(github_client(config)?, config.retry_config())
        .with_cancel(cancel.clone());
    Ok(Arc::new(client))
}

#[allow(clippy::too_many_arguments)]
fn sync_options(
    config: &Config,
    source: &SyncSource,
    target: Option<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
    include_private: bool,
    dry_run: bool,
    verbose: bool,
) -> SyncOptions {
    let login = match source {
        SyncSource::User(login) | SyncSource::Org(login) => login,
    };
    let target = target.unwrap_or_else(|| config.target_for(login));
    let include = if include.is_empty() {
        config.sync.include.clone()
    } else {
        include
    };
    let exclude: Vec<String> = config.sync.exclude.iter().cloned().chain(exclude).collect();

    SyncOptions::new(target)
        .with_include(include)
        .with_exclude(exclude)
        .with_include_private(include_private || config.github.include_private)
        .with_dry_run(dry_run)
        .with_verbose(verbose)
}

fn syncer(
    config: &Config,
    cancel: &CancelToken,
) -> Result<Syncer<Client, GitCli, FsLister<GitCli>>> {
    let api = retrying_client(config, cancel)?;
    let git = GitCli {
        fast_forward_only: config.sync.fast_forward_only,
    };
    Ok(Syncer::new(api, git.clone(), FsLister::new(git)).with_cancel(cancel.clone()))
}

async fn cmd_sync(
    config: &Config,
    cancel: CancelToken,
    source: SyncSource,
    options: SyncOptions,
) -> Result<()> {
    let syncer = syncer(config, &cancel)?;

    println!("🔄 Syncing {} into {}", source, options.target.display());
    if options.dry_run {
        println!("🔍 Dry run mode - nothing will be cloned or pulled");
    }

    let report = syncer.run(&source, &options).await.map_err(sync_failure)?;
    print_report(&report);
    check_report(&report)
}

async fn cmd_sync_profiles(
    config: &Config,
    cancel: CancelToken,
    only: &[String],
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    let profiles = config.profiles(only, dry_run, verbose)?;
    if profiles.is_empty() {
        println!("⚠️  No profiles configured");
        return Ok(());
    }

    let syncer = syncer(config, &cancel)?;
    let outcomes = syncer.sync_profiles(&profiles).await;

    let mut failed_profiles = 0;
    let mut credentials_expired = false;
    let mut cancelled = false;

    for ProfileOutcome { name, result } in &outcomes {
        println!("\n📂 Profile: {}", name);
        match result {
            Ok(report) => {
                print_report(report);
                if !report.is_success() {
                    failed_profiles += 1;
                }
                credentials_expired |= report.credentials_expired();
            }
            Err(SyncError::Cancelled) => {
                println!("   🛑 Cancelled");
                cancelled = true;
            }
            Err(e) => {
                println!("   ❌ {}", e);
                failed_profiles += 1;
                credentials_expired |= e.is_auth_failure();
            }
        }
    }

    if cancelled {
        bail!("Sync cancelled");
    }
    if credentials_expired {
        return Err(CredentialsExpired {
            reason: "a profile was rejected by GitHub".to_string(),
        }
        .into());
    }
    if failed_profiles > 0 {
        bail!("{} of {} profiles had failures", failed_profiles, outcomes.len());
    }

    Ok(())
}

async fn cmd_prune(
    config: &Config,
    cancel: CancelToken,
    repo: &str,
    criteria: ReleaseFilterCriteria,
    dry_run: bool,
) -> Result<()> {
    let (owner, name) = repo
        .split_once('/')
        .filter(|(o, n)| !o.is_empty() && !n.is_empty())
        .ok_or_else(|| anyhow!("--repo must be in OWNER/NAME form, got '{}'", repo))?;

    if !criteria.is_active() {
        bail!("Nothing to prune: pass --max-age-days and/or --keep");
    }

    let pruner = Pruner::new(retrying_client(config, &cancel)?).with_cancel(cancel);

    println!("🧹 Pruning releases of {}/{}", owner, name);
    let report = pruner
        .prune(owner, name, &criteria, dry_run)
        .await
        .map_err(|e| match e {
            PruneError::Listing(api) if api.is_auth_failure() => CredentialsExpired {
                reason: api.to_string(),
            }
            .into(),
            other => anyhow::Error::from(other),
        })?;

    print_prune_report(&report);

    if report.credentials_expired() {
        return Err(CredentialsExpired {
            reason: "release deletion was rejected".to_string(),
        }
        .into());
    }
    if !report.is_success() {
        bail!("{} releases could not be deleted", report.failed.len());
    }
    Ok(())
}

async fn cmd_rate_limit(config: &Config) -> Result<()> {
    let client = github_client(config)?;
    let rate_limit = client.get_rate_limit().await?;

    println!("📊 GitHub API rate limit");
    println!("   Limit: {}", rate_limit.limit);
    println!("   Used: {}", rate_limit.used);
    println!("   Remaining: {}", rate_limit.remaining);
    println!(
        "   Resets at: {}",
        rate_limit.reset_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

async fn cmd_list(
    config: &Config,
    cancel: CancelToken,
    source: SyncSource,
    include_private: bool,
) -> Result<()> {
    let api = retrying_client(config, &cancel)?;
    let include_private = include_private || config.github.include_private;

    let listing = match &source {
        SyncSource::User(user) => cancel.guard(api.list_user_repos(user, include_private)).await,
        SyncSource::Org(org) => cancel.guard(api.list_org_repos(org, include_private)).await,
    }
    .ok_or_else(|| anyhow!("Listing cancelled"))?
    .map_err(|e| {
        if e.is_auth_failure() {
            anyhow::Error::from(CredentialsExpired {
                reason: e.to_string(),
            })
        } else {
            anyhow::Error::from(e)
        }
    })?;

    let filter = reposync::RepoFilter::new(config.sync.include.clone(), config.sync.exclude.clone());

    println!("Repositories of {} ({}):", source, listing.len());
    for repo in &listing {
        let mut markers = Vec::new();
        if repo.private {
            markers.push("🔒 private");
        }
        if repo.archived {
            markers.push("📦 archived");
        }
        if repo.fork {
            markers.push("🍴 fork");
        }
        if !filter.should_sync(&repo.name) {
            markers.push("⏭️  filtered");
        }

        if markers.is_empty() {
            println!("  📁 {}", repo.full_name());
        } else {
            println!("  📁 {} ({})", repo.full_name(), markers.join(", "));
        }
    }

    Ok(())
}

fn sync_failure(err: SyncError) -> anyhow::Error {
    match err {
        SyncError::Listing(api) if api.is_auth_failure() => CredentialsExpired {
            reason: api.to_string(),
        }
        .into(),
        other => other.into(),
    }
}

fn print_report(report: &SyncReport) {
    let section = |icon: &str, label: &str, names: &std::collections::BTreeSet<String>| {
        println!("   {} {}: {}", icon, label, names.len());
        for name in names {
            println!("      {}", name);
        }
    };

    println!("\n🎉 Synchronization Complete!");
    section("📥", "Cloned", &report.cloned);
    section("🔄", "Updated", &report.updated);
    section("✅", "Up to date", &report.skipped);
    section("📦", "Archived (kept locally)", &report.archived);

    println!("   ❌ Failed: {}", report.failed.len());
    let mut failures: Vec<_> = report.failed.iter().collect();
    failures.sort_by(|a, b| a.0.cmp(b.0));
    for (name, error) in failures {
        println!("      {}: {}", name, error);
    }
}

fn check_report(report: &SyncReport) -> Result<()> {
    if report.credentials_expired() {
        return Err(CredentialsExpired {
            reason: "GitHub rejected the token for some repositories".to_string(),
        }
        .into());
    }
    if !report.is_success() {
        bail!("{} repositories failed to sync", report.failed.len());
    }
    Ok(())
}

fn print_prune_report(report: &PruneReport) {
    if report.dry_run {
        println!(
            "🔍 Dry run: {} of {} releases would be deleted",
            report.selected.len(),
            report.total
        );
        for release in &report.selected {
            println!(
                "   🗑️  {} ({}, created {})",
                release.label(),
                release.tag_name,
                release.created_at.format("%Y-%m-%d")
            );
        }
        return;
    }

    println!(
        "\n🧹 Deleted {} of {} selected releases",
        report.deleted.len(),
        report.selected.len()
    );
    for release in &report.deleted {
        println!("   🗑️  {} ({})", release.label(), release.tag_name);
    }
    for failure in &report.failed {
        let what = if failure.release_deleted {
            "tag not deleted"
        } else {
            "release not deleted"
        };
        println!(
            "   ❌ {} ({}): {}: {}",
            failure.release.label(),
            failure.release.tag_name,
            what,
            failure.error
        );
    }
}
