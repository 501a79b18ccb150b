//! Reconciler - computes and applies clone/update/skip/archive actions
//!
//! A run lists the remote repositories of one user or organization, filters
//! them, compares each candidate with the local snapshot and hands the
//! resulting action to the git collaborator. Every outcome is accumulated in a
//! [`SyncReport`]; a failing repository never aborts the run.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ApiError;
use crate::git::GitOperations;
use crate::glob::RepoFilter;
use crate::local::{DirectoryLister, LocalClone};
use crate::remote::{RemoteApi, RemoteRepository};

/// Per-decision logging: `info` when the run is verbose, `debug` otherwise.
macro_rules! decision {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

/// Whose repositories a run mirrors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSource {
    User(String),
    Org(String),
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::User(login) => write!(f, "user {}", login),
            SyncSource::Org(org) => write!(f, "organization {}", org),
        }
    }
}

/// Everything one run needs to know about the caller's intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Directory holding one clone per repository, named after the repository
    pub target: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub include_private: bool,
    /// Classify without touching the filesystem
    pub dry_run: bool,
    pub verbose: bool,
}

impl SyncOptions {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            include_private: false,
            dry_run: false,
            verbose: false,
        }
    }

    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_include_private(mut self, include_private: bool) -> Self {
        self.include_private = include_private;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn filter(&self) -> RepoFilter {
        RepoFilter::new(self.include.clone(), self.exclude.clone())
    }
}

/// A named, stored sync configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub source: SyncSource,
    pub options: SyncOptions,
}

/// What the reconciler does with one candidate repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Clone,
    Update,
    Skip,
}

/// Decide the action for a candidate from its local clone and remote head.
///
/// `remote_head` is `None` when the remote has no default branch (an empty
/// repository); there is nothing to pull in that case.
pub fn decide(local: Option<&LocalClone>, remote_head: Option<&str>) -> Action {
    let Some(local) = local else {
        return Action::Clone;
    };

    match remote_head {
        None => Action::Skip,
        Some(remote) if local.head_sha.as_deref() == Some(remote) => Action::Skip,
        Some(_) => Action::Update,
    }
}

/// Terminal state of one repository in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Cloned,
    Updated,
    Skipped,
    Archived,
}

impl From<Action> for Outcome {
    fn from(action: Action) -> Self {
        match action {
            Action::Clone => Outcome::Cloned,
            Action::Update => Outcome::Updated,
            Action::Skip => Outcome::Skipped,
        }
    }
}

/// Failure of a single repository
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{0:#}")]
    Git(anyhow::Error),
}

impl RepoError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RepoError::Api(e) if e.is_auth_failure())
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, RepoError::Api(ApiError::Cancelled))
    }
}

/// Failure of a whole run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list repositories: {0}")]
    Listing(#[source] ApiError),

    /// The target directory exists but could not be scanned
    #[error("failed to scan local clones: {0:#}")]
    Snapshot(anyhow::Error),

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Listing(e) if e.is_auth_failure())
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Cancelled => SyncError::Cancelled,
            other => SyncError::Listing(other),
        }
    }
}

/// Accumulated outcome of one run. Each repository name is recorded once.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub cloned: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
    pub archived: BTreeSet<String>,
    pub failed: HashMap<String, RepoError>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` already has an outcome
    pub fn contains(&self, name: &str) -> bool {
        self.cloned.contains(name)
            || self.updated.contains(name)
            || self.skipped.contains(name)
            || self.archived.contains(name)
            || self.failed.contains_key(name)
    }

    /// Record a successful outcome. Returns `false` if `name` was already decided.
    pub fn record(&mut self, name: &str, outcome: Outcome) -> bool {
        if self.contains(name) {
            warn!("Outcome for {} already recorded, ignoring {:?}", name, outcome);
            return false;
        }

        let set = match outcome {
            Outcome::Cloned => &mut self.cloned,
            Outcome::Updated => &mut self.updated,
            Outcome::Skipped => &mut self.skipped,
            Outcome::Archived => &mut self.archived,
        };
        set.insert(name.to_string())
    }

    /// Record a failure. Returns `false` if `name` was already decided.
    pub fn record_failure(&mut self, name: &str, error: RepoError) -> bool {
        if self.contains(name) {
            warn!("Outcome for {} already recorded, ignoring failure: {}", name, error);
            return false;
        }
        self.failed.insert(name.to_string(), error);
        true
    }

    /// Any failure means the token was rejected and must be renewed.
    pub fn credentials_expired(&self) -> bool {
        self.failed.values().any(RepoError::is_auth_failure)
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.cloned.len()
            + self.updated.len()
            + self.skipped.len()
            + self.archived.len()
            + self.failed.len()
    }
}

/// Result of one profile in a batch
#[derive(Debug)]
pub struct ProfileOutcome {
    pub name: String,
    pub result: Result<SyncReport, SyncError>,
}

/// The reconciler, generic over its three collaborators
pub struct Syncer<R: ?Sized, G, L> {
    api: Arc<R>,
    git: G,
    lister: L,
    cancel: CancelToken,
}

impl<R, G, L> Syncer<R, G, L>
where
    R: RemoteApi + ?Sized,
    G: GitOperations,
    L: DirectoryLister,
{
    pub fn new(api: Arc<R>, git: G, lister: L) -> Self {
        Self {
            api,
            git,
            lister,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run one reconciliation of `source` into `options.target`.
    pub async fn run(
        &self,
        source: &SyncSource,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let start_time = Instant::now();
        info!(
            "Starting sync of {} into {}{}",
            source,
            options.target.display(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let listing = self.list(source, options.include_private).await?;
        let filter = options.filter();
        let candidates: Vec<&RemoteRepository> =
            listing.iter().filter(|repo| filter.should_sync(&repo.name)).collect();

        info!(
            "{} of {} repositories selected by filters",
            candidates.len(),
            listing.len()
        );

        let local_clones = self
            .cancel
            .guard(self.lister.list_clones(&options.target))
            .await
            .ok_or(SyncError::Cancelled)?
            .map_err(|e| {
                SyncError::Snapshot(e.context(format!("reading {}", options.target.display())))
            })?;
        let local_by_name: HashMap<&str, &LocalClone> =
            local_clones.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut report = SyncReport::new();

        for repo in candidates {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let local = local_by_name.get(repo.name.as_str()).copied();
            match self.sync_repository(repo, local, options).await {
                Ok(outcome) => {
                    report.record(&repo.name, outcome);
                }
                Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!("Failed to sync {}: {}", repo.full_name(), e);
                    report.record_failure(&repo.name, e);
                }
            }
        }

        // Archived detection compares against the unfiltered listing, so a
        // repository that is merely filtered out is not reported.
        let remote_names: HashSet<&str> = listing.iter().map(|r| r.name.as_str()).collect();
        for clone in &local_clones {
            if !remote_names.contains(clone.name.as_str()) {
                decision!(
                    options.verbose,
                    "{} is no longer on the remote, keeping it as archived",
                    clone.name
                );
                report.record(&clone.name, Outcome::Archived);
            }
        }

        info!(
            "Sync of {} completed in {:.2}s: {} cloned, {} updated, {} skipped, {} archived, {} failed",
            source,
            start_time.elapsed().as_secs_f64(),
            report.cloned.len(),
            report.updated.len(),
            report.skipped.len(),
            report.archived.len(),
            report.failed.len()
        );

        Ok(report)
    }

    /// Run each profile independently. Only cancellation stops the batch.
    pub async fn sync_profiles(&self, profiles: &[Profile]) -> Vec<ProfileOutcome> {
        let mut outcomes = Vec::with_capacity(profiles.len());

        for profile in profiles {
            info!("Running profile: {}", profile.name);
            let result = self.run(&profile.source, &profile.options).await;

            let cancelled = matches!(result, Err(SyncError::Cancelled));
            if let Err(e) = &result {
                warn!("Profile {} failed: {}", profile.name, e);
            }

            outcomes.push(ProfileOutcome {
                name: profile.name.clone(),
                result,
            });

            if cancelled {
                break;
            }
        }

        outcomes
    }

    async fn list(
        &self,
        source: &SyncSource,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, SyncError> {
        let listing = match source {
            SyncSource::User(login) => {
                self.cancel
                    .guard(self.api.list_user_repos(login, include_private))
                    .await
            }
            SyncSource::Org(org) => {
                self.cancel
                    .guard(self.api.list_org_repos(org, include_private))
                    .await
            }
        };

        Ok(listing.ok_or(SyncError::Cancelled)??)
    }

    async fn sync_repository(
        &self,
        repo: &RemoteRepository,
        local: Option<&LocalClone>,
        options: &SyncOptions,
    ) -> Result<Outcome, RepoError> {
        let path = options.target.join(&repo.name);

        let remote_head = match (local, repo.default_branch.as_deref()) {
            (Some(_), Some(branch)) => Some(
                self.cancel
                    .guard(self.api.get_branch_head(&repo.owner, &repo.name, branch))
                    .await
                    .ok_or(ApiError::Cancelled)??,
            ),
            _ => None,
        };

        let action = decide(local, remote_head.as_deref());
        decision!(
            options.verbose,
            "{}: {:?}{}",
            repo.full_name(),
            action,
            if options.dry_run { " (dry run)" } else { "" }
        );

        if options.dry_run {
            return Ok(action.into());
        }

        match action {
            Action::Clone => {
                let url = repo.clone_url();
                self.cancel
                    .guard(self.git.clone_repository(&url, &path))
                    .await
                    .ok_or(ApiError::Cancelled)?
                    .map_err(RepoError::Git)?;

                match self
                    .cancel
                    .guard(self.git.detect_and_configure_lfs(&path))
                    .await
                    .ok_or(ApiError::Cancelled)?
                {
                    Ok(true) => decision!(options.verbose, "{}: Git LFS configured", repo.name),
                    Ok(false) => {}
                    Err(e) => warn!("Failed to configure Git LFS for {}: {:#}", repo.name, e),
                }
            }
            Action::Update => {
                self.cancel
                    .guard(self.git.pull(&path))
                    .await
                    .ok_or(ApiError::Cancelled)?
                    .map_err(RepoError::Git)?;
            }
            Action::Skip => {}
        }

        Ok(action.into())
    }
}
