//! Release pruning
//!
//! Selection is a pure function of the release listing, the criteria and the
//! current time. Deleting a release removes the release object first and its
//! tag reference second.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::ApiError;
use crate::remote::{Release, RemoteApi};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Which releases to keep. A release is pruned when it fails any active test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseFilterCriteria {
    /// Prune releases older than this many days (rounded up)
    pub max_age_days: Option<u32>,
    /// Keep only this many of the most recent releases
    pub keep_count: Option<usize>,
}

impl ReleaseFilterCriteria {
    pub fn is_active(&self) -> bool {
        self.max_age_days.is_some() || self.keep_count.is_some()
    }
}

/// Whole days since `created_at`, rounded up. Releases from the future are 0 days old.
pub fn age_in_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let seconds = (now - created_at).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    ((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY) as u64
}

/// Select the releases to delete, newest first.
///
/// Releases are ranked by creation time (rank 1 is the newest). The count test
/// runs first; a release it selects is not evaluated against the age test.
/// The age test is strict: a release is pruned only when its age in whole
/// days, rounded up, is greater than `max_age_days`.
pub fn select_releases(
    releases: &[Release],
    criteria: &ReleaseFilterCriteria,
    now: DateTime<Utc>,
) -> Vec<Release> {
    let mut ranked: Vec<&Release> = releases.iter().collect();
    ranked.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    ranked
        .into_iter()
        .enumerate()
        .filter(|(index, release)| {
            let rank = index + 1;
            if let Some(keep) = criteria.keep_count {
                if rank > keep {
                    return true;
                }
            }
            match criteria.max_age_days {
                Some(max_age) => age_in_days(release.created_at, now) > u64::from(max_age),
                None => false,
            }
        })
        .map(|(_, release)| release.clone())
        .collect()
}

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("failed to list releases: {0}")]
    Listing(#[source] ApiError),

    #[error("prune cancelled")]
    Cancelled,
}

impl From<ApiError> for PruneError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Cancelled => PruneError::Cancelled,
            other => PruneError::Listing(other),
        }
    }
}

/// A release whose deletion did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub release: Release,
    /// The release object itself was removed and only the tag remained
    pub release_deleted: bool,
    pub error: ApiError,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    /// Releases examined
    pub total: usize,
    pub selected: Vec<Release>,
    pub deleted: Vec<Release>,
    pub failed: Vec<DeletionFailure>,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn credentials_expired(&self) -> bool {
        self.failed.iter().any(|f| f.error.is_auth_failure())
    }
}

pub struct Pruner<R: ?Sized> {
    api: Arc<R>,
    cancel: CancelToken,
}

impl<R: RemoteApi + ?Sized> Pruner<R> {
    pub fn new(api: Arc<R>) -> Self {
        Self {
            api,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn prune(
        &self,
        owner: &str,
        repo: &str,
        criteria: &ReleaseFilterCriteria,
        dry_run: bool,
    ) -> Result<PruneReport, PruneError> {
        self.prune_at(owner, repo, criteria, dry_run, Utc::now()).await
    }

    /// [`prune`](Self::prune) with an explicit clock.
    pub async fn prune_at(
        &self,
        owner: &str,
        repo: &str,
        criteria: &ReleaseFilterCriteria,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<PruneReport, PruneError> {
        let releases = self
            .cancel
            .guard(self.api.list_releases(owner, repo))
            .await
            .ok_or(PruneError::Cancelled)??;

        let selected = select_releases(&releases, criteria, now);
        info!(
            "{} of {} releases in {}/{} selected for deletion",
            selected.len(),
            releases.len(),
            owner,
            repo
        );

        let mut report = PruneReport {
            total: releases.len(),
            selected: selected.clone(),
            dry_run,
            ..Default::default()
        };

        if dry_run {
            for release in &selected {
                info!("Would delete release {} ({})", release.label(), release.tag_name);
            }
            return Ok(report);
        }

        for release in selected {
            if self.cancel.is_cancelled() {
                return Err(PruneError::Cancelled);
            }

            debug!("Deleting release {} ({})", release.label(), release.id);
            if let Err(error) = self.call(self.api.delete_release(owner, repo, release.id)).await? {
                warn!("Failed to delete release {}: {}", release.label(), error);
                report.failed.push(DeletionFailure {
                    release,
                    release_deleted: false,
                    error,
                });
                continue;
            }

            debug!("Deleting tag {}", release.tag_name);
            if let Err(error) = self.call(self.api.delete_tag(owner, repo, &release.tag_name)).await? {
                warn!(
                    "Release {} deleted but tag {} was not: {}",
                    release.label(),
                    release.tag_name,
                    error
                );
                report.failed.push(DeletionFailure {
                    release,
                    release_deleted: true,
                    error,
                });
                continue;
            }

            info!("Deleted release {} ({})", release.label(), release.tag_name);
            report.deleted.push(release);
        }

        Ok(report)
    }

    /// Run a deletion under the cancel token. The outer error is cancellation.
    async fn call<F>(&self, future: F) -> Result<Result<(), ApiError>, PruneError>
    where
        F: std::future::Future<Output = Result<(), ApiError>>,
    {
        match self.cancel.guard(future).await {
            None | Some(Err(ApiError::Cancelled)) => Err(PruneError::Cancelled),
            Some(result) => Ok(result),
        }
    }
}
