//! Hand-written fakes shared by the integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reposync::{
    ApiError, DirectoryLister, GitOperations, LocalClone, RateLimit, Release, RemoteApi,
    RemoteRepository,
};

/// Fixed point in time used by release fixtures
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn release_aged(id: u64, days: i64) -> Release {
    Release {
        id,
        tag_name: format!("v0.{}.0", id),
        name: Some(format!("Release {}", id)),
        created_at: fixed_now() - Duration::days(days),
        draft: false,
        prerelease: false,
    }
}

/// In-memory remote with scripted failures and a call log
#[derive(Default)]
pub struct FakeRemote {
    pub repos: Vec<RemoteRepository>,
    /// Branch head per repository name
    pub heads: HashMap<String, String>,
    /// Errors returned by `get_branch_head` per repository name
    pub head_errors: HashMap<String, ApiError>,
    /// Repositories whose `get_branch_head` never completes
    pub hanging: HashSet<String>,
    /// Errors returned by listing calls, consumed front to back
    pub listing_errors: Mutex<VecDeque<ApiError>>,
    pub releases: Vec<Release>,
    pub release_delete_errors: HashMap<u64, ApiError>,
    pub tag_delete_errors: HashMap<String, ApiError>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn with_repos<I, S>(owner: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            repos: names
                .into_iter()
                .map(|n| RemoteRepository::new(owner, n.as_ref()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn head(mut self, name: &str, sha: &str) -> Self {
        self.heads.insert(name.to_string(), sha.to_string());
        self
    }

    pub fn failing_head(mut self, name: &str, error: ApiError) -> Self {
        self.head_errors.insert(name.to_string(), error);
        self
    }

    pub fn hanging_head(mut self, name: &str) -> Self {
        self.hanging.insert(name.to_string());
        self
    }

    pub fn failing_listing(self, errors: Vec<ApiError>) -> Self {
        *self.listing_errors.lock().unwrap() = errors.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn listing(&self, owner: &str, include_private: bool) -> Result<Vec<RemoteRepository>, ApiError> {
        if let Some(err) = self.listing_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self
            .repos
            .iter()
            .filter(|r| r.owner == owner)
            .filter(|r| include_private || !r.private)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn list_user_repos(
        &self,
        user: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        self.log(format!("list_user_repos {}", user));
        self.listing(user, include_private)
    }

    async fn list_org_repos(
        &self,
        org: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        self.log(format!("list_org_repos {}", org));
        self.listing(org, include_private)
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RemoteRepository, ApiError> {
        self.log(format!("get_repository {}/{}", owner, name));
        self.repos
            .iter()
            .find(|r| r.owner == owner && r.name == name)
            .cloned()
            .ok_or_else(|| ApiError::not_found("Not Found"))
    }

    async fn get_branch_head(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<String, ApiError> {
        self.log(format!("get_branch_head {}/{}@{}", owner, name, branch));
        if self.hanging.contains(name) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.head_errors.get(name) {
            return Err(err.clone());
        }
        self.heads
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::not_found("Branch not found"))
    }

    async fn list_releases(&self, owner: &str, name: &str) -> Result<Vec<Release>, ApiError> {
        self.log(format!("list_releases {}/{}", owner, name));
        Ok(self.releases.clone())
    }

    async fn delete_release(
        &self,
        owner: &str,
        name: &str,
        release_id: u64,
    ) -> Result<(), ApiError> {
        self.log(format!("delete_release {}/{} {}", owner, name, release_id));
        match self.release_delete_errors.get(&release_id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn delete_tag(&self, owner: &str, name: &str, tag: &str) -> Result<(), ApiError> {
        self.log(format!("delete_tag {}/{} {}", owner, name, tag));
        match self.tag_delete_errors.get(tag) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn get_rate_limit(&self) -> Result<RateLimit, ApiError> {
        Ok(RateLimit {
            limit: 5000,
            remaining: 5000,
            used: 0,
            reset_at: fixed_now(),
        })
    }
}

/// Records git invocations; fails for configured directory names
#[derive(Default)]
pub struct FakeGit {
    pub fail_clone: HashSet<String>,
    pub fail_pull: HashSet<String>,
    pub lfs_repos: HashSet<String>,
    pub ops: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn failing_clone(mut self, name: &str) -> Self {
        self.fail_clone.insert(name.to_string());
        self
    }

    pub fn failing_pull(mut self, name: &str) -> Self {
        self.fail_pull.insert(name.to_string());
        self
    }

    pub fn with_lfs(mut self, name: &str) -> Self {
        self.lfs_repos.insert(name.to_string());
        self
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: &str, path: &Path) -> String {
        let name = dir_name(path);
        self.ops.lock().unwrap().push(format!("{} {}", op, name));
        name
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl GitOperations for FakeGit {
    async fn clone_repository(&self, _url: &str, path: &Path) -> Result<()> {
        let name = self.record("clone", path);
        if self.fail_clone.contains(&name) {
            return Err(anyhow!("Git clone failed: repository not found"));
        }
        Ok(())
    }

    async fn pull(&self, path: &Path) -> Result<()> {
        let name = self.record("pull", path);
        if self.fail_pull.contains(&name) {
            return Err(anyhow!("Git pull failed: Not possible to fast-forward"));
        }
        Ok(())
    }

    async fn local_head_sha(&self, path: &Path) -> Result<String> {
        Ok(format!("head-{}", dir_name(path)))
    }

    async fn detect_and_configure_lfs(&self, path: &Path) -> Result<bool> {
        let name = self.record("lfs", path);
        Ok(self.lfs_repos.contains(&name))
    }
}

/// Returns a fixed local snapshot, or a scan error
pub struct FakeLister {
    pub clones: Vec<LocalClone>,
    pub error: Option<String>,
}

impl FakeLister {
    /// `(name, head)` pairs under `target`
    pub fn new(target: &Path, clones: &[(&str, &str)]) -> Self {
        Self {
            clones: clones
                .iter()
                .map(|(name, head)| {
                    LocalClone::new(*name, target.join(name), Some(head.to_string()))
                })
                .collect(),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            clones: Vec::new(),
            error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            clones: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl DirectoryLister for FakeLister {
    async fn list_clones(&self, _target: &Path) -> Result<Vec<LocalClone>> {
        match &self.error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.clones.clone()),
        }
    }
}

pub fn target() -> PathBuf {
    PathBuf::from("/srv/mirror/acme")
}
