//! Remote API port
//!
//! A capability interface over the hosting service. Implementations hide
//! pagination and report every failure as an [`ApiError`], so nothing above
//! this layer ever sees a raw transport error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::ApiError;

/// A repository as reported by the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    /// Short name, used for filtering and as the local directory name
    pub name: String,
    /// Owning user or organization login
    pub owner: String,
    pub private: bool,
    pub archived: bool,
    pub fork: bool,
    pub default_branch: Option<String>,
    pub clone_url: Option<String>,
    pub ssh_url: Option<String>,
}

impl RemoteRepository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            private: false,
            archived: false,
            fork: false,
            default_branch: Some("main".to_string()),
            clone_url: None,
            ssh_url: None,
        }
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_default_branch(mut self, branch: Option<&str>) -> Self {
        self.default_branch = branch.map(str::to_string);
        self
    }

    /// Display name in `owner/name` form
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// HTTPS clone URL, synthesized when the listing did not carry one.
    pub fn clone_url(&self) -> String {
        self.clone_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}/{}.git", self.owner, self.name))
    }
}

/// A published (or draft) release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub draft: bool,
    pub prerelease: bool,
}

impl Release {
    /// Human label: release name, falling back to the tag.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.tag_name)
    }
}

/// Core API quota snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

/// Capabilities the reconciler and the release pruner need from the remote.
///
/// Listing operations return the complete concatenated sequence across all
/// pages. Private repositories are only returned when `include_private` is set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_user_repos(
        &self,
        user: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError>;

    async fn list_org_repos(
        &self,
        org: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError>;

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RemoteRepository, ApiError>;

    /// SHA of the tip of `branch`.
    async fn get_branch_head(&self, owner: &str, name: &str, branch: &str)
        -> Result<String, ApiError>;

    async fn list_releases(&self, owner: &str, name: &str) -> Result<Vec<Release>, ApiError>;

    async fn delete_release(&self, owner: &str, name: &str, release_id: u64)
        -> Result<(), ApiError>;

    /// Delete `refs/tags/<tag>`.
    async fn delete_tag(&self, owner: &str, name: &str, tag: &str) -> Result<(), ApiError>;

    async fn get_rate_limit(&self) -> Result<RateLimit, ApiError>;
}

#[async_trait]
impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    async fn list_user_repos(
        &self,
        user: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        (**self).list_user_repos(user, include_private).await
    }

    async fn list_org_repos(
        &self,
        org: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        (**self).list_org_repos(org, include_private).await
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RemoteRepository, ApiError> {
        (**self).get_repository(owner, name).await
    }

    async fn get_branch_head(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<String, ApiError> {
        (**self).get_branch_head(owner, name, branch).await
    }

    async fn list_releases(&self, owner: &str, name: &str) -> Result<Vec<Release>, ApiError> {
        (**self).list_releases(owner, name).await
    }

    async fn delete_release(
        &self,
        owner: &str,
        name: &str,
        release_id: u64,
    ) -> Result<(), ApiError> {
        (**self).delete_release(owner, name, release_id).await
    }

    async fn delete_tag(&self, owner: &str, name: &str, tag: &str) -> Result<(), ApiError> {
        (**self).delete_tag(owner, name, tag).await
    }

    async fn get_rate_limit(&self) -> Result<RateLimit, ApiError> {
        (**self).get_rate_limit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_and_clone_url() {
        let repo = RemoteRepository::new("acme", "widgets");
        assert_eq!(repo.full_name(), "acme/widgets");
        assert_eq!(repo.clone_url(), "https://github.com/acme/widgets.git");

        let repo = RemoteRepository {
            clone_url: Some("https://example.com/acme/widgets.git".to_string()),
            ..repo
        };
        assert_eq!(repo.clone_url(), "https://example.com/acme/widgets.git");
    }

    #[test]
    fn test_release_label_falls_back_to_tag() {
        let mut release = Release {
            id: 1,
            tag_name: "v1.0.0".to_string(),
            name: Some(String::new()),
            created_at: Utc::now(),
            draft: false,
            prerelease: false,
        };
        assert_eq!(release.label(), "v1.0.0");

        release.name = Some("First".to_string());
        assert_eq!(release.label(), "First");
    }
}
