use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{classify, ApiError, RateLimitSignal, TransportFailure};
use crate::remote::{RateLimit, Release, RemoteApi, RemoteRepository};

/// Public GitHub REST endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: u32 = 100;

/// GitHub REST client implementing [`RemoteApi`].
///
/// Listing, lookup and deletion go through reqwest so response headers are
/// available for pagination and rate-limit detection. Quota lookups use
/// octocrab.
pub struct GitHubClient {
    octocrab: Octocrab,
    http: reqwest::Client,
    token: String,
    api_url: String,
    /// Login owning the token, resolved on first use unless preset
    login: OnceCell<String>,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("login", &self.login.get())
            .finish()
    }
}

/// Repository payload (subset of the REST representation)
#[derive(Debug, Deserialize)]
struct RepoPayload {
    name: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    owner: Option<OwnerPayload>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    clone_url: Option<String>,
    #[serde(default)]
    ssh_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    id: u64,
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    commit: CommitPayload,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: String,
}

/// Error body returned by the REST API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl From<RepoPayload> for RemoteRepository {
    fn from(payload: RepoPayload) -> Self {
        let owner = payload
            .owner
            .map(|o| o.login)
            .or_else(|| {
                payload
                    .full_name
                    .as_deref()
                    .and_then(|full| full.split_once('/'))
                    .map(|(owner, _)| owner.to_string())
            })
            .unwrap_or_default();

        RemoteRepository {
            name: payload.name,
            owner,
            private: payload.private,
            archived: payload.archived,
            fork: payload.fork,
            default_branch: payload.default_branch,
            clone_url: payload.clone_url,
            ssh_url: payload.ssh_url,
        }
    }
}

impl From<ReleasePayload> for Release {
    fn from(payload: ReleasePayload) -> Self {
        Release {
            id: payload.id,
            tag_name: payload.tag_name,
            name: payload.name,
            created_at: payload.created_at,
            draft: payload.draft,
            prerelease: payload.prerelease,
        }
    }
}

impl GitHubClient {
    /// Create a client against the public GitHub API
    pub fn new(token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    /// Create a client against a specific API root (GitHub Enterprise, tests)
    pub fn with_api_url(token: impl Into<String>, api_url: &str) -> Result<Self, ApiError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ApiError::Unauthorized {
                message: "empty GitHub token".to_string(),
            });
        }

        let api_url = api_url.trim_end_matches('/').to_string();

        let octocrab = Octocrab::builder()
            .personal_token(token.clone())
            .base_uri(api_url.as_str())
            .map_err(from_octocrab)?
            .build()
            .map_err(from_octocrab)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("reposync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::api(None, format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            octocrab,
            http,
            token,
            api_url,
            login: OnceCell::new(),
        })
    }

    /// Use `login` as the token owner instead of asking the API
    pub fn with_login(self, login: impl Into<String>) -> Self {
        Self {
            login: OnceCell::new_with(Some(login.into())),
            ..self
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Login of the user owning the token
    pub async fn authenticated_user(&self) -> Result<String, ApiError> {
        let (user, _): (UserPayload, _) = self.get_page(&format!("{}/user", self.api_url)).await?;
        info!("Authenticated as GitHub user: {}", user.login);
        Ok(user.login)
    }

    /// Token owner login, looked up once per client
    pub async fn token_owner(&self) -> Result<&str, ApiError> {
        self.login
            .get_or_try_init(|| self.authenticated_user())
            .await
            .map(String::as_str)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "reposync")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
    }

    /// Fetch one page and return it with the `rel="next"` URL, if any.
    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<(T, Option<String>), ApiError> {
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure_from_response(response).await);
        }

        let next = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_url);

        let data = response.json::<T>().await.map_err(|e| {
            ApiError::api(Some(status.as_u16()), format!("invalid response body: {}", e))
        })?;

        Ok((data, next))
    }

    /// Follow the pagination cursor until exhausted.
    async fn get_all_pages<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut page = 0u32;

        while let Some(url) = next.take() {
            page += 1;
            debug!("Fetching page {}: {}", page, url);
            let (batch, following): (Vec<T>, _) = self.get_page(&url).await?;
            items.extend(batch);
            next = following;
        }

        debug!("Fetched {} items across {} pages", items.len(), page);
        Ok(items)
    }

    async fn delete(&self, url: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(from_reqwest)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(failure_from_response(response).await)
        }
    }

    fn repos_url(&self, owner: &str, name: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, owner, name)
    }

    /// Build an API URL from path segments, percent-encoding each one.
    /// A `/` inside a segment stays a path separator (`feature/login`).
    fn endpoint(&self, segments: &[&str]) -> Result<String, ApiError> {
        let invalid = || ApiError::api(None, format!("invalid API URL: {}", self.api_url));

        let mut url = reqwest::Url::parse(&self.api_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments.iter().flat_map(|segment| segment.split('/')));
        Ok(url.into())
    }
}

#[async_trait]
impl RemoteApi for GitHubClient {
    async fn list_user_repos(
        &self,
        user: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        debug!("Fetching repositories for user: {}", user);

        // Private repositories are only visible through the authenticated
        // endpoint, which lists the token owner's repositories (and those of
        // others they collaborate on). Any other user gets the public listing.
        let own_account = include_private && self.token_owner().await?.eq_ignore_ascii_case(user);
        let url = if own_account {
            format!(
                "{}/user/repos?affiliation=owner&visibility=all&per_page={}",
                self.api_url, PER_PAGE
            )
        } else {
            format!(
                "{}/users/{}/repos?type=owner&per_page={}",
                self.api_url, user, PER_PAGE
            )
        };

        let payloads: Vec<RepoPayload> = self.get_all_pages(url).await?;
        let repositories: Vec<RemoteRepository> = payloads
            .into_iter()
            .map(RemoteRepository::from)
            .filter(|repo| repo.owner.eq_ignore_ascii_case(user))
            .filter(|repo| include_private || !repo.private)
            .collect();

        info!("Found {} repositories for user: {}", repositories.len(), user);
        Ok(repositories)
    }

    async fn list_org_repos(
        &self,
        org: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        debug!("Fetching repositories for organization: {}", org);

        let url = format!("{}/orgs/{}/repos?type=all&per_page={}", self.api_url, org, PER_PAGE);
        let payloads: Vec<RepoPayload> = self.get_all_pages(url).await?;
        let repositories: Vec<RemoteRepository> = payloads
            .into_iter()
            .map(RemoteRepository::from)
            .filter(|repo| include_private || !repo.private)
            .collect();

        info!(
            "Found {} repositories for organization: {}",
            repositories.len(),
            org
        );
        Ok(repositories)
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RemoteRepository, ApiError> {
        let (payload, _): (RepoPayload, _) = self.get_page(&self.repos_url(owner, name)).await?;
        Ok(payload.into())
    }

    async fn get_branch_head(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<String, ApiError> {
        let url = self.endpoint(&["repos", owner, name, "branches", branch])?;
        let (payload, _): (BranchPayload, _) = self.get_page(&url).await?;
        Ok(payload.commit.sha)
    }

    async fn list_releases(&self, owner: &str, name: &str) -> Result<Vec<Release>, ApiError> {
        let url = format!("{}/releases?per_page={}", self.repos_url(owner, name), PER_PAGE);
        let payloads: Vec<ReleasePayload> = self.get_all_pages(url).await?;
        Ok(payloads.into_iter().map(Release::from).collect())
    }

    async fn delete_release(
        &self,
        owner: &str,
        name: &str,
        release_id: u64,
    ) -> Result<(), ApiError> {
        let url = format!("{}/releases/{}", self.repos_url(owner, name), release_id);
        self.delete(&url).await
    }

    async fn delete_tag(&self, owner: &str, name: &str, tag: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["repos", owner, name, "git", "refs", "tags", tag])?;
        self.delete(&url).await
    }

    async fn get_rate_limit(&self) -> Result<RateLimit, ApiError> {
        let rate_limit = self.octocrab.ratelimit().get().await.map_err(from_octocrab)?;
        let core = &rate_limit.resources.core;

        Ok(RateLimit {
            limit: core.limit as u64,
            remaining: core.remaining as u64,
            used: core.limit.saturating_sub(core.remaining) as u64,
            reset_at: DateTime::from_timestamp(core.reset as i64, 0).unwrap_or_else(Utc::now),
        })
    }
}

/// Read typed rate-limit metadata from response headers.
///
/// `x-ratelimit-remaining: 0` marks an exhausted primary quota; a
/// `retry-after` header marks a secondary (abuse) limit.
pub fn rate_limit_signal(headers: &HeaderMap) -> Option<RateLimitSignal> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    let exhausted = header("x-ratelimit-remaining") == Some("0");
    let retry_after = header("retry-after")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    if !exhausted && retry_after.is_none() {
        return None;
    }

    let reset_at = header("x-ratelimit-reset")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Some(RateLimitSignal {
        reset_at,
        retry_after,
    })
}

/// Extract the `rel="next"` URL from a Link header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/orgs/acme/repos?page=2>; rel="next", <...&page=5>; rel="last"`
pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let mut url = None;
        let mut is_next = false;

        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel) = segment.strip_prefix("rel=") {
                is_next = rel.trim_matches('"').split_whitespace().any(|r| r == "next");
            }
        }

        if is_next {
            url.map(str::to_string)
        } else {
            None
        }
    })
}

async fn failure_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let signal = rate_limit_signal(response.headers());
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        message
    };

    let mut failure = TransportFailure::new(Some(status.as_u16()), message);
    if let Some(signal) = signal {
        failure = failure.with_rate_limit(signal);
    }

    let err = classify(failure);
    debug!("Request failed with {}: {}", status, err);
    err
}

fn from_reqwest(err: reqwest::Error) -> ApiError {
    let status = err.status().map(|s: StatusCode| s.as_u16());
    classify(TransportFailure::new(status, err.to_string()))
}

/// Classify an octocrab error.
///
/// Without response headers, the documentation link GitHub attaches to
/// rate-limit responses is the typed signal.
pub fn from_octocrab(err: octocrab::Error) -> ApiError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            let mut failure =
                TransportFailure::new(Some(source.status_code.as_u16()), source.message.clone());
            let rate_limit_doc = source
                .documentation_url
                .as_deref()
                .map(|url| url.contains("rate-limit") || url.contains("rate_limit"))
                .unwrap_or(false);
            if rate_limit_doc {
                failure = failure.with_rate_limit(RateLimitSignal::default());
            }
            classify(failure)
        }
        other => classify(TransportFailure::new(None, other.to_string())),
    }
}
