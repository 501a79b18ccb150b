//! Retry policy for remote operations.
//!
//! Only rate-limited failures are retried. Everything else is returned on the
//! first attempt. Waits between attempts grow exponentially and are
//! interrupted as soon as the run's [`CancelToken`] fires.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::ApiError;
use crate::remote::{RateLimit, Release, RemoteApi, RemoteRepository};

/// Backoff policy for rate-limited operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Delay before retry `attempt` (0-indexed, retries only):
    /// `min(initial_delay * multiplier^attempt, max_delay)`.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !seconds.is_finite() || seconds >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Run `operation`, retrying it while it fails with a rate-limit error.
///
/// At most `max_retries + 1` attempts are made; when they are exhausted the
/// last error is returned. The first attempt is never delayed.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancelToken,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_rate_limited() {
            return Err(err);
        }

        if attempt >= config.max_retries {
            warn!(
                "Giving up after {} attempts: {}",
                attempt + 1,
                err
            );
            return Err(err);
        }

        let delay = config.calculate_backoff(attempt);
        warn!(
            "Rate limited, retrying in {:?} (retry {} of {}): {}",
            delay,
            attempt + 1,
            config.max_retries,
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Backoff wait interrupted by cancellation");
                return Err(ApiError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// Decorator that routes every call of the wrapped client through
/// [`retry_with_backoff`].
///
/// Holds only immutable configuration and a cancel handle, so one instance
/// can be shared behind an `Arc` by several syncers.
pub struct RetryingClient<C> {
    inner: C,
    config: RetryConfig,
    cancel: CancelToken,
}

impl<C: RemoteApi> RetryingClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Interrupt backoff waits when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<C: RemoteApi> RemoteApi for RetryingClient<C> {
    async fn list_user_repos(
        &self,
        user: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || {
            inner.list_user_repos(user, include_private)
        })
        .await
    }

    async fn list_org_repos(
        &self,
        org: &str,
        include_private: bool,
    ) -> Result<Vec<RemoteRepository>, ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || {
            inner.list_org_repos(org, include_private)
        })
        .await
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RemoteRepository, ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || inner.get_repository(owner, name)).await
    }

    async fn get_branch_head(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<String, ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || {
            inner.get_branch_head(owner, name, branch)
        })
        .await
    }

    async fn list_releases(&self, owner: &str, name: &str) -> Result<Vec<Release>, ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || inner.list_releases(owner, name)).await
    }

    async fn delete_release(
        &self,
        owner: &str,
        name: &str,
        release_id: u64,
    ) -> Result<(), ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || {
            inner.delete_release(owner, name, release_id)
        })
        .await
    }

    async fn delete_tag(&self, owner: &str, name: &str, tag: &str) -> Result<(), ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || inner.delete_tag(owner, name, tag)).await
    }

    async fn get_rate_limit(&self) -> Result<RateLimit, ApiError> {
        let inner = &self.inner;
        retry_with_backoff(&self.config, &self.cancel, || inner.get_rate_limit()).await
    }
}
