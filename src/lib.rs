//! reposync - keep local clones of GitHub repositories in sync
//!
//! reposync mirrors every repository of a user or organization into a target
//! directory, cloning what is missing, pulling what moved and reporting local
//! clones whose remote disappeared. It also prunes old releases.
//!
//! ## Modules
//!
//! - [`remote`]: the `RemoteApi` capability interface and its models
//! - [`github`]: GitHub REST implementation with pagination and error classification
//! - [`retry`]: backoff policy and the retrying `RemoteApi` decorator
//! - [`sync`]: the reconciler and its report
//! - [`prune`]: release selection and deletion
//! - [`config`]: YAML configuration and stored profiles

pub mod cancel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod github;
pub mod glob;
pub mod local;
pub mod prune;
pub mod remote;
pub mod retry;
pub mod sync;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{ApiError, ErrorKind};
pub use git::{GitCli, GitOperations};
pub use github::GitHubClient;
pub use glob::RepoFilter;
pub use local::{DirectoryLister, FsLister, LocalClone};
pub use prune::{Pruner, PruneReport, ReleaseFilterCriteria};
pub use remote::{RateLimit, Release, RemoteApi, RemoteRepository};
pub use retry::{RetryConfig, RetryingClient};
pub use sync::{Profile, SyncOptions, SyncReport, SyncSource, Syncer};
