use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

/// Working-tree operations the reconciler needs from git.
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Clone `url` into `path`. The parent directory is created if missing.
    async fn clone_repository(&self, url: &str, path: &Path) -> Result<()>;

    /// Bring the checked-out branch up to date with its upstream.
    async fn pull(&self, path: &Path) -> Result<()>;

    /// SHA of `HEAD` in the clone at `path`.
    async fn local_head_sha(&self, path: &Path) -> Result<String>;

    /// Set up Git LFS when the clone declares LFS-tracked paths.
    /// Returns whether LFS was configured.
    async fn detect_and_configure_lfs(&self, path: &Path) -> Result<bool>;
}

#[async_trait]
impl<T: GitOperations + ?Sized> GitOperations for Arc<T> {
    async fn clone_repository(&self, url: &str, path: &Path) -> Result<()> {
        (**self).clone_repository(url, path).await
    }

    async fn pull(&self, path: &Path) -> Result<()> {
        (**self).pull(path).await
    }

    async fn local_head_sha(&self, path: &Path) -> Result<String> {
        (**self).local_head_sha(path).await
    }

    async fn detect_and_configure_lfs(&self, path: &Path) -> Result<bool> {
        (**self).detect_and_configure_lfs(path).await
    }
}

/// [`GitOperations`] backed by the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Refuse merge commits on pull
    pub fast_forward_only: bool,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            fast_forward_only: true,
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run_git(&self, path: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut command = AsyncCommand::new("git");
        command.args(args);
        if let Some(path) = path {
            command.current_dir(path);
        }
        // Never block on a credential prompt
        command.env("GIT_TERMINAL_PROMPT", "0");

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.first().unwrap_or(&"")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitOperations for GitCli {
    async fn clone_repository(&self, url: &str, path: &Path) -> Result<()> {
        info!("Cloning repository: {} -> {}", url, path.display());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create parent directory")?;
        }

        let target = path.to_string_lossy();
        self.run_git(None, &["clone", url, target.as_ref()]).await?;
        Ok(())
    }

    async fn pull(&self, path: &Path) -> Result<()> {
        debug!("Pulling repository: {}", path.display());

        let mut args = vec!["pull"];
        if self.fast_forward_only {
            args.push("--ff-only");
        }
        self.run_git(Some(path), &args).await?;
        Ok(())
    }

    async fn local_head_sha(&self, path: &Path) -> Result<String> {
        let sha = self.run_git(Some(path), &["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(anyhow!("git rev-parse returned no commit for {}", path.display()));
        }
        Ok(sha)
    }

    async fn detect_and_configure_lfs(&self, path: &Path) -> Result<bool> {
        let attributes = path.join(".gitattributes");
        let content = match tokio::fs::read_to_string(&attributes).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).context("Failed to read .gitattributes"),
        };

        if !declares_lfs(&content) {
            return Ok(false);
        }

        if !is_lfs_installed().await {
            warn!(
                "{} uses Git LFS but git-lfs is not installed; large files stay as pointers",
                path.display()
            );
            return Ok(false);
        }

        info!("Configuring Git LFS for {}", path.display());
        self.run_git(Some(path), &["lfs", "install", "--local"]).await?;
        self.run_git(Some(path), &["lfs", "pull"]).await?;
        Ok(true)
    }
}

/// Whether a `.gitattributes` body routes any path through the LFS filter.
pub fn declares_lfs(gitattributes: &str) -> bool {
    gitattributes
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split_whitespace().skip(1).any(|attr| attr == "filter=lfs"))
}

async fn is_lfs_installed() -> bool {
    AsyncCommand::new("git")
        .args(["lfs", "version"])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}
