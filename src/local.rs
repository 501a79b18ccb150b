//! Snapshot of the clones already present under a target directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::git::GitOperations;

/// A local clone found under the target directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalClone {
    /// Directory name, compared against remote repository names
    pub name: String,
    pub path: PathBuf,
    /// `None` when the head could not be resolved (e.g. an empty repository)
    pub head_sha: Option<String>,
}

impl LocalClone {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, head_sha: Option<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            head_sha,
        }
    }
}

/// Source of the local snapshot used by the reconciler.
#[async_trait]
pub trait DirectoryLister: Send + Sync {
    /// Immediate subdirectories of `target` that are git clones, sorted by
    /// name. A missing target yields an empty snapshot.
    async fn list_clones(&self, target: &Path) -> Result<Vec<LocalClone>>;
}

/// Filesystem lister that resolves each clone's head through git.
pub struct FsLister<G> {
    git: G,
}

impl<G: GitOperations> FsLister<G> {
    pub fn new(git: G) -> Self {
        Self { git }
    }
}

#[async_trait]
impl<G: GitOperations> DirectoryLister for FsLister<G> {
    async fn list_clones(&self, target: &Path) -> Result<Vec<LocalClone>> {
        if !tokio::fs::try_exists(target).await.unwrap_or(false) {
            debug!("Target directory does not exist yet: {}", target.display());
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(target)
            .await
            .with_context(|| format!("Failed to read directory {}", target.display()))?;

        let mut clones = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to read directory {}", target.display()))?
        {
            let path = entry.path();
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if !tokio::fs::try_exists(path.join(".git")).await.unwrap_or(false) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let head_sha = match self.git.local_head_sha(&path).await {
                Ok(sha) => Some(sha),
                Err(e) => {
                    warn!("Could not resolve HEAD for {}: {}", path.display(), e);
                    None
                }
            };

            clones.push(LocalClone::new(name, path, head_sha));
        }

        clones.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} local clones in {}", clones.len(), target.display());
        Ok(clones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    /// Reports the directory name as the head, fails for `broken`.
    struct NameAsHead;

    #[async_trait]
    impl GitOperations for NameAsHead {
        async fn clone_repository(&self, _url: &str, _path: &Path) -> Result<()> {
            unreachable!()
        }

        async fn pull(&self, _path: &Path) -> Result<()> {
            unreachable!()
        }

        async fn local_head_sha(&self, path: &Path) -> Result<String> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name == "broken" {
                Err(anyhow!("ambiguous argument 'HEAD'"))
            } else {
                Ok(format!("sha-{}", name))
            }
        }

        async fn detect_and_configure_lfs(&self, _path: &Path) -> Result<bool> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_missing_target_is_empty() {
        let temp = TempDir::new().unwrap();
        let lister = FsLister::new(NameAsHead);

        let clones = lister.list_clones(&temp.path().join("nope")).await.unwrap();
        assert!(clones.is_empty());
    }

    #[tokio::test]
    async fn test_target_that_is_a_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        temp.child("mirror").write_str("not a directory").unwrap();

        let result = FsLister::new(NameAsHead)
            .list_clones(&temp.path().join("mirror"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_only_git_directories_are_listed() {
        let temp = TempDir::new().unwrap();
        temp.child("zeta/.git").create_dir_all().unwrap();
        temp.child("alpha/.git").create_dir_all().unwrap();
        temp.child("notes").create_dir_all().unwrap();
        temp.child("README.md").write_str("hi").unwrap();

        let clones = FsLister::new(NameAsHead).list_clones(temp.path()).await.unwrap();

        let names: Vec<_> = clones.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(clones[0].head_sha.as_deref(), Some("sha-alpha"));
        assert_eq!(clones[0].path, temp.path().join("alpha"));
    }

    #[tokio::test]
    async fn test_unresolvable_head_is_kept_without_sha() {
        let temp = TempDir::new().unwrap();
        temp.child("broken/.git").create_dir_all().unwrap();

        let clones = FsLister::new(NameAsHead).list_clones(temp.path()).await.unwrap();
        assert_eq!(clones, vec![LocalClone::new("broken", temp.path().join("broken"), None)]);
    }
}
