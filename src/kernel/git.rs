//! Native git management using the `git2` crate.
//!
//! Patch sources are pinned to a branch and fetched shallow (depth 1),
//! single-branch and without tags, mirroring
//! `git clone --depth=1 --single-branch --no-tags -b <ref>`.

use std::path::{Path, PathBuf};

use git2::{build::RepoBuilder, AutotagOption, FetchOptions, RemoteCallbacks, Repository};
use thiserror::Error;

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Clone error: {0}")]
    Clone(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git2 error: {0}")]
    Git2(#[from] git2::Error),
}

/// Result type for git operations
pub type GitResult<T> = Result<T, GitError>;

/// Manages a checked-out patch source repository
pub struct GitManager {
    repo_path: PathBuf,
}

impl GitManager {
    /// Opens an existing repository
    pub fn open(repo_path: impl AsRef<Path>) -> GitResult<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        Repository::open(&repo_path).map_err(|e| {
            GitError::Repository(format!(
                "Failed to open repository at {:?}: {}",
                repo_path, e
            ))
        })?;
        Ok(GitManager { repo_path })
    }

    /// Clones only `branch` of `url` into `target_path`.
    ///
    /// A shallow clone is attempted first; transports without shallow support
    /// (the local file transport, some mirrors) fall back to a full clone of the
    /// same single branch.
    pub fn clone_branch(url: &str, branch: &str, target_path: impl AsRef<Path>) -> GitResult<Self> {
        let target_path = target_path.as_ref();
        log::info!("[Git] [CLONE] {}@{} -> {:?}", url, branch, target_path);

        Self::single_branch_clone(url, branch, target_path, Some(1)).or_else(|shallow_err| {
            log::warn!("[Git] [CLONE] Shallow clone failed: {}", shallow_err);
            log::warn!("[Git] [CLONE] Falling back to full single-branch clone");
            if target_path.exists() {
                std::fs::remove_dir_all(target_path)?;
            }
            Self::single_branch_clone(url, branch, target_path, None)
        })?;

        let manager = GitManager::open(target_path)?;
        if let Ok(head) = manager.head_commit() {
            log::info!("[Git] [CLONE] ✓ {}@{} at {}", url, branch, &head[..12.min(head.len())]);
        }
        Ok(manager)
    }

    fn single_branch_clone(
        url: &str,
        branch: &str,
        target_path: &Path,
        depth: Option<i32>,
    ) -> GitResult<()> {
        if branch.is_empty() {
            return Err(GitError::InvalidRef(format!("empty branch for {}", url)));
        }

        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(|progress| {
            let total = progress.total_objects();
            if total > 0 && progress.received_objects() == total {
                log::debug!(
                    "[Git] [PROGRESS] {}/{} objects ({} indexed)",
                    progress.received_objects(),
                    total,
                    progress.indexed_objects()
                );
            }
            true
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        fetch_options.download_tags(AutotagOption::None);
        if let Some(depth) = depth {
            fetch_options.depth(depth);
        }

        let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", branch);
        let mut builder = RepoBuilder::new();
        builder.branch(branch);
        builder.fetch_options(fetch_options);
        builder.remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &refspec));

        builder.clone(url, target_path).map_err(|e| {
            GitError::Clone(format!("Clone of {}@{} failed: {}", url, branch, e))
        })?;
        Ok(())
    }

    /// Gets the current HEAD commit hash
    pub fn head_commit(&self) -> GitResult<String> {
        let repo = Repository::open(&self.repo_path)?;
        let head = repo
            .head()
            .map_err(|e| GitError::Repository(format!("Failed to read HEAD: {}", e)))?;
        let commit_id = head
            .target()
            .ok_or_else(|| GitError::Repository("HEAD is not a direct reference".to_string()))?;
        Ok(commit_id.to_string())
    }

    /// Lists local and remote-tracking branches
    pub fn list_branches(&self) -> GitResult<Vec<String>> {
        let repo = Repository::open(&self.repo_path)?;
        let mut names = Vec::new();
        for branch in repo.branches(None)? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Returns the path to the repository
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}
