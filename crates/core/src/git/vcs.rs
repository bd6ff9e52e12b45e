//! The VCS access layer contract consumed by the orchestrator, the conflict
//! resolver and the batch executor.

use std::path::Path;

use async_trait::async_trait;

use crate::errors::VcsError;
use crate::models::{CommitInfo, RepoStatus, StashEntry};

/// Options for [`Vcs::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Record the remote branch as upstream (`-u`).
    pub set_upstream: bool,
}

/// Options for [`Vcs::pull`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
    /// Rebase local commits instead of merging.
    pub rebase: bool,
    /// Refuse anything but a fast-forward.
    pub ff_only: bool,
}

/// A multi-step operation the repository is currently in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProgress {
    Merge,
    CherryPick,
    Revert,
}

impl InProgress {
    /// Marker ref whose presence signals the operation.
    fn marker(self) -> &'static str {
        match self {
            Self::Merge => "MERGE_HEAD",
            Self::CherryPick => "CHERRY_PICK_HEAD",
            Self::Revert => "REVERT_HEAD",
        }
    }

    pub fn abort_args(self) -> [&'static str; 2] {
        match self {
            Self::Merge => ["merge", "--abort"],
            Self::CherryPick => ["cherry-pick", "--abort"],
            Self::Revert => ["revert", "--abort"],
        }
    }
}

impl std::fmt::Display for InProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::CherryPick => write!(f, "cherry-pick"),
            Self::Revert => write!(f, "revert"),
        }
    }
}

/// Typed git operations.
///
/// Implementations must fully complete each call before returning; callers
/// rely on that to keep mutations strictly sequential.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    async fn is_repository(&self) -> Result<bool, VcsError>;
    async fn remotes(&self) -> Result<Vec<String>, VcsError>;
    async fn status(&self) -> Result<RepoStatus, VcsError>;

    async fn add(&self, paths: &[String]) -> Result<(), VcsError>;
    async fn commit(&self, message: &str) -> Result<CommitInfo, VcsError>;
    async fn push(&self, remote: &str, branch: &str, opts: &PushOptions) -> Result<(), VcsError>;
    async fn pull(&self, remote: &str, branch: &str, opts: &PullOptions) -> Result<(), VcsError>;

    async fn stash_save(&self, message: &str, include_untracked: bool)
        -> Result<StashEntry, VcsError>;
    async fn stash_pop(&self, index: usize) -> Result<(), VcsError>;
    async fn stash_apply(&self, index: usize) -> Result<(), VcsError>;
    async fn stash_drop(&self, index: usize) -> Result<(), VcsError>;
    async fn stash_list(&self) -> Result<Vec<StashEntry>, VcsError>;
    async fn stash_clear(&self) -> Result<(), VcsError>;

    /// Untyped escape hatch; returns stdout.
    async fn raw(&self, args: &[&str]) -> Result<String, VcsError>;

    /// Re-resolve a stash entry by content hash.
    async fn find_stash(&self, hash: &str) -> Result<Option<StashEntry>, VcsError> {
        Ok(self
            .stash_list()
            .await?
            .into_iter()
            .find(|entry| entry.hash == hash))
    }

    /// The merge / cherry-pick / revert currently in progress, if any.
    async fn in_progress(&self) -> Result<Option<InProgress>, VcsError> {
        for op in [InProgress::Merge, InProgress::CherryPick, InProgress::Revert] {
            match self.raw(&["rev-parse", "-q", "--verify", op.marker()]).await {
                Ok(_) => return Ok(Some(op)),
                Err(VcsError::CommandFailed { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Full hash of HEAD.
    async fn head(&self) -> Result<String, VcsError> {
        Ok(self.raw(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }
}
