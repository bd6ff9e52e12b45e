//! The closed set of batch operations and the confirmation gate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::BatchConfig;

/// How a batch of reverts is recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevertMode {
    /// One revert commit per target.
    #[default]
    Individual,
    /// Fold all successful reverts into one commit.
    /// The message defaults to "Revert N commits".
    Squashed { message: Option<String> },
}

/// How each branch of a merge batch is merged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Normal,
    FastForwardOnly,
    NoFastForward,
    /// Squashed and committed immediately so the tree stays clean.
    Squash,
}

impl MergeStrategy {
    pub(crate) fn flag(self) -> Option<&'static str> {
        match self {
            Self::Normal => None,
            Self::FastForwardOnly => Some("--ff-only"),
            Self::NoFastForward => Some("--no-ff"),
            Self::Squash => Some("--squash"),
        }
    }
}

/// One planned branch rename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchRename {
    pub from: String,
    pub to: String,
}

impl fmt::Display for BranchRename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// A batch of one operation kind over its targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchOperation {
    CherryPick { commits: Vec<String> },
    Revert { commits: Vec<String>, mode: RevertMode },
    CreateBranches { names: Vec<String>, base: Option<String> },
    DeleteBranches { names: Vec<String>, force: bool },
    RenameBranches { renames: Vec<BranchRename> },
    /// Annotated tags; the message defaults to "Release <tag>".
    CreateTags { tags: Vec<String>, message: Option<String> },
    DeleteTags { tags: Vec<String> },
    PushTags { tags: Vec<String>, remote: String },
    /// `git push <remote> --tags`, a single item.
    PushAllTags { remote: String },
    ApplyStashes { indices: Vec<usize> },
    /// Indices must be strictly descending: dropping shifts every entry above.
    DropStashes { indices: Vec<usize> },
    /// Drops every stash entry in one item.
    ClearStashes,
    Merge { branches: Vec<String>, strategy: MergeStrategy },
}

impl BatchOperation {
    /// Human-readable batch name used in reports and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CherryPick { .. } => "Cherry-pick",
            Self::Revert { .. } => "Revert",
            Self::CreateBranches { .. } => "Branch creation",
            Self::DeleteBranches { .. } => "Branch deletion",
            Self::RenameBranches { .. } => "Branch rename",
            Self::CreateTags { .. } => "Tag creation",
            Self::DeleteTags { .. } => "Tag deletion",
            Self::PushTags { .. } | Self::PushAllTags { .. } => "Tag push",
            Self::ApplyStashes { .. } => "Stash apply",
            Self::DropStashes { .. } => "Stash drop",
            Self::ClearStashes => "Stash clear",
            Self::Merge { .. } => "Merge",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::CherryPick { commits } | Self::Revert { commits, .. } => commits.len(),
            Self::CreateBranches { names, .. } | Self::DeleteBranches { names, .. } => names.len(),
            Self::RenameBranches { renames } => renames.len(),
            Self::CreateTags { tags, .. } | Self::DeleteTags { tags } | Self::PushTags { tags, .. } => {
                tags.len()
            }
            Self::ApplyStashes { indices } | Self::DropStashes { indices } => indices.len(),
            Self::Merge { branches, .. } => branches.len(),
            Self::PushAllTags { .. } | Self::ClearStashes => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes refs or stash entries.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::DeleteBranches { .. }
                | Self::DeleteTags { .. }
                | Self::DropStashes { .. }
                | Self::ClearStashes
        )
    }

    /// Can leave the tree conflicted, so every item is followed by a cleanup.
    pub fn is_conflict_sensitive(&self) -> bool {
        matches!(
            self,
            Self::CherryPick { .. }
                | Self::Revert { .. }
                | Self::Merge { .. }
                | Self::ApplyStashes { .. }
        )
    }
}

/// Decides when a destructive batch needs the operator's go-ahead.
///
/// The executor never asks; callers check this before calling `run`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Destructive batches with more items than this need confirmation.
    /// Clearing the stash always does, whatever the threshold.
    pub threshold: usize,
}

impl ConfirmationPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            threshold: config.confirm_threshold,
        }
    }

    pub fn requires_confirmation(&self, op: &BatchOperation) -> bool {
        match op {
            BatchOperation::ClearStashes => true,
            _ => op.is_destructive() && op.len() > self.threshold,
        }
    }
}
