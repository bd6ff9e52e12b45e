//! Domain model types shared by the orchestrator, resolver and batch engine.
//!
//! Everything here is call-scoped: results are built during one invocation and
//! handed back to the caller. Nothing is persisted by this crate.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::errors::{StepError, VcsError};

// ---------------------------------------------------------------------------
// Operation envelope
// ---------------------------------------------------------------------------

/// Uniform envelope for the outcome of a single VCS-level operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub output: Option<String>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            output: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            output: None,
        }
    }

    /// Attach a human-readable note (shown as the item message in batch reports).
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

impl<T> From<Result<T, VcsError>> for OperationResult<T> {
    fn from(result: Result<T, VcsError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository status
// ---------------------------------------------------------------------------

/// Parsed working-tree status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoStatus {
    /// Checked-out branch, `None` when HEAD is detached.
    pub current_branch: Option<String>,
    /// Upstream tracking ref, e.g. `origin/main`.
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub not_added: Vec<String>,
    pub deleted: Vec<String>,
    pub renamed: Vec<String>,
    pub conflicted: Vec<String>,
}

impl RepoStatus {
    /// Clean means nothing staged, modified, untracked or deleted.
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.modified.is_empty()
            && self.not_added.is_empty()
            && self.deleted.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }

    /// Changes to tracked files (untracked files excluded).
    pub fn has_tracked_changes(&self) -> bool {
        !(self.staged.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }
}

/// A commit created through the access layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Stash
// ---------------------------------------------------------------------------

/// One entry of the stash stack.
///
/// `index` is a stack position, not an identity: it shifts whenever an entry
/// below it is removed. Use `hash` to track an entry across mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StashEntry {
    pub index: usize,
    pub message: String,
    pub branch: String,
    pub hash: String,
    pub date: DateTime<FixedOffset>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// How a file came to be conflicted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    BothModified,
    BothAdded,
    BothDeleted,
    AddedByUs,
    AddedByThem,
    DeletedByUs,
    DeletedByThem,
    /// Markers present on disk but the index no longer reports a conflict.
    MarkersOnly,
}

impl ConflictKind {
    /// Map a porcelain `XY` pair to a conflict kind.
    pub fn from_porcelain(x: char, y: char) -> Option<Self> {
        match (x, y) {
            ('U', 'U') => Some(Self::BothModified),
            ('A', 'A') => Some(Self::BothAdded),
            ('D', 'D') => Some(Self::BothDeleted),
            ('A', 'U') => Some(Self::AddedByUs),
            ('U', 'A') => Some(Self::AddedByThem),
            ('D', 'U') => Some(Self::DeletedByUs),
            ('U', 'D') => Some(Self::DeletedByThem),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BothModified => write!(f, "both modified"),
            Self::BothAdded => write!(f, "both added"),
            Self::BothDeleted => write!(f, "both deleted"),
            Self::AddedByUs => write!(f, "added by us"),
            Self::AddedByThem => write!(f, "added by them"),
            Self::DeletedByUs => write!(f, "deleted by us"),
            Self::DeletedByThem => write!(f, "deleted by them"),
            Self::MarkersOnly => write!(f, "conflict markers"),
        }
    }
}

/// A file that is (or appears to be) in conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictFile {
    pub path: String,
    pub status: ConflictKind,
    pub conflict_markers: bool,
}

/// Resolution strategy.
///
/// During a stash-pop conflict `Ours` keeps the freshly pulled upstream
/// version and `Theirs` keeps the stashed local work.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    Ours,
    Theirs,
    #[default]
    Manual,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of a conflict resolution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictResolutionResult {
    /// True only if the re-scan after resolution found no conflicts.
    pub resolved: bool,
    /// Conflicts found before resolution started.
    pub conflict_files: Vec<ConflictFile>,
    /// Files still conflicted after the attempt.
    pub unresolved_files: Vec<String>,
    pub strategy: ConflictStrategy,
    pub message: String,
    /// Remediation hints for a human.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Call-scoped options for a sync run. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOptions {
    pub remote: String,
    /// Branch to pull/push; defaults to the current branch.
    pub branch: Option<String>,
    pub auto_resolve_conflicts: bool,
    pub conflict_strategy: ConflictStrategy,
    pub include_untracked: bool,
    pub protected_branches: Vec<String>,
    pub confirm_before_action: bool,
    pub show_progress: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            remote: "origin".into(),
            branch: None,
            auto_resolve_conflicts: false,
            conflict_strategy: ConflictStrategy::Manual,
            include_untracked: true,
            protected_branches: vec!["main".into(), "master".into(), "develop".into()],
            confirm_before_action: false,
            show_progress: true,
        }
    }
}

/// Pipeline steps of a sync run, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    SafetyCheck,
    CheckWorkingDir,
    Stash,
    Pull,
    PopStash,
    ResolveConflicts,
    AddFiles,
    Commit,
    Push,
    Done,
}

impl std::fmt::Display for SyncStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SafetyCheck => write!(f, "safety_check"),
            Self::CheckWorkingDir => write!(f, "check_working_dir"),
            Self::Stash => write!(f, "stash"),
            Self::Pull => write!(f, "pull"),
            Self::PopStash => write!(f, "pop_stash"),
            Self::ResolveConflicts => write!(f, "resolve_conflicts"),
            Self::AddFiles => write!(f, "add_files"),
            Self::Commit => write!(f, "commit"),
            Self::Push => write!(f, "push"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    /// Audit trail, one entry per transition.
    pub steps: Vec<String>,
    pub stash_created: bool,
    /// Content hash of the stash created by this run.
    pub stash_id: Option<String>,
    pub rollback_available: bool,
    pub conflicts: Option<ConflictResolutionResult>,
    pub error: Option<StepError>,
    pub failed_step: Option<SyncStep>,
    pub commit_hash: Option<String>,
    pub pushed: bool,
    pub warnings: Vec<String>,
}

impl SyncResult {
    /// Whether a rollback now would throw away a completed local commit.
    ///
    /// Callers must warn the user before rolling back when this is true.
    pub fn rollback_discards_commit(&self) -> bool {
        self.rollback_available && self.commit_hash.is_some() && !self.pushed
    }
}

/// Outcome of a rollback.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackResult {
    pub steps: Vec<String>,
    pub reset_performed: bool,
    pub stash_restored: bool,
    /// Set when the stash could not be re-applied after the reset.
    pub error: Option<StepError>,
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Per-item status in a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for BatchItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Ledger entry for one batch item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItemResult {
    pub item: String,
    pub status: BatchItemStatus,
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Overall shape of a batch outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    AllSucceeded,
    AllFailed,
    Partial,
    Empty,
}

/// Aggregated batch report. Results keep input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchResult {
    pub label: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchResult {
    /// Build a report from a ledger; the counters are derived, never tracked separately.
    pub fn from_results(label: impl Into<String>, results: Vec<BatchItemResult>) -> Self {
        let count = |s: BatchItemStatus| results.iter().filter(|r| r.status == s).count();
        Self {
            label: label.into(),
            total: results.len(),
            successful: count(BatchItemStatus::Success),
            failed: count(BatchItemStatus::Failed),
            skipped: count(BatchItemStatus::Skipped),
            results,
        }
    }

    pub fn outcome(&self) -> BatchOutcome {
        if self.total == 0 {
            BatchOutcome::Empty
        } else if self.successful == self.total {
            BatchOutcome::AllSucceeded
        } else if self.successful == 0 {
            BatchOutcome::AllFailed
        } else {
            BatchOutcome::Partial
        }
    }

    /// One-line closing summary.
    pub fn summary(&self) -> String {
        match self.outcome() {
            BatchOutcome::Empty => format!("{}: nothing to do", self.label),
            BatchOutcome::AllSucceeded => {
                format!("{} completed, all {} operations succeeded", self.label, self.total)
            }
            BatchOutcome::AllFailed => {
                format!("{} failed, none of {} operations succeeded", self.label, self.total)
            }
            BatchOutcome::Partial => format!(
                "{} partially completed: {} succeeded, {} failed, {} skipped",
                self.label, self.successful, self.failed, self.skipped
            ),
        }
    }
}
