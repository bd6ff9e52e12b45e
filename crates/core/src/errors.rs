//! Error types for the gitsafe core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. Every error can be classified into an [`ErrorKind`],
//! which is what structured results carry back to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse error classification reported in structured results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Precondition violation detected before any mutation.
    Validation,
    /// An underlying git command exited non-zero.
    CommandFailure,
    /// Conflicts remain after a resolution attempt.
    Conflict,
    /// A git invocation exceeded its time budget.
    Timeout,
    /// Push / pull / fetch connectivity failure.
    Network,
    /// The caller raised the cancellation flag between steps.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::CommandFailure => write!(f, "command_failure"),
            Self::Conflict => write!(f, "conflict"),
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A classified, serialisable error attached to a structured result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&VcsError> for StepError {
    fn from(err: &VcsError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vcs(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::Conflict(e) => e.kind(),
            Self::Batch(e) => e.kind(),
            Self::Config(_) => ErrorKind::Validation,
        }
    }
}

// ---------------------------------------------------------------------------
// VCS access layer errors
// ---------------------------------------------------------------------------

/// Errors from the git access layer.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The working directory is not inside a git repository.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// The repository has no configured remote.
    #[error("no remote configured for repository at '{0}'")]
    NoRemote(String),

    /// The `git` binary could not be spawned.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git command failed (exit {exit_code}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A `git` command exceeded its time budget and was killed.
    #[error("git command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    /// Connectivity problem talking to a remote.
    #[error("git network error during '{command}': {detail}")]
    Network { command: String, detail: String },

    /// `git stash push` had nothing to save.
    #[error("no local changes to stash")]
    NothingToStash,

    /// A stash entry could not be located by hash or index.
    #[error("stash entry not found: {0}")]
    StashNotFound(String),

    /// Another pipeline or batch currently owns the working tree.
    #[error("working tree is busy: another operation holds the workspace lock")]
    Busy,

    /// Output from `git` could not be parsed.
    #[error("failed to parse git output: {0}")]
    Parse(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RepositoryNotFound(_) | Self::NoRemote(_) | Self::Busy => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Network { .. } => ErrorKind::Network,
            _ => ErrorKind::CommandFailure,
        }
    }

    /// Combined diagnostic text of a failed command, empty for other variants.
    pub fn output(&self) -> &str {
        match self {
            Self::CommandFailed { stderr, .. } => stderr,
            Self::Network { detail, .. } => detail,
            _ => "",
        }
    }

    /// Whether the failure text reports merge conflicts.
    pub fn mentions_conflict(&self) -> bool {
        let out = self.output();
        out.contains("CONFLICT") || out.contains("conflict")
    }
}

// ---------------------------------------------------------------------------
// Sync orchestrator errors
// ---------------------------------------------------------------------------

/// Precondition failures of the sync orchestrator.
///
/// These are only ever returned before the pipeline mutates anything; once
/// mutation has started, failures are reported inside a `SyncResult`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A caller-supplied argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The working tree holds unresolved conflicts from an earlier run.
    #[error("working tree has unresolved conflicts: {}", files.join(", "))]
    UnresolvedConflicts { files: Vec<String> },

    /// A merge, cherry-pick or revert is still in progress.
    #[error("a {0} is in progress; finish or abort it first")]
    OperationInProgress(String),

    /// Rollback was requested but would not be a safe local undo.
    #[error("rollback unavailable: {0}")]
    RollbackUnavailable(String),

    /// Underlying VCS error during a precondition check.
    #[error("sync precondition failed: {0}")]
    Vcs(#[from] VcsError),
}

impl SyncError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vcs(e) => match e.kind() {
                ErrorKind::CommandFailure => ErrorKind::Validation,
                other => other,
            },
            Self::UnresolvedConflicts { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Validation,
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict resolver's merge-control operations.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Conflicts remain, so the operation cannot continue.
    #[error("unresolved conflicts remain: {}", files.join(", "))]
    Unresolved { files: Vec<String> },

    /// There is nothing to abort or continue.
    #[error("no merge, cherry-pick or revert is in progress")]
    NothingInProgress,

    /// Underlying VCS error.
    #[error("conflict resolution git error: {0}")]
    Vcs(#[from] VcsError),
}

impl ConflictError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unresolved { .. } => ErrorKind::Conflict,
            Self::NothingInProgress => ErrorKind::Validation,
            Self::Vcs(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch errors
// ---------------------------------------------------------------------------

/// Precondition failures of the batch executor.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The batch has no items.
    #[error("batch '{0}' has no items")]
    Empty(String),

    /// Stash indices must be processed from the top of the stack down.
    #[error("stash indices must be strictly descending, got {0:?}")]
    StashOrder(Vec<usize>),

    /// The working tree is not in a state where the batch can start.
    #[error("working tree not ready for '{label}': {detail}")]
    DirtyTree { label: String, detail: String },

    /// A planning helper received an unusable argument.
    #[error("invalid batch argument: {0}")]
    InvalidArgument(String),

    /// Underlying VCS error during a precondition check.
    #[error("batch precondition git error: {0}")]
    Vcs(#[from] VcsError),
}

impl BatchError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vcs(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
