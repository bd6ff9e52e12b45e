//! Sequential batch engine with per-item failure isolation.
//!
//! Items run strictly in input order, one git invocation at a time. A failing
//! item is recorded and the loop moves on; for kinds that can leave the tree
//! conflicted the engine aborts the half-finished operation before the next
//! item starts. If the tree cannot be brought back, the remaining items are
//! skipped rather than attempted on a broken tree.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::operations::{BatchOperation, BranchRename, MergeStrategy, RevertMode};
use super::plan::{self, is_strictly_descending};
use crate::conflict::resolver::abort_with;
use crate::errors::{BatchError, VcsError};
use crate::git::{PushOptions, Vcs, Workspace};
use crate::models::{BatchItemResult, BatchItemStatus, BatchResult, OperationResult};
use crate::progress::{CancellationFlag, ProgressReporter};

const NOT_CLEAN: &str = "working tree not clean";
const CANCELLED: &str = "cancelled";

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

// ---------------------------------------------------------------------------
// Item ledger
// ---------------------------------------------------------------------------

fn item_result(item: String, outcome: OperationResult<String>) -> BatchItemResult {
    if outcome.success {
        BatchItemResult {
            item,
            status: BatchItemStatus::Success,
            error: None,
            message: outcome.output.or(outcome.data),
        }
    } else {
        BatchItemResult {
            item,
            status: BatchItemStatus::Failed,
            error: Some(outcome.error.unwrap_or_else(|| "operation failed".into())),
            message: outcome.output,
        }
    }
}

fn skipped(item: String, reason: &str) -> BatchItemResult {
    BatchItemResult {
        item,
        status: BatchItemStatus::Skipped,
        error: None,
        message: Some(reason.to_string()),
    }
}

fn append_message(entry: &mut BatchItemResult, note: &str) {
    entry.message = Some(match entry.message.take() {
        Some(msg) => format!("{msg}; {note}"),
        None => note.to_string(),
    });
}

/// What the engine checks after each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cleanup {
    /// Ref and stash-list items never touch the tree.
    Skip,
    /// Abort leftover conflicts; tracked changes are the item's result.
    Conflicts,
    /// Every item commits its work, so leftover tracked changes are dirty.
    Committed,
}

impl Cleanup {
    fn for_op(op: &BatchOperation) -> Self {
        match op {
            BatchOperation::CherryPick { .. }
            | BatchOperation::Revert { .. }
            | BatchOperation::Merge { .. } => Self::Committed,
            op if op.is_conflict_sensitive() => Self::Conflicts,
            _ => Self::Skip,
        }
    }
}

/// State of the tree after an item's cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeState {
    Untouched,
    Restored,
    Dirty,
}

/// Abort whatever the item left behind and confirm the tree is operable.
async fn restore_clean<V: Vcs + ?Sized>(vcs: &V, cleanup: Cleanup) -> TreeState {
    let aborted = match abort_with(vcs).await {
        Ok(aborted) => aborted,
        Err(e) => {
            warn!(error = %e, "could not abort after batch item");
            return TreeState::Dirty;
        }
    };
    let committed = cleanup == Cleanup::Committed;
    if !aborted && !committed {
        return TreeState::Untouched;
    }
    match (vcs.status().await, vcs.in_progress().await) {
        (Ok(status), Ok(None))
            if !status.has_conflicts() && !(committed && status.has_tracked_changes()) =>
        {
            if aborted {
                TreeState::Restored
            } else {
                TreeState::Untouched
            }
        }
        _ => TreeState::Dirty,
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Applies one operation across many targets against a locked [`Workspace`].
///
/// The executor assumes a destructive batch has already been confirmed; see
/// [`ConfirmationPolicy`](super::ConfirmationPolicy).
pub struct BatchExecutor<V> {
    workspace: Arc<Workspace<V>>,
    progress: ProgressReporter,
    cancel: CancellationFlag,
}

impl<V: Vcs> BatchExecutor<V> {
    pub fn new(workspace: Arc<Workspace<V>>) -> Self {
        Self {
            workspace,
            progress: ProgressReporter::disabled(),
            cancel: CancellationFlag::new(),
        }
    }

    /// Emit an item event before each item.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Check `cancel` between items.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `op` on each item in order and collect a ledger.
    ///
    /// `op` gets the locked client. The tree is cleaned after every item, so
    /// `op` may leave a conflict behind on failure.
    pub async fn execute<'s, T, F, Fut>(
        &'s self,
        items: Vec<T>,
        label: &str,
        op: F,
    ) -> Result<BatchResult, BatchError>
    where
        T: Display,
        F: FnMut(&'s V, T) -> Fut,
        Fut: Future<Output = OperationResult<String>>,
    {
        if items.is_empty() {
            return Err(BatchError::Empty(label.to_string()));
        }
        let guard = self.workspace.lock()?;
        let result = self
            .run_items(guard.vcs(), items, label, Cleanup::Conflicts, op)
            .await;
        drop(guard);
        Ok(result)
    }

    /// Check preconditions, then run a typed batch.
    #[instrument(skip(self, op), fields(label = op.label(), items = op.len()))]
    pub async fn run(&self, op: BatchOperation) -> Result<BatchResult, BatchError> {
        let label = op.label();
        if op.is_empty() {
            return Err(BatchError::Empty(label.to_string()));
        }
        if let BatchOperation::DropStashes { indices } = &op {
            if !is_strictly_descending(indices) {
                return Err(BatchError::StashOrder(indices.clone()));
            }
        }

        let guard = self.workspace.lock()?;
        let vcs = guard.vcs();
        if op.is_conflict_sensitive() {
            check_tree_ready(vcs, label).await?;
        }

        let cleanup = Cleanup::for_op(&op);
        let result = match op {
            BatchOperation::CherryPick { commits } => {
                self.run_items(vcs, commits, label, cleanup, |vcs, commit| async move {
                    let done = vcs.raw(&["cherry-pick", commit.as_str()]).await;
                    OperationResult::from(done.map(|_| format!("Cherry-picked {}", short(&commit))))
                })
                .await
            }
            BatchOperation::Revert { commits, mode } => match mode {
                RevertMode::Individual => self.revert_each(vcs, commits, label).await,
                RevertMode::Squashed { message } => {
                    self.revert_squashed(vcs, commits, label, message).await?
                }
            },
            BatchOperation::CreateBranches { names, base } => {
                let base = base.as_deref();
                self.run_items(vcs, names, label, cleanup, move |vcs, name| async move {
                    let mut args = vec!["branch", name.as_str()];
                    args.extend(base);
                    let done = vcs.raw(&args).await;
                    OperationResult::from(done.map(|_| match base {
                        Some(base) => format!("Created {name} from {base}"),
                        None => format!("Created {name}"),
                    }))
                })
                .await
            }
            BatchOperation::DeleteBranches { names, force } => {
                let flag = if force { "-D" } else { "-d" };
                self.run_items(vcs, names, label, cleanup, move |vcs, name| async move {
                    let done = vcs.raw(&["branch", flag, name.as_str()]).await;
                    OperationResult::from(done.map(|_| format!("Deleted {name}")))
                })
                .await
            }
            BatchOperation::RenameBranches { renames } => {
                self.run_items(vcs, renames, label, cleanup, |vcs, r: BranchRename| async move {
                    let done = vcs.raw(&["branch", "-m", r.from.as_str(), r.to.as_str()]).await;
                    OperationResult::from(done.map(|_| format!("Renamed {r}")))
                })
                .await
            }
            BatchOperation::CreateTags { tags, message } => {
                let message = message.as_deref();
                self.run_items(vcs, tags, label, cleanup, move |vcs, tag| async move {
                    let text = match message {
                        Some(m) => m.to_string(),
                        None => format!("Release {tag}"),
                    };
                    let done = vcs.raw(&["tag", "-a", tag.as_str(), "-m", text.as_str()]).await;
                    OperationResult::from(done.map(|_| format!("Created tag {tag}")))
                })
                .await
            }
            BatchOperation::DeleteTags { tags } => {
                self.run_items(vcs, tags, label, cleanup, |vcs, tag| async move {
                    let done = vcs.raw(&["tag", "-d", tag.as_str()]).await;
                    OperationResult::from(done.map(|_| format!("Deleted tag {tag}")))
                })
                .await
            }
            BatchOperation::PushTags { tags, remote } => {
                let remote = remote.as_str();
                self.run_items(vcs, tags, label, cleanup, move |vcs, tag| async move {
                    let done = vcs.push(remote, &tag, &PushOptions::default()).await;
                    OperationResult::from(done.map(|()| format!("Pushed {tag} to {remote}")))
                })
                .await
            }
            BatchOperation::PushAllTags { remote } => {
                let remote = remote.as_str();
                let items = vec![format!("all tags → {remote}")];
                self.run_items(vcs, items, label, cleanup, move |vcs, _| async move {
                    let done = vcs.raw(&["push", remote, "--tags"]).await;
                    OperationResult::from(done.map(|_| format!("Pushed all tags to {remote}")))
                })
                .await
            }
            BatchOperation::ApplyStashes { indices } => {
                self.run_items(vcs, indices, label, cleanup, |vcs, index| async move {
                    let done = vcs.stash_apply(index).await;
                    OperationResult::from(done.map(|()| format!("Applied stash@{{{index}}}")))
                })
                .await
            }
            BatchOperation::DropStashes { indices } => {
                self.run_items(vcs, indices, label, cleanup, |vcs, index| async move {
                    let done = vcs.stash_drop(index).await;
                    OperationResult::from(done.map(|()| format!("Dropped stash@{{{index}}}")))
                })
                .await
            }
            BatchOperation::ClearStashes => {
                let items = vec!["all stash entries".to_string()];
                self.run_items(vcs, items, label, cleanup, |vcs, _| async move {
                    OperationResult::from(clear_stashes(vcs).await)
                })
                .await
            }
            BatchOperation::Merge { branches, strategy } => {
                self.run_items(vcs, branches, label, cleanup, move |vcs, branch| async move {
                    OperationResult::from(merge_one(vcs, &branch, strategy).await)
                })
                .await
            }
        };

        drop(guard);
        Ok(result)
    }

    /// Local branches that could be deleted: not current, not protected.
    pub async fn deletable_branches(&self, protected: &[String]) -> Result<Vec<String>, BatchError> {
        let guard = self.workspace.lock()?;
        Ok(plan::deletable_branches(guard.vcs(), protected).await?)
    }

    /// Branches fully merged into `target`, excluding protected ones.
    pub async fn merged_branches(
        &self,
        target: &str,
        protected: &[String],
    ) -> Result<Vec<String>, BatchError> {
        let guard = self.workspace.lock()?;
        Ok(plan::merged_branches(guard.vcs(), target, protected).await?)
    }

    // -----------------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------------

    async fn run_items<'v, T, F, Fut>(
        &self,
        vcs: &'v V,
        items: Vec<T>,
        label: &str,
        cleanup: Cleanup,
        mut op: F,
    ) -> BatchResult
    where
        T: Display,
        F: FnMut(&'v V, T) -> Fut,
        Fut: Future<Output = OperationResult<String>>,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut halted: Option<&'static str> = None;

        for (i, item) in items.into_iter().enumerate() {
            let text = item.to_string();
            if halted.is_none() && self.cancel.is_cancelled() {
                info!(label, remaining = total - i, "batch cancelled");
                halted = Some(CANCELLED);
            }
            if let Some(reason) = halted {
                results.push(skipped(text, reason));
                continue;
            }

            self.progress.item(label, i + 1, total, &text);
            debug!(label, index = i + 1, total, item = %text, "processing batch item");

            let mut entry = item_result(text, op(vcs, item).await);
            match entry.status {
                BatchItemStatus::Failed => warn!(
                    label,
                    item = %entry.item,
                    error = entry.error.as_deref().unwrap_or_default(),
                    "batch item failed"
                ),
                _ => debug!(label, item = %entry.item, "batch item succeeded"),
            }

            if cleanup != Cleanup::Skip {
                match restore_clean(vcs, cleanup).await {
                    TreeState::Untouched => {}
                    TreeState::Restored => append_message(&mut entry, "aborted, working tree restored"),
                    TreeState::Dirty => {
                        warn!(label, item = %entry.item, "working tree left dirty, skipping the rest");
                        append_message(&mut entry, "working tree could not be restored");
                        halted = Some(NOT_CLEAN);
                    }
                }
            }
            results.push(entry);
        }

        let result = BatchResult::from_results(label, results);
        info!(
            label,
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            skipped = result.skipped,
            "{}",
            result.summary()
        );
        result
    }

    async fn revert_each(&self, vcs: &V, commits: Vec<String>, label: &str) -> BatchResult {
        self.run_items(vcs, commits, label, Cleanup::Committed, |vcs, commit| async move {
            let done = vcs.raw(&["revert", "--no-edit", commit.as_str()]).await;
            OperationResult::from(done.map(|_| format!("Reverted {}", short(&commit))))
        })
        .await
    }

    /// Revert one by one, then fold the successful reverts into one commit.
    async fn revert_squashed(
        &self,
        vcs: &V,
        commits: Vec<String>,
        label: &str,
        message: Option<String>,
    ) -> Result<BatchResult, BatchError> {
        let start = vcs.head().await?;
        let mut result = self.revert_each(vcs, commits, label).await;

        let reverted = result.successful;
        if reverted == 0 || (reverted == 1 && message.is_none()) {
            return Ok(result);
        }
        let message = message.unwrap_or_else(|| format!("Revert {reverted} commits"));

        let note = match fold_commits(vcs, &start, &message).await {
            Ok(hash) => {
                info!(commit = %short(&hash), reverted, "squashed reverts");
                format!("squashed into {}", short(&hash))
            }
            Err(e) => {
                warn!(error = %e, "could not squash reverts, kept individual commits");
                format!("kept as an individual commit, squash failed: {e}")
            }
        };
        for entry in result
            .results
            .iter_mut()
            .filter(|r| r.status == BatchItemStatus::Success)
        {
            append_message(entry, &note);
        }
        Ok(result)
    }
}

/// Refuse to start a conflict-sensitive batch on a tree it could not restore.
async fn check_tree_ready<V: Vcs + ?Sized>(vcs: &V, label: &str) -> Result<(), BatchError> {
    let dirty = |detail: String| BatchError::DirtyTree {
        label: label.to_string(),
        detail,
    };
    if let Some(op) = vcs.in_progress().await? {
        return Err(dirty(format!("a {op} is in progress")));
    }
    let status = vcs.status().await?;
    if status.has_conflicts() {
        return Err(dirty(format!(
            "unresolved conflicts in {}",
            status.conflicted.join(", ")
        )));
    }
    if status.has_tracked_changes() {
        return Err(dirty("uncommitted changes to tracked files".into()));
    }
    Ok(())
}

async fn clear_stashes<V: Vcs + ?Sized>(vcs: &V) -> Result<String, VcsError> {
    let count = vcs.stash_list().await?.len();
    if count == 0 {
        return Ok("No stash entries to clear".into());
    }
    vcs.stash_clear().await?;
    let noun = if count == 1 { "entry" } else { "entries" };
    Ok(format!("Cleared {count} stash {noun}"))
}

async fn merge_one<V: Vcs + ?Sized>(
    vcs: &V,
    branch: &str,
    strategy: MergeStrategy,
) -> Result<String, VcsError> {
    if strategy == MergeStrategy::Squash {
        vcs.raw(&["merge", "--squash", branch]).await?;
        // Nothing staged means the branch was already merged.
        if vcs.raw(&["diff", "--cached", "--quiet"]).await.is_ok() {
            return Ok(format!("{branch} already up to date"));
        }
        // No merge state exists to abort, so a rejected commit (a hook, say)
        // would leave the squashed changes staged for the next item.
        if let Err(e) = vcs.raw(&["commit", "--no-edit"]).await {
            vcs.raw(&["reset", "--merge"]).await?;
            return Err(e);
        }
        return Ok(format!("Squash-merged {branch}"));
    }

    let mut args = vec!["merge"];
    args.extend(strategy.flag());
    args.extend(["--no-edit", branch]);
    vcs.raw(&args).await?;
    Ok(format!("Merged {branch}"))
}

/// Replace the commits after `start` with a single one; on failure put the
/// individual commits back.
async fn fold_commits<V: Vcs + ?Sized>(
    vcs: &V,
    start: &str,
    message: &str,
) -> Result<String, VcsError> {
    let individual = vcs.head().await?;
    vcs.raw(&["reset", "--soft", start]).await?;
    match vcs.commit(message).await {
        Ok(info) => Ok(info.hash),
        Err(e) => {
            vcs.raw(&["reset", "--soft", individual.as_str()]).await?;
            Err(e)
        }
    }
}
