//! Conflict resolution.
//!
//! Resolution is best-effort per file: a failure on one file is logged and
//! the loop moves on, then the outcome is decided by a fresh scan. The
//! report-only mode (`manual` without auto-resolve) issues no mutating
//! command at all, so calling it repeatedly is harmless.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::detector::detect_conflicts;
use crate::errors::{ConflictError, VcsError};
use crate::git::{InProgress, Vcs, Workspace};
use crate::models::{ConflictFile, ConflictKind, ConflictResolutionResult, ConflictStrategy};

/// What to resolve and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveOptions {
    pub strategy: ConflictStrategy,
    /// Only meaningful for `manual`: stage files already cleaned by hand.
    pub auto_resolve: bool,
    /// Restrict resolution to these paths; `None` means every conflict.
    pub files: Option<Vec<String>>,
}

impl ResolveOptions {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            auto_resolve: true,
            files: None,
        }
    }

    /// Report conflicts without touching the repository.
    pub fn report_only() -> Self {
        Self {
            strategy: ConflictStrategy::Manual,
            auto_resolve: false,
            files: None,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn is_report_only(&self) -> bool {
        self.strategy == ConflictStrategy::Manual && !self.auto_resolve
    }
}

/// Conflict resolution entry points. Each call takes the workspace lock.
pub struct ConflictResolver<V> {
    workspace: Arc<Workspace<V>>,
}

impl<V: Vcs> ConflictResolver<V> {
    pub fn new(workspace: Arc<Workspace<V>>) -> Self {
        Self { workspace }
    }

    pub async fn get_conflict_files(&self) -> Result<Vec<ConflictFile>, ConflictError> {
        let vcs = self.workspace.lock()?;
        Ok(detect_conflicts(&*vcs).await?)
    }

    pub async fn has_conflicts(&self) -> Result<bool, ConflictError> {
        Ok(!self.get_conflict_files().await?.is_empty())
    }

    pub async fn resolve_conflicts(
        &self,
        opts: &ResolveOptions,
    ) -> Result<ConflictResolutionResult, ConflictError> {
        let vcs = self.workspace.lock()?;
        Ok(resolve_with(&*vcs, opts).await?)
    }

    /// Abort the in-progress merge, cherry-pick or revert, or clear the
    /// conflicted paths left by a stash pop/apply.
    pub async fn abort_merge(&self) -> Result<(), ConflictError> {
        let vcs = self.workspace.lock()?;
        match abort_with(&*vcs).await? {
            true => Ok(()),
            false => Err(ConflictError::NothingInProgress),
        }
    }

    /// Conclude the in-progress operation once every conflict is resolved.
    #[instrument(skip(self))]
    pub async fn continue_merge(&self) -> Result<(), ConflictError> {
        let vcs = self.workspace.lock()?;

        let remaining = detect_conflicts(&*vcs).await?;
        if !remaining.is_empty() {
            let files: Vec<String> = remaining.into_iter().map(|f| f.path).collect();
            warn!(count = files.len(), "refusing to continue with unresolved conflicts");
            return Err(ConflictError::Unresolved { files });
        }

        let args: &[&str] = match vcs.in_progress().await? {
            Some(InProgress::Merge) => &["commit", "--no-edit"],
            Some(InProgress::CherryPick) => &["cherry-pick", "--continue"],
            Some(InProgress::Revert) => &["revert", "--continue"],
            None => return Err(ConflictError::NothingInProgress),
        };
        vcs.raw(args).await?;
        info!(command = %args.join(" "), "continued in-progress operation");
        Ok(())
    }
}

/// Resolve conflicts on an already locked working tree.
#[instrument(skip(vcs, opts), fields(strategy = %opts.strategy, auto = opts.auto_resolve))]
pub(crate) async fn resolve_with<V: Vcs + ?Sized>(
    vcs: &V,
    opts: &ResolveOptions,
) -> Result<ConflictResolutionResult, VcsError> {
    let before = detect_conflicts(vcs).await?;
    if before.is_empty() {
        return Ok(ConflictResolutionResult {
            resolved: true,
            conflict_files: Vec::new(),
            unresolved_files: Vec::new(),
            strategy: opts.strategy,
            message: "No conflicts to resolve".into(),
            suggestions: Vec::new(),
        });
    }

    if opts.is_report_only() {
        let unresolved: Vec<String> = before.iter().map(|f| f.path.clone()).collect();
        let in_progress = vcs.in_progress().await?;
        info!(count = unresolved.len(), "conflicts left for manual resolution");
        return Ok(ConflictResolutionResult {
            resolved: false,
            message: format!(
                "{} conflicted file(s) need manual resolution",
                unresolved.len()
            ),
            suggestions: suggestions(&unresolved, in_progress),
            unresolved_files: unresolved,
            conflict_files: before,
            strategy: opts.strategy,
        });
    }

    let targets: Vec<&ConflictFile> = before
        .iter()
        .filter(|f| opts.files.as_ref().map_or(true, |sel| sel.contains(&f.path)))
        .collect();

    let mut touched = 0usize;
    for file in &targets {
        match resolve_file(vcs, file, opts.strategy).await {
            Ok(true) => touched += 1,
            Ok(false) => debug!(path = %file.path, "left for manual resolution"),
            Err(e) => warn!(path = %file.path, error = %e, "failed to resolve file, continuing"),
        }
    }

    let after = detect_conflicts(vcs).await?;
    let unresolved: Vec<String> = after.iter().map(|f| f.path.clone()).collect();
    let resolved = unresolved.is_empty();

    let (message, suggestions) = if resolved {
        info!(touched, "all conflicts resolved");
        (
            format!(
                "Resolved {} conflicted file(s) using '{}'",
                touched, opts.strategy
            ),
            Vec::new(),
        )
    } else {
        warn!(remaining = unresolved.len(), "conflicts remain after resolution");
        let in_progress = vcs.in_progress().await?;
        (
            format!(
                "{} file(s) remain conflicted after '{}' resolution",
                unresolved.len(),
                opts.strategy
            ),
            suggestions(&unresolved, in_progress),
        )
    };

    Ok(ConflictResolutionResult {
        resolved,
        conflict_files: before,
        unresolved_files: unresolved,
        strategy: opts.strategy,
        message,
        suggestions,
    })
}

/// Apply `strategy` to one file. `Ok(false)` means nothing was done.
async fn resolve_file<V: Vcs + ?Sized>(
    vcs: &V,
    file: &ConflictFile,
    strategy: ConflictStrategy,
) -> Result<bool, VcsError> {
    let path = file.path.as_str();
    match strategy {
        ConflictStrategy::Manual => {
            if file.conflict_markers || file.status == ConflictKind::MarkersOnly {
                return Ok(false);
            }
            if vcs.workdir().join(path).exists() {
                vcs.add(&[file.path.clone()]).await?;
            } else {
                vcs.raw(&["rm", "--", path]).await?;
            }
        }
        ConflictStrategy::Ours | ConflictStrategy::Theirs => {
            if file.status == ConflictKind::MarkersOnly {
                warn!(path, "markers without index stages, cannot pick a side");
                return Ok(false);
            }
            if chosen_side_deleted(file.status, strategy) {
                vcs.raw(&["rm", "--", path]).await?;
            } else {
                let side = if strategy == ConflictStrategy::Ours {
                    "--ours"
                } else {
                    "--theirs"
                };
                vcs.raw(&["checkout", side, "--", path]).await?;
                vcs.add(&[file.path.clone()]).await?;
            }
        }
    }
    debug!(path, %strategy, "resolved");
    Ok(true)
}

/// Whether the side picked by `strategy` has no version of the file.
fn chosen_side_deleted(kind: ConflictKind, strategy: ConflictStrategy) -> bool {
    use ConflictKind::*;
    match strategy {
        ConflictStrategy::Ours => matches!(kind, BothDeleted | DeletedByUs | AddedByThem),
        ConflictStrategy::Theirs => matches!(kind, BothDeleted | DeletedByThem | AddedByUs),
        ConflictStrategy::Manual => false,
    }
}

/// Abort whatever left the tree conflicted. Returns whether anything was done.
pub(crate) async fn abort_with<V: Vcs + ?Sized>(vcs: &V) -> Result<bool, VcsError> {
    if let Some(op) = vcs.in_progress().await? {
        vcs.raw(&op.abort_args()).await?;
        info!(%op, "aborted in-progress operation");
        return Ok(true);
    }
    if vcs.status().await?.has_conflicts() {
        vcs.raw(&["reset", "--merge"]).await?;
        info!("cleared conflicted paths with reset --merge");
        return Ok(true);
    }
    Ok(false)
}

fn suggestions(unresolved: &[String], in_progress: Option<InProgress>) -> Vec<String> {
    let mut hints = vec![
        format!(
            "Edit the conflicted files and remove the conflict markers: {}",
            unresolved.join(", ")
        ),
        "Stage each resolved file with `git add <file>`".to_string(),
        "Or resolve again with the 'ours' or 'theirs' strategy to keep one side".to_string(),
    ];
    match in_progress {
        Some(op) => {
            hints.push(match op {
                InProgress::Merge => "Then run `git commit --no-edit`".to_string(),
                other => format!("Then run `git {other} --continue`"),
            });
            hints.push(format!("To give up, run `git {}`", op.abort_args().join(" ")));
        }
        None => hints.push(
            "To give up, run `git reset --merge`; a kept stash entry can be re-applied later"
                .to_string(),
        ),
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, ScriptedVcs};

    fn setup(vcs: ScriptedVcs) -> (Arc<Workspace<ScriptedVcs>>, ConflictResolver<ScriptedVcs>) {
        let ws = Arc::new(Workspace::new(vcs));
        (ws.clone(), ConflictResolver::new(ws))
    }

    fn vcs_of(ws: &Arc<Workspace<ScriptedVcs>>) -> crate::git::WorkspaceGuard<'_, ScriptedVcs> {
        ws.lock().unwrap()
    }

    #[tokio::test]
    async fn test_ours_stages_every_file() {
        let (ws, resolver) = setup(ScriptedVcs::new().with_conflicts(&["a.txt", "b.txt"]));

        let result = resolver
            .resolve_conflicts(&ResolveOptions::new(ConflictStrategy::Ours))
            .await
            .unwrap();
        assert!(result.resolved);
        assert_eq!(result.conflict_files.len(), 2);
        assert!(result.unresolved_files.is_empty());

        let vcs = vcs_of(&ws);
        let status = vcs.current_status();
        assert!(status.conflicted.is_empty());
        assert_eq!(status.staged, vec!["a.txt", "b.txt"]);
        assert!(vcs
            .calls()
            .contains(&"raw checkout --ours -- a.txt".to_string()));
    }

    #[tokio::test]
    async fn test_report_only_is_idempotent() {
        let (ws, resolver) = setup(
            ScriptedVcs::new()
                .with_conflicts(&["a.txt"])
                .with_in_progress(InProgress::Merge),
        );
        let before = vcs_of(&ws).current_status();

        for _ in 0..2 {
            let result = resolver
                .resolve_conflicts(&ResolveOptions::report_only())
                .await
                .unwrap();
            assert!(!result.resolved);
            assert_eq!(result.unresolved_files, vec!["a.txt"]);
            assert!(result
                .suggestions
                .iter()
                .any(|s| s.contains("git merge --abort")));
        }

        let vcs = vcs_of(&ws);
        assert_eq!(vcs.current_status(), before);
        assert!(vcs.mutations().is_empty(), "{:?}", vcs.mutations());
    }

    #[tokio::test]
    async fn test_per_file_failure_does_not_stop_loop() {
        let (ws, resolver) = setup(
            ScriptedVcs::new()
                .with_conflicts(&["a.txt", "b.txt"])
                .fail_once("raw checkout --theirs -- a.txt", Failure::Command("error: path")),
        );

        let result = resolver
            .resolve_conflicts(&ResolveOptions::new(ConflictStrategy::Theirs))
            .await
            .unwrap();
        assert!(!result.resolved);
        assert_eq!(result.unresolved_files, vec!["a.txt"]);
        assert!(vcs_of(&ws).calls().contains(&"add b.txt".to_string()));
    }

    #[test]
    fn test_deleted_side_detection() {
        assert!(chosen_side_deleted(ConflictKind::DeletedByThem, ConflictStrategy::Theirs));
        assert!(!chosen_side_deleted(ConflictKind::DeletedByThem, ConflictStrategy::Ours));
        assert!(chosen_side_deleted(ConflictKind::BothDeleted, ConflictStrategy::Ours));
        assert!(chosen_side_deleted(ConflictKind::AddedByUs, ConflictStrategy::Theirs));
        assert!(!chosen_side_deleted(ConflictKind::BothModified, ConflictStrategy::Ours));
    }

    #[tokio::test]
    async fn test_manual_auto_stages_only_cleaned_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clean.txt"), "merged by hand\n").unwrap();
        std::fs::write(
            dir.path().join("dirty.txt"),
            "<<<<<<< a\n1\n=======\n2\n>>>>>>> b\n",
        )
        .unwrap();
        let (ws, resolver) = setup(
            ScriptedVcs::new()
                .with_workdir(dir.path())
                .with_conflicts(&["clean.txt", "dirty.txt"]),
        );

        let opts = ResolveOptions {
            strategy: ConflictStrategy::Manual,
            auto_resolve: true,
            files: None,
        };
        let result = resolver.resolve_conflicts(&opts).await.unwrap();
        assert!(!result.resolved);
        assert_eq!(result.unresolved_files, vec!["dirty.txt"]);
        assert_eq!(vcs_of(&ws).current_status().staged, vec!["clean.txt"]);
    }

    #[tokio::test]
    async fn test_continue_fails_fast_with_conflicts() {
        let (ws, resolver) = setup(
            ScriptedVcs::new()
                .with_conflicts(&["a.txt"])
                .with_in_progress(InProgress::Merge),
        );
        let err = resolver.continue_merge().await.unwrap_err();
        assert!(matches!(err, ConflictError::Unresolved { ref files } if files == &["a.txt"]));
        assert!(!vcs_of(&ws).calls().iter().any(|c| c.starts_with("raw commit")));
    }

    #[tokio::test]
    async fn test_continue_commits_merge() {
        let (ws, resolver) = setup(ScriptedVcs::new().with_in_progress(InProgress::Merge));
        resolver.continue_merge().await.unwrap();
        let vcs = vcs_of(&ws);
        assert!(vcs.calls().contains(&"raw commit --no-edit".to_string()));
        assert_eq!(vcs.in_progress_op(), None);
    }

    #[tokio::test]
    async fn test_abort_variants() {
        let (_, resolver) = setup(ScriptedVcs::new());
        assert!(matches!(
            resolver.abort_merge().await,
            Err(ConflictError::NothingInProgress)
        ));

        let (ws, resolver) = setup(
            ScriptedVcs::new()
                .with_conflicts(&["x"])
                .with_in_progress(InProgress::CherryPick),
        );
        resolver.abort_merge().await.unwrap();
        assert!(vcs_of(&ws)
            .calls()
            .contains(&"raw cherry-pick --abort".to_string()));

        let (ws, resolver) = setup(ScriptedVcs::new().with_conflicts(&["stash.txt"]));
        resolver.abort_merge().await.unwrap();
        let vcs = vcs_of(&ws);
        assert!(vcs.calls().contains(&"raw reset --merge".to_string()));
        assert!(!vcs.current_status().has_conflicts());
    }

    #[tokio::test]
    async fn test_busy_workspace_is_rejected() {
        let (ws, resolver) = setup(ScriptedVcs::new());
        let _held = ws.lock().unwrap();
        assert!(matches!(
            resolver.has_conflicts().await,
            Err(ConflictError::Vcs(VcsError::Busy))
        ));
    }
}
