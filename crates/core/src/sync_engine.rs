//! Safe sync pipeline.
//!
//! The [`SyncOrchestrator`] makes a sequence of non-atomic git mutations look
//! as close to atomic as git allows:
//!
//! 1. Safety check: repository, remote, no leftover conflicts.
//! 2. Stash local changes if the tree is dirty.
//! 3. Pull the remote branch.
//! 4. Pop the stash, resolving conflicts if asked to.
//! 5. Stage, commit and push.
//!
//! Precondition failures are returned as `Err` before anything is touched.
//! Once the pipeline has started mutating, every failure is classified and
//! returned inside a [`SyncResult`] together with the step trail, so the
//! caller always knows what was and wasn't done.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::conflict::detector::detect_conflicts;
use crate::conflict::resolver::{resolve_with, ResolveOptions};
use crate::errors::{ErrorKind, StepError, SyncError, VcsError};
use crate::git::{PullOptions, PushOptions, Vcs, Workspace};
use crate::models::{RepoStatus, RollbackResult, SyncOptions, SyncResult, SyncStep};
use crate::progress::{CancellationFlag, ProgressReporter};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// What the most recent sync run left behind, for rollback.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSession {
    /// HEAD before the pull.
    pub start_head: Option<String>,
    /// Content hash of the stash created by the run.
    pub stash_id: Option<String>,
    pub commit_hash: Option<String>,
    pub pushed: bool,
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

// ---------------------------------------------------------------------------
// Step trail
// ---------------------------------------------------------------------------

/// Accumulates the result of one run.
struct Pipeline<'a> {
    result: SyncResult,
    progress: &'a ProgressReporter,
    show_progress: bool,
    /// A stash from this run that has not been reintegrated.
    stash_outstanding: bool,
}

impl<'a> Pipeline<'a> {
    fn new(progress: &'a ProgressReporter, show_progress: bool) -> Self {
        Self {
            result: SyncResult::default(),
            progress,
            show_progress,
            stash_outstanding: false,
        }
    }

    fn record(&mut self, step: SyncStep, text: impl Into<String>) {
        let text = text.into();
        info!(%step, "{text}");
        if self.show_progress {
            self.progress.step(step, text.clone());
        }
        self.result.steps.push(text);
    }

    fn warn(&mut self, step: SyncStep, text: String) {
        self.record(step, format!("Warning: {text}"));
        self.result.warnings.push(text);
    }

    fn rollback_available(&self) -> bool {
        self.stash_outstanding || (self.result.commit_hash.is_some() && !self.result.pushed)
    }

    fn fail(mut self, step: SyncStep, error: StepError) -> SyncResult {
        warn!(%step, kind = %error.kind, error = %error.message, "sync step failed");
        let text = format!("{step} failed: {}", error.message);
        if self.show_progress {
            self.progress.step(step, text.clone());
        }
        self.result.steps.push(text);
        self.result.success = false;
        self.result.message = format!("Sync failed during {step}: {}", error.message);
        self.result.failed_step = Some(step);
        self.result.rollback_available = self.rollback_available();
        self.result.error = Some(error);
        self.result
    }

    fn cancelled(self, step: SyncStep) -> SyncResult {
        self.fail(
            step,
            StepError::new(ErrorKind::Cancelled, format!("cancelled before {step}")),
        )
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the sync pipeline against a locked [`Workspace`].
pub struct SyncOrchestrator<V> {
    workspace: Arc<Workspace<V>>,
    progress: ProgressReporter,
    cancel: CancellationFlag,
    session: Mutex<Option<SyncSession>>,
}

impl<V: Vcs> SyncOrchestrator<V> {
    pub fn new(workspace: Arc<Workspace<V>>) -> Self {
        Self {
            workspace,
            progress: ProgressReporter::disabled(),
            cancel: CancellationFlag::new(),
            session: Mutex::new(None),
        }
    }

    /// Emit step events on `progress`.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Check `cancel` between steps.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The session recorded by the most recent run, if any.
    pub fn last_session(&self) -> Option<SyncSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_session(&self, f: impl FnOnce(&mut SyncSession)) {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.get_or_insert_with(SyncSession::default));
    }

    fn set_session(&self, session: Option<SyncSession>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Stash, pull, restore, commit `message` and push.
    ///
    /// `files` restricts staging to the given paths; `None` stages everything.
    #[instrument(skip(self, message, files, options), fields(remote = %options.remote))]
    pub async fn sync_commit(
        &self,
        message: &str,
        files: Option<&[String]>,
        options: &SyncOptions,
    ) -> Result<SyncResult, SyncError> {
        if message.trim().is_empty() {
            return Err(SyncError::InvalidArgument(
                "commit message must not be empty".into(),
            ));
        }
        if files.is_some_and(|f| f.is_empty()) {
            return Err(SyncError::InvalidArgument(
                "file list is empty; pass no list to stage everything".into(),
            ));
        }

        let vcs = self.workspace.lock()?;
        let vcs: &V = &vcs;
        let mut run = Pipeline::new(&self.progress, options.show_progress);

        let (branch, status) = self.safety_check(vcs, options, &mut run).await?;
        let remote = options.remote.as_str();

        self.set_session(Some(SyncSession {
            start_head: vcs.head().await.ok(),
            ..SyncSession::default()
        }));

        // -- CheckWorkingDir / Stash ------------------------------------------------
        if self.cancel.is_cancelled() {
            return Ok(run.cancelled(SyncStep::CheckWorkingDir));
        }
        if status.is_clean() {
            run.record(
                SyncStep::CheckWorkingDir,
                "Working directory clean, nothing to stash",
            );
        } else {
            let changed = status.staged.len()
                + status.modified.len()
                + status.not_added.len()
                + status.deleted.len();
            run.record(
                SyncStep::CheckWorkingDir,
                format!("Working directory has {changed} changed file(s)"),
            );

            if self.cancel.is_cancelled() {
                return Ok(run.cancelled(SyncStep::Stash));
            }
            let stash_message = format!("Smart sync stash - {}", Utc::now().to_rfc3339());
            match vcs.stash_save(&stash_message, options.include_untracked).await {
                Ok(entry) => {
                    run.result.stash_created = true;
                    run.result.stash_id = Some(entry.hash.clone());
                    run.stash_outstanding = true;
                    self.update_session(|s| s.stash_id = Some(entry.hash.clone()));
                    run.record(
                        SyncStep::Stash,
                        format!(
                            "Stashed local changes as stash@{{{}}} ({})",
                            entry.index,
                            short(&entry.hash)
                        ),
                    );
                }
                Err(VcsError::NothingToStash) => {
                    run.record(SyncStep::Stash, "Nothing to stash, only untracked files");
                }
                Err(e) => return Ok(run.fail(SyncStep::Stash, (&e).into())),
            }
        }

        // -- Pull ------------------------------------------------------------------
        if self.cancel.is_cancelled() {
            return Ok(run.cancelled(SyncStep::Pull));
        }
        if let Err(e) = vcs.pull(remote, &branch, &PullOptions::default()).await {
            let mut error = StepError::from(&e);
            if let Ok(Some(op)) = vcs.in_progress().await {
                error.kind = ErrorKind::Conflict;
                match vcs.raw(&op.abort_args()).await {
                    Ok(_) => run.record(SyncStep::Pull, format!("Aborted the {op} left by pull")),
                    Err(abort_err) => {
                        run.warn(SyncStep::Pull, format!("could not abort {op}: {abort_err}"))
                    }
                }
            }
            return Ok(run.fail(SyncStep::Pull, error));
        }
        run.record(SyncStep::Pull, format!("Pulled {remote}/{branch}"));

        // -- PopStash / ResolveConflicts -------------------------------------------
        if let Some(hash) = run.result.stash_id.clone().filter(|_| run.stash_outstanding) {
            if self.cancel.is_cancelled() {
                return Ok(run.cancelled(SyncStep::PopStash));
            }
            if let Some(result) = self.restore_stash(vcs, &hash, options, &mut run).await {
                return Ok(result);
            }
        }

        // -- AddFiles --------------------------------------------------------------
        if self.cancel.is_cancelled() {
            return Ok(run.cancelled(SyncStep::AddFiles));
        }
        let paths: Vec<String> = match files {
            Some(files) => files.to_vec(),
            None => vec![".".into()],
        };
        if let Err(e) = vcs.add(&paths).await {
            return Ok(run.fail(SyncStep::AddFiles, (&e).into()));
        }
        run.record(
            SyncStep::AddFiles,
            match files {
                Some(files) => format!("Staged {} file(s)", files.len()),
                None => "Staged all changes".to_string(),
            },
        );

        // -- Commit ----------------------------------------------------------------
        if self.cancel.is_cancelled() {
            return Ok(run.cancelled(SyncStep::Commit));
        }
        let has_staged = match vcs.raw(&["diff", "--cached", "--quiet"]).await {
            Ok(_) => false,
            Err(VcsError::CommandFailed { exit_code: 1, .. }) => true,
            Err(e) => return Ok(run.fail(SyncStep::Commit, (&e).into())),
        };
        if has_staged {
            match vcs.commit(message).await {
                Ok(commit) => {
                    run.result.commit_hash = Some(commit.hash.clone());
                    self.update_session(|s| s.commit_hash = Some(commit.hash.clone()));
                    let subject = message.lines().next().unwrap_or(message);
                    run.record(
                        SyncStep::Commit,
                        format!("Committed {}: {subject}", short(&commit.hash)),
                    );
                }
                Err(e) => return Ok(run.fail(SyncStep::Commit, (&e).into())),
            }
        } else {
            run.record(SyncStep::Commit, "Nothing to commit");
        }

        // -- Push ------------------------------------------------------------------
        if self.cancel.is_cancelled() {
            return Ok(run.cancelled(SyncStep::Push));
        }
        let after = match vcs.status().await {
            Ok(s) => s,
            Err(e) => return Ok(run.fail(SyncStep::Push, (&e).into())),
        };
        if run.result.commit_hash.is_some() || after.ahead > 0 {
            let opts = PushOptions {
                set_upstream: after.upstream.is_none(),
            };
            if let Err(e) = vcs.push(remote, &branch, &opts).await {
                return Ok(run.fail(SyncStep::Push, (&e).into()));
            }
            run.result.pushed = true;
            self.update_session(|s| s.pushed = true);
            run.record(SyncStep::Push, format!("Pushed to {remote}/{branch}"));
        } else {
            run.record(SyncStep::Push, "Nothing to push");
        }

        // -- Done ------------------------------------------------------------------
        run.result.success = true;
        run.result.rollback_available = run.rollback_available();
        run.result.message = match &run.result.commit_hash {
            Some(hash) => format!("Synced {} to {remote}/{branch}", short(hash)),
            None => format!("{remote}/{branch} is up to date, nothing to commit"),
        };
        run.record(SyncStep::Done, "Sync completed");
        Ok(run.result)
    }

    /// Preconditions. Nothing has been mutated when this returns `Err`.
    async fn safety_check(
        &self,
        vcs: &V,
        options: &SyncOptions,
        run: &mut Pipeline<'_>,
    ) -> Result<(String, RepoStatus), SyncError> {
        let workdir = vcs.workdir().display().to_string();
        if !vcs.is_repository().await? {
            return Err(VcsError::RepositoryNotFound(workdir).into());
        }

        let remotes = vcs.remotes().await?;
        if remotes.is_empty() {
            return Err(VcsError::NoRemote(workdir).into());
        }
        if !remotes.iter().any(|r| r == &options.remote) {
            return Err(SyncError::InvalidArgument(format!(
                "remote '{}' is not configured (available: {})",
                options.remote,
                remotes.join(", ")
            )));
        }

        if let Some(op) = vcs.in_progress().await? {
            return Err(SyncError::OperationInProgress(op.to_string()));
        }

        // Re-stashing on top of conflict markers would bury them.
        let conflicts = detect_conflicts(vcs).await?;
        if !conflicts.is_empty() {
            return Err(SyncError::UnresolvedConflicts {
                files: conflicts.into_iter().map(|f| f.path).collect(),
            });
        }

        let status = vcs.status().await?;
        let branch = options
            .branch
            .clone()
            .or_else(|| status.current_branch.clone())
            .ok_or_else(|| {
                SyncError::InvalidArgument("HEAD is detached; pass an explicit branch".into())
            })?;

        if options.confirm_before_action && options.protected_branches.contains(&branch) {
            run.warn(
                SyncStep::SafetyCheck,
                format!("branch '{branch}' is protected, confirm before syncing"),
            );
        }
        run.record(
            SyncStep::SafetyCheck,
            format!(
                "Safety check passed: branch '{branch}', remote '{}'",
                options.remote
            ),
        );
        Ok((branch, status))
    }

    /// Pop the run's stash. Returns `Some` when the pipeline must stop.
    async fn restore_stash(
        &self,
        vcs: &V,
        hash: &str,
        options: &SyncOptions,
        run: &mut Pipeline<'_>,
    ) -> Option<SyncResult> {
        let entry = match vcs.find_stash(hash).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                let error = StepError::new(
                    ErrorKind::CommandFailure,
                    format!("stash {} vanished before it could be restored", short(hash)),
                );
                return Some(take(run).fail(SyncStep::PopStash, error));
            }
            Err(e) => return Some(take(run).fail(SyncStep::PopStash, (&e).into())),
        };

        let pop_err = match vcs.stash_pop(entry.index).await {
            Ok(()) => {
                run.stash_outstanding = false;
                run.record(SyncStep::PopStash, "Restored stashed changes");
                return None;
            }
            Err(e) => e,
        };

        let conflicted = match vcs.status().await {
            Ok(status) => status.conflicted,
            Err(e) => return Some(take(run).fail(SyncStep::PopStash, (&e).into())),
        };
        if conflicted.is_empty() {
            // Not a conflict (e.g. untracked files in the way); the stash stays.
            return Some(take(run).fail(SyncStep::PopStash, (&pop_err).into()));
        }

        let kept = matches!(vcs.find_stash(hash).await, Ok(Some(_)));
        run.stash_outstanding = kept;
        run.record(
            SyncStep::PopStash,
            format!(
                "Restoring the stash produced conflicts in {} file(s); stash entry {}",
                conflicted.len(),
                if kept { "kept" } else { "consumed" }
            ),
        );
        if !kept {
            warn!(hash, "stash entry consumed by a conflicting pop");
        }

        if self.cancel.is_cancelled() {
            return Some(take(run).cancelled(SyncStep::ResolveConflicts));
        }
        let opts = if options.auto_resolve_conflicts {
            ResolveOptions::new(options.conflict_strategy)
        } else {
            ResolveOptions::report_only()
        };
        let resolution = match resolve_with(vcs, &opts).await {
            Ok(resolution) => resolution,
            Err(e) => return Some(take(run).fail(SyncStep::ResolveConflicts, (&e).into())),
        };
        let resolved = resolution.resolved;
        let message = resolution.message.clone();
        run.result.conflicts = Some(resolution);
        if !resolved {
            return Some(
                take(run).fail(
                    SyncStep::ResolveConflicts,
                    StepError::new(ErrorKind::Conflict, message),
                ),
            );
        }
        run.record(SyncStep::ResolveConflicts, message);

        if kept {
            // Its content is in the tree now; re-resolve the index by hash.
            let dropped = match vcs.find_stash(hash).await {
                Ok(Some(entry)) => vcs.stash_drop(entry.index).await,
                Ok(None) => Err(VcsError::StashNotFound(hash.to_string())),
                Err(e) => Err(e),
            };
            match dropped {
                Ok(()) => {
                    run.stash_outstanding = false;
                    run.record(SyncStep::ResolveConflicts, "Dropped the reintegrated stash entry");
                }
                Err(e) => run.warn(
                    SyncStep::ResolveConflicts,
                    format!("could not drop stash {}: {e}", short(hash)),
                ),
            }
        }
        None
    }

    /// Undo the last sync locally.
    ///
    /// Hard-resets the unpushed commit this session made (or, when it made
    /// none, the pull and any conflict markers) and pops the stash if it
    /// still exists. Commits the session did not make are never reset.
    /// Rejected once the session's commit has been pushed.
    #[instrument(skip(self))]
    pub async fn rollback(&self, stash_id: Option<&str>) -> Result<RollbackResult, SyncError> {
        let vcs = self.workspace.lock()?;
        let vcs: &V = &vcs;
        let session = self.last_session().unwrap_or_default();

        if session.pushed {
            return Err(SyncError::RollbackUnavailable(
                "the sync commit was already pushed; history is shared".into(),
            ));
        }

        let status = vcs.status().await?;
        let stash_hash = stash_id.map(str::to_string).or(session.stash_id.clone());
        let stash = match &stash_hash {
            Some(hash) => vcs.find_stash(hash).await?,
            None => None,
        };

        // Only a commit this session made, still at HEAD, is ours to drop.
        let head = vcs.head().await.ok();
        let own_commit = match (&session.commit_hash, &head) {
            (Some(commit), Some(head)) if commit == head && status.ahead > 0 => true,
            (Some(commit), _) if status.ahead > 0 => {
                return Err(SyncError::RollbackUnavailable(format!(
                    "HEAD moved since the sync commit {}",
                    short(commit)
                )));
            }
            _ => false,
        };
        let target = if own_commit {
            Some("HEAD~1".to_string())
        } else if let Some(start) = session.start_head.clone().filter(|s| Some(s) != head.as_ref()) {
            Some(start)
        } else if status.has_conflicts() {
            Some("HEAD".to_string())
        } else {
            None
        };
        if target.is_none() && stash.is_none() {
            return Err(SyncError::RollbackUnavailable(
                "no commit from this sync and no stash to restore".into(),
            ));
        }

        let mut out = RollbackResult::default();
        if let Some(target) = target {
            vcs.raw(&["reset", "--hard", &target]).await?;
            info!(%target, "rollback reset");
            out.reset_performed = true;
            out.steps.push(format!("Reset working tree to {target}"));
        }

        if let Some(hash) = stash_hash.filter(|_| stash.is_some()) {
            // The reset may not shift stashes, but never trust an old index.
            match vcs.find_stash(&hash).await? {
                Some(entry) => match vcs.stash_pop(entry.index).await {
                    Ok(()) => {
                        out.stash_restored = true;
                        out.steps.push(format!("Restored stash {}", short(&hash)));
                    }
                    Err(e) => {
                        warn!(error = %e, "stash could not be restored during rollback");
                        if vcs.status().await.map(|s| s.has_conflicts()).unwrap_or(false) {
                            vcs.raw(&["reset", "--merge"]).await?;
                        }
                        out.steps.push(format!(
                            "Stash {} kept; restore it manually with `git stash pop`",
                            short(&hash)
                        ));
                        out.error = Some(StepError::from(&e));
                    }
                },
                None => debug!(%hash, "stash already gone"),
            }
        }

        self.set_session(None);
        Ok(out)
    }
}

/// Move the accumulated run out of a `&mut` so it can be finalised.
fn take<'a>(run: &mut Pipeline<'a>) -> Pipeline<'a> {
    Pipeline {
        result: std::mem::take(&mut run.result),
        progress: run.progress,
        show_progress: run.show_progress,
        stash_outstanding: run.stash_outstanding,
    }
}
