//! Scripted in-memory [`Vcs`] double for unit tests.
//!
//! Models just enough of a working tree (status lists, a stash stack with
//! snapshots, an in-progress marker and an unpushed-commit counter) to drive
//! every pipeline and batch path. Failures are injected by call prefix.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::VcsError;
use crate::git::{InProgress, PullOptions, PushOptions, Vcs};
use crate::models::{CommitInfo, RepoStatus, StashEntry};
use crate::progress::CancellationFlag;

/// A failure to inject when a matching call is made.
#[derive(Debug, Clone)]
pub enum Failure {
    /// Non-zero exit with the given output.
    Command(&'static str),
    /// Non-zero exit that leaves these paths conflicted.
    Conflict(Vec<String>),
    Timeout,
    Network,
}

#[derive(Debug)]
struct Injected {
    prefix: String,
    failure: Failure,
    once: bool,
}

#[derive(Debug, Default)]
struct State {
    status: RepoStatus,
    stashes: Vec<(StashEntry, RepoStatus)>,
    in_progress: Option<InProgress>,
    commits: u32,
    stash_seq: u32,
    branches: Vec<String>,
    calls: Vec<(String, bool)>,
    failures: Vec<Injected>,
    cancel_on: Vec<(String, CancellationFlag)>,
}

/// In-memory [`Vcs`] whose behaviour is scripted per test.
#[derive(Debug)]
pub struct ScriptedVcs {
    workdir: PathBuf,
    is_repo: bool,
    remotes: Vec<String>,
    state: Mutex<State>,
}

impl Default for ScriptedVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedVcs {
    /// A repository on `main` tracking `origin/main`, clean and in sync.
    pub fn new() -> Self {
        let state = State {
            status: RepoStatus {
                current_branch: Some("main".into()),
                upstream: Some("origin/main".into()),
                ..RepoStatus::default()
            },
            branches: vec!["main".into()],
            ..State::default()
        };
        Self {
            workdir: PathBuf::from("/nonexistent/scripted-repo"),
            is_repo: true,
            remotes: vec!["origin".into()],
            state: Mutex::new(state),
        }
    }

    pub fn not_a_repository(mut self) -> Self {
        self.is_repo = false;
        self
    }

    pub fn without_remotes(mut self) -> Self {
        self.remotes.clear();
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn with_branches(self, branches: &[&str]) -> Self {
        self.state().branches = branches.iter().map(|b| b.to_string()).collect();
        self
    }

    /// Mutate the scripted status in place.
    pub fn edit_status(&self, f: impl FnOnce(&mut RepoStatus)) {
        f(&mut self.state().status);
    }

    pub fn with_modified(self, paths: &[&str]) -> Self {
        self.edit_status(|s| s.modified.extend(paths.iter().map(|p| p.to_string())));
        self
    }

    pub fn with_conflicts(self, paths: &[&str]) -> Self {
        self.edit_status(|s| s.conflicted.extend(paths.iter().map(|p| p.to_string())));
        self
    }

    pub fn with_in_progress(self, op: InProgress) -> Self {
        self.state().in_progress = Some(op);
        self
    }

    /// Fail the next call whose description starts with `prefix`.
    pub fn fail_once(self, prefix: &str, failure: Failure) -> Self {
        self.state().failures.push(Injected {
            prefix: prefix.into(),
            failure,
            once: true,
        });
        self
    }

    /// Fail every call whose description starts with `prefix`.
    pub fn fail_always(self, prefix: &str, failure: Failure) -> Self {
        self.state().failures.push(Injected {
            prefix: prefix.into(),
            failure,
            once: false,
        });
        self
    }

    /// Raise `flag` when a call starting with `prefix` is made.
    pub fn cancel_on(self, prefix: &str, flag: CancellationFlag) -> Self {
        self.state().cancel_on.push((prefix.into(), flag));
        self
    }

    pub fn current_status(&self) -> RepoStatus {
        self.state().status.clone()
    }

    pub fn stash_count(&self) -> usize {
        self.state().stashes.len()
    }

    pub fn in_progress_op(&self) -> Option<InProgress> {
        self.state().in_progress
    }

    /// Every call made, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.iter().map(|(c, _)| c.clone()).collect()
    }

    /// Calls that would have changed the repository.
    pub fn mutations(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|(_, mutating)| *mutating)
            .map(|(c, _)| c.clone())
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Record a call and apply any injected failure or cancellation.
    fn enter(&self, call: String, mutating: bool) -> Result<(), VcsError> {
        let mut state = self.state();
        for (prefix, flag) in &state.cancel_on {
            if call.starts_with(prefix.as_str()) {
                flag.cancel();
            }
        }
        state.calls.push((call.clone(), mutating));

        let Some(pos) = state
            .failures
            .iter()
            .position(|f| call.starts_with(f.prefix.as_str()))
        else {
            return Ok(());
        };
        let failure = if state.failures[pos].once {
            state.failures.remove(pos).failure
        } else {
            state.failures[pos].failure.clone()
        };

        let command = format!("git {call}");
        Err(match failure {
            Failure::Command(text) => VcsError::CommandFailed {
                command,
                exit_code: 1,
                stderr: text.into(),
            },
            Failure::Timeout => VcsError::Timeout { command, secs: 60 },
            Failure::Network => VcsError::Network {
                command,
                detail: "fatal: unable to access 'https://example.com/repo.git/'".into(),
            },
            Failure::Conflict(files) => {
                let op = call.split_whitespace().nth(if call.starts_with("raw") { 1 } else { 0 });
                state.in_progress = match op {
                    Some("pull") | Some("merge") => Some(InProgress::Merge),
                    Some("cherry-pick") => Some(InProgress::CherryPick),
                    Some("revert") => Some(InProgress::Revert),
                    _ => state.in_progress,
                };
                let detail = files
                    .iter()
                    .map(|f| format!("CONFLICT (content): Merge conflict in {f}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                state.status.conflicted.extend(files);
                VcsError::CommandFailed {
                    command,
                    exit_code: 1,
                    stderr: detail,
                }
            }
        })
    }

    fn raw_effect(&self, args: &[&str]) -> String {
        let mut state = self.state();
        match args {
            ["rev-parse", "HEAD"] => format!("{:040x}", state.commits),
            ["status", ..] => {
                let s = &state.status;
                let staged = s.staged.iter().map(|p| format!("M  {p}\0"));
                let modified = s.modified.iter().map(|p| format!(" M {p}\0"));
                let conflicted = s.conflicted.iter().map(|p| format!("UU {p}\0"));
                staged.chain(modified).chain(conflicted).collect()
            }
            ["branch", "--format=%(refname:short)", ..] => state
                .branches
                .iter()
                .map(|b| format!("{b}\n"))
                .collect(),
            ["merge" | "cherry-pick" | "revert", "--abort"] | ["reset", "--merge"] => {
                state.in_progress = None;
                state.status.conflicted.clear();
                state.status.staged.clear();
                String::new()
            }
            ["reset", "--hard", target] => {
                if *target == "HEAD~1" {
                    state.status.ahead = state.status.ahead.saturating_sub(1);
                }
                let s = &mut state.status;
                s.staged.clear();
                s.modified.clear();
                s.deleted.clear();
                s.conflicted.clear();
                state.in_progress = None;
                String::new()
            }
            ["merge", "--squash", branch] => {
                state.status.staged.push(format!("squashed-{branch}"));
                String::new()
            }
            ["reset", "--soft", target] => {
                let target = u32::from_str_radix(target, 16).unwrap_or(state.commits);
                if target < state.commits {
                    let undone = state.commits - target;
                    state.commits = target;
                    state.status.ahead = state.status.ahead.saturating_sub(undone);
                    state.status.staged.push(format!("undone-{undone}"));
                }
                String::new()
            }
            ["rm", "--", paths @ ..] => {
                state.status.conflicted.retain(|c| !paths.contains(&c.as_str()));
                String::new()
            }
            ["commit", "--no-edit"] | ["cherry-pick" | "revert", "--continue"] => {
                state.in_progress = None;
                state.commits += 1;
                state.status.ahead += 1;
                state.status.staged.clear();
                String::new()
            }
            ["cherry-pick" | "revert", ..] => {
                state.commits += 1;
                state.status.ahead += 1;
                String::new()
            }
            ["branch", name, ..] if !name.starts_with('-') => {
                state.branches.push(name.to_string());
                String::new()
            }
            _ => String::new(),
        }
    }
}

fn is_read_only(args: &[&str]) -> bool {
    match args.first() {
        Some(&"rev-parse") | Some(&"status") | Some(&"log") | Some(&"diff") | Some(&"show")
        | Some(&"for-each-ref") => {
            true
        }
        Some(&"branch") => args.iter().skip(1).all(|a| a.starts_with("--")),
        _ => false,
    }
}

#[async_trait]
impl Vcs for ScriptedVcs {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn is_repository(&self) -> Result<bool, VcsError> {
        self.enter("is_repository".into(), false)?;
        Ok(self.is_repo)
    }

    async fn remotes(&self) -> Result<Vec<String>, VcsError> {
        self.enter("remotes".into(), false)?;
        Ok(self.remotes.clone())
    }

    async fn status(&self) -> Result<RepoStatus, VcsError> {
        self.enter("status".into(), false)?;
        Ok(self.current_status())
    }

    async fn add(&self, paths: &[String]) -> Result<(), VcsError> {
        self.enter(format!("add {}", paths.join(" ")), true)?;
        let mut state = self.state();
        let s = &mut state.status;
        let all = paths.iter().any(|p| p == ".");
        let selected = |p: &String| all || paths.contains(p);

        let mut moved: Vec<String> = Vec::new();
        for list in [&mut s.modified, &mut s.not_added, &mut s.conflicted] {
            moved.extend(list.iter().filter(|&p| selected(p)).cloned());
            list.retain(|p| !selected(p));
        }
        for path in moved {
            if !s.staged.contains(&path) {
                s.staged.push(path);
            }
        }
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<CommitInfo, VcsError> {
        self.enter(format!("commit {message}"), true)?;
        let mut state = self.state();
        if state.status.staged.is_empty() && state.status.deleted.is_empty() {
            return Err(VcsError::CommandFailed {
                command: "git commit".into(),
                exit_code: 1,
                stderr: "nothing to commit, working tree clean".into(),
            });
        }
        state.status.staged.clear();
        state.status.deleted.clear();
        state.commits += 1;
        state.status.ahead += 1;
        Ok(CommitInfo {
            hash: format!("{:040x}", state.commits),
        })
    }

    async fn push(&self, remote: &str, branch: &str, _opts: &PushOptions) -> Result<(), VcsError> {
        self.enter(format!("push {remote} {branch}"), true)?;
        self.state().status.ahead = 0;
        Ok(())
    }

    async fn pull(&self, remote: &str, branch: &str, _opts: &PullOptions) -> Result<(), VcsError> {
        self.enter(format!("pull {remote} {branch}"), true)?;
        self.state().status.behind = 0;
        Ok(())
    }

    async fn stash_save(
        &self,
        message: &str,
        include_untracked: bool,
    ) -> Result<StashEntry, VcsError> {
        self.enter(format!("stash_save {message}"), true)?;
        let mut state = self.state();

        let mut snapshot = state.status.clone();
        if !include_untracked {
            snapshot.not_added.clear();
        }
        if !snapshot.has_tracked_changes() && snapshot.not_added.is_empty() {
            return Err(VcsError::NothingToStash);
        }

        let s = &mut state.status;
        s.staged.clear();
        s.modified.clear();
        s.deleted.clear();
        if include_untracked {
            s.not_added.clear();
        }

        state.stash_seq += 1;
        let entry = StashEntry {
            index: 0,
            message: message.into(),
            branch: state.status.current_branch.clone().unwrap_or_default(),
            hash: format!("{:040x}", 0xa000 + state.stash_seq),
            date: Utc::now().fixed_offset(),
        };
        state.stashes.insert(0, (entry.clone(), snapshot));
        for (i, (e, _)) in state.stashes.iter_mut().enumerate() {
            e.index = i;
        }
        Ok(entry)
    }

    async fn stash_pop(&self, index: usize) -> Result<(), VcsError> {
        self.enter(format!("stash_pop {index}"), true)?;
        let mut state = self.state();
        if index >= state.stashes.len() {
            return Err(VcsError::StashNotFound(format!("stash@{{{index}}}")));
        }
        let (_, snapshot) = state.stashes.remove(index);
        for (i, (e, _)) in state.stashes.iter_mut().enumerate() {
            e.index = i;
        }
        let s = &mut state.status;
        s.staged.extend(snapshot.staged);
        s.modified.extend(snapshot.modified);
        s.deleted.extend(snapshot.deleted);
        s.not_added.extend(snapshot.not_added);
        Ok(())
    }

    async fn stash_apply(&self, index: usize) -> Result<(), VcsError> {
        self.enter(format!("stash_apply {index}"), true)?;
        let mut state = self.state();
        let snapshot = state
            .stashes
            .get(index)
            .map(|(_, snap)| snap.clone())
            .ok_or_else(|| VcsError::StashNotFound(format!("stash@{{{index}}}")))?;
        state.status.modified.extend(snapshot.modified);
        Ok(())
    }

    async fn stash_drop(&self, index: usize) -> Result<(), VcsError> {
        self.enter(format!("stash_drop {index}"), true)?;
        let mut state = self.state();
        if index >= state.stashes.len() {
            return Err(VcsError::StashNotFound(format!("stash@{{{index}}}")));
        }
        state.stashes.remove(index);
        for (i, (e, _)) in state.stashes.iter_mut().enumerate() {
            e.index = i;
        }
        Ok(())
    }

    async fn stash_list(&self) -> Result<Vec<StashEntry>, VcsError> {
        self.enter("stash_list".into(), false)?;
        Ok(self.state().stashes.iter().map(|(e, _)| e.clone()).collect())
    }

    async fn stash_clear(&self) -> Result<(), VcsError> {
        self.enter("stash_clear".into(), true)?;
        self.state().stashes.clear();
        Ok(())
    }

    async fn raw(&self, args: &[&str]) -> Result<String, VcsError> {
        if let [cmd @ "rev-parse", "-q", "--verify", marker] = args {
            self.enter(format!("raw {cmd} {marker}"), false)?;
            let current = self.state().in_progress;
            let matches = match current {
                Some(InProgress::Merge) => *marker == "MERGE_HEAD",
                Some(InProgress::CherryPick) => *marker == "CHERRY_PICK_HEAD",
                Some(InProgress::Revert) => *marker == "REVERT_HEAD",
                None => false,
            };
            return if matches {
                Ok(format!("{:040x}\n", 0xbeef))
            } else {
                Err(VcsError::CommandFailed {
                    command: format!("git rev-parse -q --verify {marker}"),
                    exit_code: 1,
                    stderr: String::new(),
                })
            };
        }
        if let ["diff", "--cached", "--quiet"] = args {
            self.enter("raw diff --cached --quiet".into(), false)?;
            let status = self.current_status();
            return if status.staged.is_empty() && status.deleted.is_empty() {
                Ok(String::new())
            } else {
                Err(VcsError::CommandFailed {
                    command: "git diff --cached --quiet".into(),
                    exit_code: 1,
                    stderr: String::new(),
                })
            };
        }
        self.enter(format!("raw {}", args.join(" ")), !is_read_only(args))?;
        Ok(self.raw_effect(args))
    }
}
