//! Shared fixtures for the git-backed integration tests.
//!
//! Each fixture is a bare `origin` plus two clones: `local`, the working
//! tree under test, and `other`, a teammate that pushes competing changes.
//! Setup shells out to `git`; assertions inspect repositories through git2.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use tempfile::TempDir;

use gitsafe_core::{GitCli, Workspace};

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run git in `dir` and return stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn configure(dir: &Path) {
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

pub struct Fixture {
    _dir: TempDir,
    pub origin: PathBuf,
    pub local: PathBuf,
    pub other: PathBuf,
}

impl Fixture {
    /// `origin` with one commit on `main` containing `f.txt`, cloned twice.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path();
        let origin = root.join("origin.git");
        let local = root.join("local");
        let other = root.join("other");

        git(root, &["init", "-q", "--bare", "origin.git"]);
        git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        git(root, &["clone", "-q", "origin.git", "local"]);
        configure(&local);
        git(&local, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(local.join("f.txt"), "line one\nline two\nline three\n").unwrap();
        git(&local, &["add", "."]);
        git(&local, &["commit", "-q", "-m", "initial commit"]);
        git(&local, &["push", "-q", "-u", "origin", "main"]);

        git(root, &["clone", "-q", "origin.git", "other"]);
        configure(&other);

        Self {
            _dir: dir,
            origin,
            local,
            other,
        }
    }

    pub fn workspace(&self) -> Arc<Workspace<GitCli>> {
        Arc::new(Workspace::new(GitCli::new(&self.local)))
    }

    pub fn write(&self, dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    pub fn read(&self, dir: &Path, file: &str) -> String {
        std::fs::read_to_string(dir.join(file)).unwrap()
    }

    /// Commit `content` to `file` in `dir` without pushing.
    pub fn commit(&self, dir: &Path, file: &str, content: &str, message: &str) -> String {
        self.write(dir, file, content);
        git(dir, &["add", file]);
        git(dir, &["commit", "-q", "-m", message]);
        head(dir)
    }

    /// The teammate commits and pushes a change to `file`.
    pub fn push_from_other(&self, file: &str, content: &str, message: &str) -> String {
        let hash = self.commit(&self.other, file, content, message);
        git(&self.other, &["push", "-q", "origin", "main"]);
        hash
    }

    pub fn stash_count(&self) -> usize {
        git(&self.local, &["stash", "list"]).lines().count()
    }
}

pub fn head(dir: &Path) -> String {
    let repo = git2::Repository::open(dir).unwrap();
    let oid = repo.head().unwrap().target().unwrap();
    oid.to_string()
}

pub fn head_message(dir: &Path) -> String {
    let repo = git2::Repository::open(dir).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    commit.message().unwrap_or_default().trim().to_string()
}

/// Tip of `refs/heads/main` in a (possibly bare) repository.
pub fn main_tip(dir: &Path) -> String {
    let repo = git2::Repository::open(dir).unwrap();
    let oid = repo.refname_to_id("refs/heads/main").unwrap();
    oid.to_string()
}

pub fn tag_names(dir: &Path) -> Vec<String> {
    let repo = git2::Repository::open(dir).unwrap();
    let tags = repo.tag_names(None).unwrap();
    tags.iter().flatten().map(String::from).collect()
}

pub fn local_branches(dir: &Path) -> Vec<String> {
    let repo = git2::Repository::open(dir).unwrap();
    let branches = repo.branches(Some(git2::BranchType::Local)).unwrap();
    branches
        .filter_map(|b| b.ok())
        .filter_map(|(b, _)| b.name().ok().flatten().map(String::from))
        .collect()
}

/// True when status shows neither conflicts nor an operation in progress.
pub fn is_operable(dir: &Path) -> bool {
    let repo = git2::Repository::open(dir).unwrap();
    let conflicted = repo.index().map(|i| i.has_conflicts()).unwrap_or(true);
    !conflicted && repo.state() == git2::RepositoryState::Clean
}
