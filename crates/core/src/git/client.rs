//! Asynchronous git CLI client.
//!
//! Every mutation goes through the `git` binary so that hooks, config and
//! credential helpers behave exactly as they do for the user. `git2` is only
//! used for cheap read-only repository inspection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use git2::Repository;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::parse::{
    failure_detail, is_network_failure, parse_stash_list, parse_status, STASH_FORMAT,
};
use super::vcs::{PullOptions, PushOptions, Vcs};
use crate::config::GitConfig;
use crate::errors::VcsError;
use crate::models::{CommitInfo, RepoStatus, StashEntry};

/// Subcommands that talk to a remote.
const NETWORK_COMMANDS: &[&str] = &["push", "pull", "fetch"];

/// [`Vcs`] implementation backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    binary: String,
    command_timeout: Duration,
    network_timeout: Duration,
}

impl GitCli {
    /// Create a client for the working tree at `workdir` with default settings.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::from_config(workdir, &GitConfig::default())
    }

    pub fn from_config(workdir: impl Into<PathBuf>, config: &GitConfig) -> Self {
        let client = Self {
            workdir: workdir.into(),
            binary: config.binary.clone(),
            command_timeout: config.command_timeout(),
            network_timeout: config.network_timeout(),
        };
        info!(workdir = %client.workdir.display(), binary = %client.binary, "created GitCli");
        client
    }

    /// Hash of the top stash entry, if any.
    async fn stash_top(&self) -> Result<Option<String>, VcsError> {
        match self.run_git(&["rev-parse", "-q", "--verify", "refs/stash"]).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(VcsError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, VcsError> {
        let network = args.first().is_some_and(|a| NETWORK_COMMANDS.contains(a));
        let budget = if network {
            self.network_timeout
        } else {
            self.command_timeout
        };
        let command = format!("git {}", args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = %command, "running git command");
        let output = match tokio::time::timeout(budget, cmd.output()).await {
            Err(_) => {
                warn!(cmd = %command, secs = budget.as_secs(), "git command timed out");
                return Err(VcsError::Timeout {
                    command,
                    secs: budget.as_secs(),
                });
            }
            Ok(result) => result.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VcsError::BinaryNotFound(self.binary.clone())
                } else {
                    VcsError::Io(e)
                }
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, cmd = %command, stderr = %stderr.trim(), "git command failed");

            if network && is_network_failure(&stderr) {
                return Err(VcsError::Network {
                    command,
                    detail: stderr.trim().to_string(),
                });
            }
            // stash and merge report conflicts on stdout, keep both streams.
            let combined = failure_detail(&stdout, &stderr, exit_code);
            return Err(VcsError::CommandFailed {
                command,
                exit_code,
                stderr: combined,
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Vcs for GitCli {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn is_repository(&self) -> Result<bool, VcsError> {
        Ok(Repository::discover(&self.workdir).is_ok())
    }

    async fn remotes(&self) -> Result<Vec<String>, VcsError> {
        let repo = Repository::discover(&self.workdir)
            .map_err(|_| VcsError::RepositoryNotFound(self.workdir.display().to_string()))?;
        let names = repo.remotes()?;
        Ok(names.iter().flatten().map(String::from).collect())
    }

    #[instrument(skip(self), fields(workdir = %self.workdir.display()))]
    async fn status(&self) -> Result<RepoStatus, VcsError> {
        let out = self
            .run_git(&["status", "--porcelain=v1", "-b", "-z", "--untracked-files=all"])
            .await?;
        parse_status(&out)
    }

    #[instrument(skip(self))]
    async fn add(&self, paths: &[String]) -> Result<(), VcsError> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_git(&args).await?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn commit(&self, message: &str) -> Result<CommitInfo, VcsError> {
        self.run_git(&["commit", "-m", message]).await?;
        let hash = self.head().await?;
        info!(%hash, "created commit");
        Ok(CommitInfo { hash })
    }

    #[instrument(skip(self, opts))]
    async fn push(&self, remote: &str, branch: &str, opts: &PushOptions) -> Result<(), VcsError> {
        let mut args = vec!["push"];
        if opts.set_upstream {
            args.push("-u");
        }
        args.extend([remote, branch]);
        self.run_git(&args).await?;
        info!(remote, branch, "push completed");
        Ok(())
    }

    #[instrument(skip(self, opts))]
    async fn pull(&self, remote: &str, branch: &str, opts: &PullOptions) -> Result<(), VcsError> {
        let mut args = vec!["pull", "--no-edit"];
        args.push(if opts.rebase { "--rebase" } else { "--no-rebase" });
        if opts.ff_only {
            args.push("--ff-only");
        }
        args.extend([remote, branch]);
        self.run_git(&args).await?;
        info!(remote, branch, "pull completed");
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn stash_save(
        &self,
        message: &str,
        include_untracked: bool,
    ) -> Result<StashEntry, VcsError> {
        let before = self.stash_top().await?;

        let mut args = vec!["stash", "push", "-m", message];
        if include_untracked {
            args.push("--include-untracked");
        }
        self.run_git(&args).await?;

        // A clean tree exits 0 with "No local changes to save".
        let after = self.stash_top().await?;
        let hash = match after {
            Some(hash) if Some(&hash) != before.as_ref() => hash,
            _ => return Err(VcsError::NothingToStash),
        };
        let entry = self
            .find_stash(&hash)
            .await?
            .ok_or_else(|| VcsError::StashNotFound(hash.clone()))?;
        info!(hash = %entry.hash, "stashed local changes");
        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn stash_pop(&self, index: usize) -> Result<(), VcsError> {
        let selector = format!("stash@{{{index}}}");
        self.run_git(&["stash", "pop", &selector]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stash_apply(&self, index: usize) -> Result<(), VcsError> {
        let selector = format!("stash@{{{index}}}");
        self.run_git(&["stash", "apply", &selector]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stash_drop(&self, index: usize) -> Result<(), VcsError> {
        let selector = format!("stash@{{{index}}}");
        self.run_git(&["stash", "drop", &selector]).await?;
        Ok(())
    }

    async fn stash_list(&self) -> Result<Vec<StashEntry>, VcsError> {
        let out = self.run_git(&["stash", "list", STASH_FORMAT]).await?;
        parse_stash_list(&out)
    }

    #[instrument(skip(self))]
    async fn stash_clear(&self) -> Result<(), VcsError> {
        self.run_git(&["stash", "clear"]).await?;
        Ok(())
    }

    async fn raw(&self, args: &[&str]) -> Result<String, VcsError> {
        self.run_git(args).await
    }
}
