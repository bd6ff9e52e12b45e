//! Git access layer: the [`Vcs`] contract, its CLI implementation and the
//! working-tree lock.

pub mod client;
pub mod parse;
pub mod vcs;
pub mod workspace;

pub use client::GitCli;
pub use vcs::{InProgress, PullOptions, PushOptions, Vcs};
pub use workspace::{Workspace, WorkspaceGuard};
