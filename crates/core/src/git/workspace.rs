//! Exclusive ownership of a working tree.
//!
//! Git keeps one index and one stash stack per working tree, so at most one
//! pipeline or batch may mutate it at a time. Every public entry point locks
//! the [`Workspace`] first; a second caller gets [`VcsError::Busy`] instead of
//! interleaving its commands.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::vcs::Vcs;
use crate::errors::VcsError;

/// A VCS client plus the busy flag guarding its working tree.
#[derive(Debug)]
pub struct Workspace<V> {
    vcs: V,
    busy: AtomicBool,
}

impl<V: Vcs> Workspace<V> {
    pub fn new(vcs: V) -> Self {
        Self {
            vcs,
            busy: AtomicBool::new(false),
        }
    }

    /// Take exclusive ownership of the working tree.
    pub fn lock(&self) -> Result<WorkspaceGuard<'_, V>, VcsError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(workdir = %self.vcs.workdir().display(), "workspace busy");
            return Err(VcsError::Busy);
        }
        Ok(WorkspaceGuard { workspace: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn into_inner(self) -> V {
        self.vcs
    }
}

/// Proof of exclusive ownership; releases the workspace on drop.
#[derive(Debug)]
pub struct WorkspaceGuard<'a, V> {
    workspace: &'a Workspace<V>,
}

impl<'a, V> WorkspaceGuard<'a, V> {
    /// The client, borrowed for as long as the workspace itself.
    ///
    /// The reference outlives the guard; callers must keep the guard alive
    /// while they use it.
    pub(crate) fn vcs(&self) -> &'a V {
        &self.workspace.vcs
    }
}

impl<V> Deref for WorkspaceGuard<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.workspace.vcs
    }
}

impl<V> Drop for WorkspaceGuard<'_, V> {
    fn drop(&mut self) {
        self.workspace.busy.store(false, Ordering::SeqCst);
    }
}
