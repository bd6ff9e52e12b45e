//! gitsafe core library.
//!
//! Coordinates multi-step git mutations so that partial failure never loses
//! work: the sync pipeline (stash, pull, restore, commit, push) with
//! rollback, conflict detection and resolution, and a batch engine that
//! isolates per-item failures and keeps the working tree operable.

pub mod batch;
pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod logging;
pub mod models;
pub mod progress;
pub mod sync_engine;

#[cfg(test)]
mod testing;

// Re-exports for convenience.
pub use batch::{BatchExecutor, BatchOperation};
pub use config::AppConfig;
pub use conflict::ConflictResolver;
pub use errors::CoreError;
pub use git::{GitCli, Vcs, Workspace};
pub use progress::{CancellationFlag, ProgressReporter};
pub use sync_engine::SyncOrchestrator;
