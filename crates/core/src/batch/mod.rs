//! Batch execution: one operation kind applied across many targets with
//! per-item failure isolation.

pub mod executor;
pub mod operations;
pub mod plan;

pub use executor::BatchExecutor;
pub use operations::{
    BatchOperation, BranchRename, ConfirmationPolicy, MergeStrategy, RevertMode,
};
pub use plan::{
    expand_branch_pattern, plan_branch_renames, sort_stash_indices_descending, tag_series,
    RenameRule,
};
