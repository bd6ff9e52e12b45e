//! Conflict detection and resolution.
//!
//! 1. **Detection** -- read the unmerged set from the index and re-verify it
//!    against conflict markers on disk.
//! 2. **Resolution** -- apply `ours` / `theirs` / `manual` to the conflicted
//!    files, best-effort per file.
//! 3. **Control** -- abort or continue the operation that produced them.

pub mod detector;
pub mod resolver;

pub use detector::{detect_conflicts, has_conflict_markers};
pub use resolver::{ConflictResolver, ResolveOptions};
