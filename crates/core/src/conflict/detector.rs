//! Conflict detection.
//!
//! The index is the primary signal, but a stale status can disagree with the
//! files on disk, so every candidate is re-verified by scanning its content
//! for conflict markers. A file only counts as resolved when both agree.

use std::path::Path;

use tracing::{debug, instrument};

use crate::errors::VcsError;
use crate::git::parse::{parse_status, parse_unmerged};
use crate::git::Vcs;
use crate::models::{ConflictFile, ConflictKind};

/// Whether `content` carries a conflict block.
///
/// Requires both an opening `<<<<<<<` and a closing `>>>>>>>` line, so a
/// Markdown `=======` underline on its own is not mistaken for a conflict.
pub fn has_conflict_markers(content: &str) -> bool {
    let mut open = false;
    let mut close = false;
    for line in content.lines() {
        if line.starts_with("<<<<<<<") {
            open = true;
        } else if line.starts_with(">>>>>>>") {
            close = true;
        }
        if open && close {
            return true;
        }
    }
    false
}

/// Scan a file on disk; missing or unreadable files have no markers.
pub async fn file_has_markers(path: &Path) -> bool {
    match tokio::fs::read(path).await {
        Ok(bytes) => has_conflict_markers(&String::from_utf8_lossy(&bytes)),
        Err(_) => false,
    }
}

/// Whether HEAD's version of `path` already carries markers. New files and
/// unborn branches have no committed version.
async fn committed_with_markers<V: Vcs + ?Sized>(vcs: &V, path: &str) -> bool {
    let object = format!("HEAD:{path}");
    match vcs.raw(&["show", object.as_str()]).await {
        Ok(content) => has_conflict_markers(&content),
        Err(_) => false,
    }
}

/// List conflicted files. Read-only.
///
/// Besides unmerged paths, a staged or modified file whose markers are not in
/// its HEAD version is reported as [`ConflictKind::MarkersOnly`]. Committed
/// marker lines, such as merge-tool test fixtures, are content.
#[instrument(skip(vcs), fields(workdir = %vcs.workdir().display()))]
pub async fn detect_conflicts<V: Vcs + ?Sized>(vcs: &V) -> Result<Vec<ConflictFile>, VcsError> {
    let porcelain = vcs
        .raw(&["status", "--porcelain=v1", "-z", "--untracked-files=no"])
        .await?;

    let mut files = Vec::new();
    for (path, kind) in parse_unmerged(&porcelain) {
        let conflict_markers = file_has_markers(&vcs.workdir().join(&path)).await;
        files.push(ConflictFile {
            path,
            status: kind,
            conflict_markers,
        });
    }

    // Files the index considers merged may still carry markers.
    let status = parse_status(&porcelain)?;
    for path in status.staged.iter().chain(&status.modified) {
        if files.iter().any(|f| &f.path == path) {
            continue;
        }
        if file_has_markers(&vcs.workdir().join(path)).await
            && !committed_with_markers(vcs, path).await
        {
            files.push(ConflictFile {
                path: path.clone(),
                status: ConflictKind::MarkersOnly,
                conflict_markers: true,
            });
        }
    }

    debug!(count = files.len(), "conflict scan complete");
    Ok(files)
}
