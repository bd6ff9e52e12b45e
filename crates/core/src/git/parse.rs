//! Parsers for machine-readable git output.

use chrono::DateTime;
use regex_lite::Regex;

use crate::errors::VcsError;
use crate::models::{ConflictKind, RepoStatus, StashEntry};

/// Field separator used in `--format` strings (`%x1f`).
pub const FIELD_SEP: char = '\u{1f}';

/// Format passed to `git stash list`.
pub const STASH_FORMAT: &str = "--format=%gd%x1f%H%x1f%cI%x1f%gs";

/// Parse `git status --porcelain=v1 -b -z` output.
pub fn parse_status(output: &str) -> Result<RepoStatus, VcsError> {
    let mut status = RepoStatus::default();
    let mut entries = output.split('\0').filter(|e| !e.is_empty());

    while let Some(entry) = entries.next() {
        if let Some(header) = entry.strip_prefix("## ") {
            parse_branch_header(header, &mut status);
            continue;
        }

        let mut chars = entry.chars();
        let (Some(x), Some(y)) = (chars.next(), chars.next()) else {
            return Err(VcsError::Parse(format!("short status entry: {entry:?}")));
        };
        let path = entry
            .get(3..)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| VcsError::Parse(format!("status entry without path: {entry:?}")))?
            .to_string();

        // Renames and copies are followed by their source path.
        if x == 'R' || x == 'C' {
            entries.next();
        }

        if x == '?' && y == '?' {
            status.not_added.push(path);
            continue;
        }
        if x == '!' {
            continue;
        }
        if ConflictKind::from_porcelain(x, y).is_some() {
            status.conflicted.push(path);
            continue;
        }

        if matches!(x, 'A' | 'M' | 'T' | 'R' | 'C') {
            status.staged.push(path.clone());
        }
        if x == 'R' {
            status.renamed.push(path.clone());
        }
        if matches!(y, 'M' | 'T') {
            status.modified.push(path.clone());
        }
        if x == 'D' || y == 'D' {
            status.deleted.push(path);
        }
    }

    Ok(status)
}

/// Unmerged entries of `git status --porcelain=v1 -z` with their conflict kind.
pub fn parse_unmerged(output: &str) -> Vec<(String, ConflictKind)> {
    let mut unmerged = Vec::new();
    let mut entries = output.split('\0').filter(|e| !e.is_empty());
    while let Some(entry) = entries.next() {
        let mut chars = entry.chars();
        let (Some(x), Some(y)) = (chars.next(), chars.next()) else {
            continue;
        };
        if x == 'R' || x == 'C' {
            entries.next();
        }
        if let (Some(kind), Some(path)) = (ConflictKind::from_porcelain(x, y), entry.get(3..)) {
            unmerged.push((path.to_string(), kind));
        }
    }
    unmerged
}

fn parse_branch_header(header: &str, status: &mut RepoStatus) {
    if let Some(branch) = header.strip_prefix("No commits yet on ") {
        status.current_branch = Some(branch.trim().to_string());
        return;
    }
    if header.starts_with("HEAD (no branch)") {
        return;
    }

    let (refs, tracking) = match header.split_once(" [") {
        Some((refs, rest)) => (refs, rest.trim_end_matches(']')),
        None => (header, ""),
    };
    match refs.split_once("...") {
        Some((branch, upstream)) => {
            status.current_branch = Some(branch.to_string());
            status.upstream = Some(upstream.to_string());
        }
        None => status.current_branch = Some(refs.trim().to_string()),
    }

    status.ahead = capture_count(tracking, r"ahead (\d+)");
    status.behind = capture_count(tracking, r"behind (\d+)");
}

fn capture_count(text: &str, pattern: &str) -> u32 {
    Regex::new(pattern)
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parse `git stash list` output produced with [`STASH_FORMAT`].
pub fn parse_stash_list(output: &str) -> Result<Vec<StashEntry>, VcsError> {
    let subject_re = Regex::new(r"^(?:WIP on|On) ([^:]+): ?(.*)$")
        .map_err(|e| VcsError::Parse(e.to_string()))?;

    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(FIELD_SEP).collect();
            let [selector, hash, date, subject] = fields[..] else {
                return Err(VcsError::Parse(format!("unexpected stash line: {line:?}")));
            };

            let index = selector
                .strip_prefix("stash@{")
                .and_then(|s| s.strip_suffix('}'))
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| VcsError::Parse(format!("bad stash selector: {selector}")))?;
            let date = DateTime::parse_from_rfc3339(date)
                .map_err(|e| VcsError::Parse(format!("bad stash date {date:?}: {e}")))?;
            let (branch, message) = match subject_re.captures(subject) {
                Some(c) => (
                    c.get(1).map_or("", |m| m.as_str()).to_string(),
                    c.get(2).map_or("", |m| m.as_str()).to_string(),
                ),
                None => (String::new(), subject.to_string()),
            };

            Ok(StashEntry {
                index,
                message,
                branch,
                hash: hash.to_string(),
                date,
            })
        })
        .collect()
}

/// Whether stderr of a network command describes a connectivity failure.
pub fn is_network_failure(stderr: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "Could not resolve host",
        "unable to access",
        "Connection refused",
        "Connection timed out",
        "Could not read from remote repository",
        "Network is unreachable",
        "timed out",
    ];
    PATTERNS.iter().any(|p| stderr.contains(p))
}

/// Detail for a failed command: stdout then stderr, or the exit status when
/// git (or a hook) printed nothing.
pub fn failure_detail(stdout: &str, stderr: &str, exit_code: i32) -> String {
    let combined = [stdout.trim(), stderr.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    if combined.is_empty() {
        format!("exit status {exit_code}, no output")
    } else {
        combined
    }
}
