//! Pure planning helpers that turn operator input into batch targets, plus
//! read-only listers of candidate branches.

use regex_lite::Regex;

use super::operations::BranchRename;
use crate::errors::{BatchError, VcsError};
use crate::git::Vcs;

/// Placeholder replaced by the sequence number in branch patterns.
pub const SEQUENCE_PLACEHOLDER: &str = "{n}";

/// Expand `feature/task-{n}` into `count` names numbered from 1.
pub fn expand_branch_pattern(
    pattern: &str,
    count: usize,
    max: usize,
) -> Result<Vec<String>, BatchError> {
    if !pattern.contains(SEQUENCE_PLACEHOLDER) {
        return Err(BatchError::InvalidArgument(format!(
            "branch pattern '{pattern}' must contain {SEQUENCE_PLACEHOLDER}"
        )));
    }
    if count == 0 || count > max {
        return Err(BatchError::InvalidArgument(format!(
            "branch count must be between 1 and {max}, got {count}"
        )));
    }
    Ok((1..=count)
        .map(|n| pattern.replace(SEQUENCE_PLACEHOLDER, &n.to_string()))
        .collect())
}

/// `count` tags starting at `start` (`x.y.z`), incrementing the patch level.
pub fn tag_series(prefix: &str, start: &str, count: usize) -> Result<Vec<String>, BatchError> {
    let re = Regex::new(r"^(\d+)\.(\d+)\.(\d+)$")
        .map_err(|e| BatchError::InvalidArgument(e.to_string()))?;
    let caps = re.captures(start.trim()).ok_or_else(|| {
        BatchError::InvalidArgument(format!("start version '{start}' is not x.y.z"))
    })?;
    let part = |i: usize| -> Result<u64, BatchError> {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| BatchError::InvalidArgument(format!("bad version '{start}'")))
    };
    let (major, minor, patch) = (part(1)?, part(2)?, part(3)?);

    if count == 0 {
        return Err(BatchError::InvalidArgument("tag count must be at least 1".into()));
    }
    let last = u64::try_from(count - 1)
        .ok()
        .and_then(|n| patch.checked_add(n))
        .ok_or_else(|| {
            BatchError::InvalidArgument(format!("{count} tags from {start} overflow the patch level"))
        })?;
    Ok((patch..=last)
        .map(|p| format!("{prefix}{major}.{minor}.{p}"))
        .collect())
}

/// How to derive a branch's new name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameRule {
    Prefix(String),
    Suffix(String),
    /// Replace the first occurrence of `from`.
    Replace { from: String, to: String },
}

impl RenameRule {
    /// Parse the `old/new` form used for replacements.
    pub fn replace_from_pattern(pattern: &str) -> Result<Self, BatchError> {
        match pattern.split_once('/') {
            Some((from, to)) if !from.is_empty() => Ok(Self::Replace {
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => Err(BatchError::InvalidArgument(format!(
                "replacement '{pattern}' must look like old/new"
            ))),
        }
    }

    fn apply(&self, name: &str) -> String {
        match self {
            Self::Prefix(prefix) => format!("{prefix}{name}"),
            Self::Suffix(suffix) => format!("{name}{suffix}"),
            Self::Replace { from, to } => name.replacen(from.as_str(), to, 1),
        }
    }
}

/// Plan renames, skipping the current and protected branches and any
/// branch the rule leaves unchanged.
pub fn plan_branch_renames(
    branches: &[String],
    current: Option<&str>,
    rule: &RenameRule,
    protected: &[String],
) -> Vec<BranchRename> {
    branches
        .iter()
        .filter(|b| Some(b.as_str()) != current && !protected.contains(b))
        .filter_map(|b| {
            let to = rule.apply(b);
            (!to.is_empty() && &to != b).then(|| BranchRename {
                from: b.clone(),
                to,
            })
        })
        .collect()
}

/// Sort and dedupe stash indices from the top of the stack down.
pub fn sort_stash_indices_descending(indices: &[usize]) -> Vec<usize> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    sorted
}

/// Whether `indices` can be dropped in the given order.
pub fn is_strictly_descending(indices: &[usize]) -> bool {
    indices.windows(2).all(|w| w[0] > w[1])
}

async fn list_branches<V: Vcs + ?Sized>(vcs: &V, extra: &[&str]) -> Result<Vec<String>, VcsError> {
    let mut args = vec!["branch", "--format=%(refname:short)"];
    args.extend_from_slice(extra);
    let out = vcs.raw(&args).await?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Local branches other than the current and protected ones.
pub(crate) async fn deletable_branches<V: Vcs + ?Sized>(
    vcs: &V,
    protected: &[String],
) -> Result<Vec<String>, VcsError> {
    let current = vcs.status().await?.current_branch;
    Ok(list_branches(vcs, &[])
        .await?
        .into_iter()
        .filter(|b| Some(b) != current.as_ref() && !protected.contains(b))
        .collect())
}

/// Branches already merged into `target`, excluding it, the current and
/// protected branches.
pub(crate) async fn merged_branches<V: Vcs + ?Sized>(
    vcs: &V,
    target: &str,
    protected: &[String],
) -> Result<Vec<String>, VcsError> {
    let current = vcs.status().await?.current_branch;
    Ok(list_branches(vcs, &["--merged", target])
        .await?
        .into_iter()
        .filter(|b| b != target && Some(b) != current.as_ref() && !protected.contains(b))
        .collect())
}
