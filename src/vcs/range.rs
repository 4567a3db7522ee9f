//! Commit range extraction

use super::VersionControl;
use crate::error::{Error, Result};
use crate::types::CommitRecord;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// The commits between a base and a head, oldest first
#[derive(Debug, Clone)]
pub struct CommitRange {
    /// Base ref as given
    pub base_ref: String,
    /// Head ref as given
    pub head_ref: String,
    /// Resolved base
    pub base_sha: String,
    /// Resolved head
    pub head_sha: String,
    /// Commits reachable from head but not base, parents before children
    pub commits: Vec<Arc<CommitRecord>>,
}

impl CommitRange {
    /// Number of commits in range
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Whether head adds nothing over base
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Resolve `base` and `head` and enumerate the commits in between
///
/// In a shallow clone, a missing merge base or a range that reaches a
/// shallow boundary commit is reported as [`Error::ShallowHistory`], since
/// commits past the boundary cannot be enumerated.
pub async fn extract_range(vcs: &dyn VersionControl, base: &str, head: &str) -> Result<CommitRange> {
    let base_sha = vcs.resolve(base).await?;
    let head_sha = vcs.resolve(head).await?;

    let mut range = CommitRange {
        base_ref: base.to_string(),
        head_ref: head.to_string(),
        base_sha,
        head_sha,
        commits: Vec::new(),
    };
    if range.base_sha == range.head_sha {
        debug!(base, head, "base and head are identical, empty range");
        return Ok(range);
    }

    let shallow = vcs.is_shallow().await?;
    let too_shallow = || Error::ShallowHistory {
        base: base.to_string(),
        head: head.to_string(),
    };
    if shallow
        && vcs
            .merge_base(&range.base_sha, &range.head_sha)
            .await?
            .is_none()
    {
        return Err(too_shallow());
    }

    range.commits = vcs
        .list_commits(&range.base_sha, &range.head_sha)
        .await?
        .into_iter()
        .map(Arc::new)
        .collect();

    if shallow {
        let boundary: HashSet<String> = vcs.shallow_boundary().await?.into_iter().collect();
        if let Some(cut) = range.commits.iter().find(|c| boundary.contains(&c.sha)) {
            debug!(sha = %cut.sha, "range reaches a shallow boundary");
            return Err(too_shallow());
        }
    }
    debug!(base, head, commits = range.commits.len(), "range extracted");
    Ok(range)
}
