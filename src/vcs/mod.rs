//! Version-control collaborator
//!
//! The gate only talks to history through [`VersionControl`]. [`GitCli`]
//! is the production implementation; tests substitute an in-memory graph.

mod git;
mod object;
mod range;

pub use git::GitCli;
pub use object::parse_commit_object;
pub use range::{CommitRange, extract_range};

use crate::error::Result;
use crate::types::{CommitRecord, RefUpdate};
use async_trait::async_trait;
use std::sync::Arc;

/// Operations the gate needs from a repository
///
/// All shas are full hex object ids. Implementations must not assume the
/// caller has validated ref names.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Resolve a ref (branch, tag, sha) to a commit sha
    async fn resolve(&self, reference: &str) -> Result<String>;

    /// Commits reachable from `head_sha` but not from `base_sha`, oldest first
    async fn list_commits(&self, base_sha: &str, head_sha: &str) -> Result<Vec<CommitRecord>>;

    /// Whether `ancestor` is reachable from `descendant` (a commit is its own ancestor)
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Best common ancestor, or `None` for unrelated histories
    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>>;

    /// Whether the local history is a shallow clone
    async fn is_shallow(&self) -> Result<bool>;

    /// Commits whose parents were cut off by a shallow fetch
    async fn shallow_boundary(&self) -> Result<Vec<String>>;

    /// Point `reference` at `new_sha` only if it still points at `expected_old`
    async fn update_ref(
        &self,
        reference: &str,
        expected_old: &str,
        new_sha: &str,
    ) -> Result<RefUpdate>;

    /// Create (but do not publish) a merge commit with parents base and head
    async fn create_merge_commit(
        &self,
        base_sha: &str,
        head_sha: &str,
        message: &str,
    ) -> Result<String>;
}

#[async_trait]
impl<T: VersionControl + ?Sized> VersionControl for Arc<T> {
    async fn resolve(&self, reference: &str) -> Result<String> {
        (**self).resolve(reference).await
    }

    async fn list_commits(&self, base_sha: &str, head_sha: &str) -> Result<Vec<CommitRecord>> {
        (**self).list_commits(base_sha, head_sha).await
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        (**self).is_ancestor(ancestor, descendant).await
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        (**self).merge_base(a, b).await
    }

    async fn is_shallow(&self) -> Result<bool> {
        (**self).is_shallow().await
    }

    async fn shallow_boundary(&self) -> Result<Vec<String>> {
        (**self).shallow_boundary().await
    }

    async fn update_ref(
        &self,
        reference: &str,
        expected_old: &str,
        new_sha: &str,
    ) -> Result<RefUpdate> {
        (**self).update_ref(reference, expected_old, new_sha).await
    }

    async fn create_merge_commit(
        &self,
        base_sha: &str,
        head_sha: &str,
        message: &str,
    ) -> Result<String> {
        (**self).create_merge_commit(base_sha, head_sha, message).await
    }
}

/// Whether `s` looks like a full object id (SHA-1 or SHA-256)
pub fn is_object_id(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && s.bytes().all(|b| b.is_ascii_hexdigit())
}
