//! Resilience wrapper
//!
//! Retry with backoff and token-bucket rate limiting, applied uniformly to
//! the version-control collaborator through [`ResilientVcs`].

mod limiter;
mod retry;

pub use limiter::{Acquire, BucketConfig, RateLimiter};
pub use retry::{RetryPolicy, with_retry};

use crate::audit::AuditLog;
use crate::error::Result;
use crate::types::{CommitRecord, RefUpdate};
use crate::vcs::VersionControl;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Rate-limit bucket names
pub mod category {
    /// Reads against the repository (resolve, list, ancestry)
    pub const VCS_READ: &str = "vcs-read";
    /// Ref updates and merge-commit creation
    pub const MERGE_WRITE: &str = "merge-write";
    /// Audit events
    pub const SECURITY_EVENT: &str = "security-event";
    /// High-severity alert callbacks
    pub const ALERT: &str = "alert";
}

/// Built-in bucket sizes, overridable per category from configuration
pub fn default_rate_limits() -> HashMap<String, BucketConfig> {
    [
        (category::VCS_READ, BucketConfig::refilling(500, 50.0)),
        (category::MERGE_WRITE, BucketConfig::fixed(2)),
        (category::SECURITY_EVENT, BucketConfig::fixed(500)),
        (category::ALERT, BucketConfig::fixed(5)),
    ]
    .into_iter()
    .map(|(name, config)| (name.to_string(), config))
    .collect()
}

/// Decorator adding rate limiting and retry to every collaborator call
///
/// Reads retry per `policy`. The ref update is a compare-and-swap and is
/// never retried: a failed write goes straight back to the caller.
pub struct ResilientVcs<V> {
    inner: V,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    audit: Option<Arc<AuditLog>>,
}

impl<V: VersionControl> ResilientVcs<V> {
    /// Wrap `inner`
    pub const fn new(inner: V, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            policy,
            audit: None,
        }
    }

    /// Record retries and exhaustion in `audit`
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The wrapped collaborator
    pub const fn inner(&self) -> &V {
        &self.inner
    }

    async fn read<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let audit = self.audit.as_deref();
        let limiter = &self.limiter;
        let mut call = call;
        with_retry(&self.policy, operation, audit, move || {
            let attempt = call();
            async move {
                limiter.acquire(category::VCS_READ).await?;
                attempt.await
            }
        })
        .await
    }

    async fn write<T, Fut>(&self, operation: &str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
    {
        debug!(operation, "merge write, single attempt");
        self.limiter.acquire(category::MERGE_WRITE).await?;
        call.await
    }
}

#[async_trait]
impl<V: VersionControl> VersionControl for ResilientVcs<V> {
    async fn resolve(&self, reference: &str) -> Result<String> {
        self.read("resolve", || self.inner.resolve(reference)).await
    }

    async fn list_commits(&self, base_sha: &str, head_sha: &str) -> Result<Vec<CommitRecord>> {
        self.read("list-commits", || self.inner.list_commits(base_sha, head_sha))
            .await
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.read("is-ancestor", || self.inner.is_ancestor(ancestor, descendant))
            .await
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.read("merge-base", || self.inner.merge_base(a, b)).await
    }

    async fn is_shallow(&self) -> Result<bool> {
        self.read("is-shallow", || self.inner.is_shallow()).await
    }

    async fn shallow_boundary(&self) -> Result<Vec<String>> {
        self.read("shallow-boundary", || self.inner.shallow_boundary())
            .await
    }

    async fn update_ref(
        &self,
        reference: &str,
        expected_old: &str,
        new_sha: &str,
    ) -> Result<RefUpdate> {
        self.write(
            "update-ref",
            self.inner.update_ref(reference, expected_old, new_sha),
        )
        .await
    }

    async fn create_merge_commit(
        &self,
        base_sha: &str,
        head_sha: &str,
        message: &str,
    ) -> Result<String> {
        self.write(
            "create-merge-commit",
            self.inner.create_merge_commit(base_sha, head_sha, message),
        )
        .await
    }
}
