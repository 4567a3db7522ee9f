//! Shared test fixtures

#![allow(dead_code, unused_imports)]

pub mod git_repo;
pub mod keys;
pub mod mock_vcs;

pub use git_repo::{TempGitRepo, git_available};
pub use keys::*;
pub use mock_vcs::{MockVcs, UpdateRefCall};

use sigmerge::audit::{AuditLog, MemorySink};
use sigmerge::resilience::{RateLimiter, RetryPolicy};
use sigmerge::vcs::VersionControl;
use sigmerge::{Engine, EngineConfig};
use std::sync::Arc;

/// Retry policy with millisecond delays
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
        jitter: false,
    }
}

/// Config for `main <- feature` with the given policy text
pub fn config_for(policy: &str) -> EngineConfig {
    EngineConfig {
        allowed_signers: Some(policy.to_string()),
        base_branch: Some("main".to_string()),
        head_branch: Some("feature".to_string()),
        retry: fast_retry(),
        verify_concurrency: 2,
        ..EngineConfig::default()
    }
}

/// Engine over a mock with an in-memory audit log
pub fn engine(config: EngineConfig, vcs: &Arc<MockVcs>) -> (Engine, MemorySink) {
    let (audit, sink) = AuditLog::in_memory();
    let limiter = Arc::new(RateLimiter::unlimited());
    let vcs: Arc<dyn VersionControl> = vcs.clone();
    (Engine::new(config, vcs, Arc::new(audit), limiter), sink)
}

/// `root <- c1 <- c2` on `feature`, `main` at `root`, both commits signed
pub fn linear_history(signer: &TestSigner) -> Arc<MockVcs> {
    let vcs = Arc::new(MockVcs::new());
    let root = unsigned_commit(0, &[]);
    vcs.add_commit(root, &[]);
    vcs.add_commit(signed_commit(1, &[&sha(0)], signer), &[&sha(0)]);
    vcs.add_commit(signed_commit(2, &[&sha(1)], signer), &[&sha(1)]);
    vcs.set_ref("main", &sha(0));
    vcs.set_ref("feature", &sha(2));
    vcs
}
