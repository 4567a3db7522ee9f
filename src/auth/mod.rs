//! Commit authentication
//!
//! Loads the allowed-signers policy, verifies every commit in a range on a
//! bounded blocking pool, and folds the results into one verdict.

mod registry;
mod verify;

pub use registry::{SignerRegistry, fingerprint};
pub use verify::{VerifyOptions, verify_commit};

use crate::audit::{AuditLog, Severity};
use crate::error::Result;
use crate::types::{
    AuthStatus, AuthenticationVerdict, CommitRecord, KeyType, VerificationOutcome,
    VerificationResult,
};
use crate::vcs::{VersionControl, extract_range};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Options for [`authenticate`]
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Only accept signers of this key type
    pub required_key_type: Option<KeyType>,
    /// Required SSH signature namespace
    pub namespace: String,
    /// Upper bound on concurrent verifications
    pub concurrency: usize,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            required_key_type: None,
            namespace: "git".to_string(),
            concurrency: 4,
        }
    }
}

impl AuthOptions {
    fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            required_key_type: self.required_key_type,
            namespace: self.namespace.clone(),
        }
    }
}

/// Verdict together with the shas it was computed for
///
/// The merge phase must use these shas, not re-resolve the refs, so that
/// what gets merged is exactly what was authenticated.
#[derive(Debug, Clone)]
pub struct AuthenticatedRange {
    /// Resolved base
    pub base_sha: String,
    /// Resolved head
    pub head_sha: String,
    /// Aggregated verdict
    pub verdict: AuthenticationVerdict,
}

/// Authenticate every commit between `base` and `head`
///
/// Range resolution errors (missing ref, shallow history, unreadable
/// object) are returned as errors. Individual commit failures never are:
/// they land in the verdict.
pub async fn authenticate(
    vcs: &dyn VersionControl,
    base: &str,
    head: &str,
    registry: Arc<SignerRegistry>,
    options: &AuthOptions,
    audit: &AuditLog,
) -> Result<AuthenticatedRange> {
    let range = extract_range(vcs, base, head).await?;
    debug!(base, head, commits = range.len(), "authenticating range");

    let results = verify_range(&range.commits, registry, options).await;
    for result in &results {
        record_result(audit, result);
    }

    let verdict = aggregate(results);
    let failed = verdict.failed_commits().len();
    match verdict.overall {
        AuthStatus::Success => {
            info!(base, head, verified = verdict.verified_count(), "authentication passed");
            audit.record(
                Severity::Info,
                "auth.verdict",
                format!(
                    "{base}..{head}: {} commit(s) verified",
                    verdict.verified_count()
                ),
            );
        }
        _ => {
            warn!(base, head, failed, "authentication failed");
            audit.record(
                Severity::Warning,
                "auth.verdict",
                format!(
                    "{base}..{head}: {failed} of {} commit(s) failed",
                    verdict.results.len()
                ),
            );
        }
    }

    Ok(AuthenticatedRange {
        base_sha: range.base_sha,
        head_sha: range.head_sha,
        verdict,
    })
}

/// Verify commits concurrently and return results in input order
///
/// Always yields exactly one result per commit: a task that panics or is
/// cancelled counts as a malformed signature.
pub async fn verify_range(
    commits: &[Arc<CommitRecord>],
    registry: Arc<SignerRegistry>,
    options: &AuthOptions,
) -> Vec<VerificationResult> {
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let verify_options = Arc::new(options.verify_options());
    let mut tasks = JoinSet::new();

    for (idx, commit) in commits.iter().enumerate() {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let commit = Arc::clone(commit);
        let registry = Arc::clone(&registry);
        let verify_options = Arc::clone(&verify_options);
        tasks.spawn_blocking(move || {
            let _permit = permit;
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                verify_commit(&commit, &registry, &verify_options)
            }))
            .unwrap_or_else(|_| aborted(&commit, "verification panicked"));
            (idx, result)
        });
    }

    let mut slots: Vec<Option<VerificationResult>> = vec![None; commits.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, result)) => slots[idx] = Some(result),
            Err(e) => warn!(error = %e, "verification task failed"),
        }
    }

    slots
        .into_iter()
        .zip(commits)
        .map(|(slot, commit)| slot.unwrap_or_else(|| aborted(commit, "verification task aborted")))
        .collect()
}

fn aborted(commit: &Arc<CommitRecord>, detail: &str) -> VerificationResult {
    VerificationResult {
        commit: Arc::clone(commit),
        outcome: VerificationOutcome::MalformedSignature,
        matched_signer: None,
        detail: Some(detail.to_string()),
    }
}

/// Fold per-commit results into a verdict; an empty range passes
pub fn aggregate(results: Vec<VerificationResult>) -> AuthenticationVerdict {
    let overall = if results.iter().all(VerificationResult::is_verified) {
        AuthStatus::Success
    } else {
        AuthStatus::Failed
    };
    AuthenticationVerdict { overall, results }
}

fn record_result(audit: &AuditLog, result: &VerificationResult) {
    let sha = &result.commit.sha;
    let author = &result.commit.author;
    match result.outcome {
        VerificationOutcome::Verified => {
            let principal = result
                .matched_signer
                .as_ref()
                .map_or("?", |s| s.principal.as_str());
            audit.record(
                Severity::Info,
                "auth.commit_verified",
                format!("{sha} signed by {principal}"),
            );
        }
        outcome => {
            let severity = match outcome {
                VerificationOutcome::UnknownSigner | VerificationOutcome::MalformedSignature => {
                    Severity::High
                }
                _ => Severity::Warning,
            };
            let detail = result.detail.as_deref().unwrap_or("");
            audit.record(
                severity,
                "auth.commit_rejected",
                format!("{sha} by {author}: {outcome} {detail}").trim_end(),
            );
        }
    }
}
