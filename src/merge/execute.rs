//! Merge execution - effectful operations
//!
//! Takes a `MergePlan` (created by the pure planning function) and carries
//! it out against the version-control collaborator. Base is re-resolved
//! immediately before the write, and the write itself is a compare-and-swap
//! on the tip the plan was made against.

use crate::audit::{AuditLog, Severity};
use crate::error::{Error, Result};
use crate::merge::plan::{MergeFacts, MergePlan, MergeState};
use crate::types::{BlockingReason, MergeMethod, RefUpdate};
use crate::vcs::VersionControl;
use tracing::{debug, info, warn};

/// Gather the ancestry facts `create_merge_plan()` needs
///
/// Takes already-resolved shas so the plan covers exactly the authenticated
/// head.
pub async fn gather_merge_facts(
    vcs: &dyn VersionControl,
    base_ref: &str,
    head_ref: &str,
    base_sha: &str,
    head_sha: &str,
) -> Result<MergeFacts> {
    let base_is_ancestor = base_sha == head_sha || vcs.is_ancestor(base_sha, head_sha).await?;
    let merge_base = if base_is_ancestor {
        Some(base_sha.to_string())
    } else {
        vcs.merge_base(base_sha, head_sha).await?
    };
    Ok(MergeFacts {
        base_ref: base_ref.to_string(),
        head_ref: head_ref.to_string(),
        base_sha: base_sha.to_string(),
        head_sha: head_sha.to_string(),
        base_is_ancestor,
        merge_base,
    })
}

/// Result of merge execution
#[derive(Debug, Clone)]
pub struct MergeExecution {
    /// Terminal state reached
    pub state: MergeState,
    /// Every state visited, starting with `Checking`
    pub transitions: Vec<MergeState>,
    /// New base tip when committed
    pub merge_sha: Option<String>,
}

impl MergeExecution {
    /// Check if the base ref was advanced
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self.state, MergeState::Committed { .. })
    }
}

struct Tracker {
    state: MergeState,
    transitions: Vec<MergeState>,
}

impl Tracker {
    fn new() -> Self {
        Self {
            state: MergeState::Checking,
            transitions: vec![MergeState::Checking],
        }
    }

    fn advance(&mut self, next: MergeState) -> Result<()> {
        debug!(from = ?self.state, to = ?next, "merge transition");
        self.state.transition(next.clone())?;
        self.transitions.push(next);
        Ok(())
    }

    fn finish(self) -> MergeExecution {
        let merge_sha = match &self.state {
            MergeState::Committed { sha } => Some(sha.clone()),
            _ => None,
        };
        MergeExecution {
            state: self.state,
            transitions: self.transitions,
            merge_sha,
        }
    }
}

/// Execute the merge plan (EFFECTFUL)
///
/// Outcomes of the write are reported in the returned state, never
/// retried. `Err` is reserved for plans that cannot be executed at all.
pub async fn execute_merge(
    plan: &MergePlan,
    vcs: &dyn VersionControl,
    message: &str,
    audit: &AuditLog,
) -> Result<MergeExecution> {
    let mut tracker = Tracker::new();

    if !plan.feasible {
        let reason = plan.blocking_reason.ok_or_else(|| {
            Error::Internal("merge plan is neither feasible nor blocked".to_string())
        })?;
        tracker.advance(MergeState::Blocked(reason))?;
        return Ok(tracker.finish());
    }
    tracker.advance(MergeState::Feasible)?;

    let base = plan.base_ref.as_str();
    let current = match vcs.resolve(base).await {
        Ok(sha) => sha,
        Err(e) => {
            tracker.advance(MergeState::Executing)?;
            return fail(tracker, audit, base, &e.to_string());
        }
    };
    if current != plan.base_sha {
        warn!(base, expected = %plan.base_sha, actual = %current, "base moved before write");
        audit.record(
            Severity::High,
            "merge.base_moved",
            format!("{base} moved from {} to {current} before the write", plan.base_sha),
        );
        tracker.advance(MergeState::Blocked(BlockingReason::BaseMoved))?;
        return Ok(tracker.finish());
    }

    tracker.advance(MergeState::Executing)?;
    let new_sha = match plan.method {
        MergeMethod::FastForward => plan.head_sha.clone(),
        MergeMethod::Merge => {
            match vcs
                .create_merge_commit(&plan.base_sha, &plan.head_sha, message)
                .await
            {
                Ok(sha) => sha,
                Err(e) => return fail(tracker, audit, base, &e.to_string()),
            }
        }
    };

    match vcs.update_ref(base, &plan.base_sha, &new_sha).await {
        Ok(RefUpdate::Updated) => {
            info!(base, sha = %new_sha, method = %plan.method, "base advanced");
            audit.record(
                Severity::Info,
                "merge.committed",
                format!("{base} advanced {} -> {new_sha} ({})", plan.base_sha, plan.method),
            );
            tracker.advance(MergeState::Committed { sha: new_sha })?;
        }
        Ok(RefUpdate::Conflict { actual }) => {
            let actual = actual.as_deref().unwrap_or("unknown");
            warn!(base, actual, "compare-and-swap lost the race");
            audit.record(
                Severity::High,
                "merge.base_moved",
                format!("{base} no longer at {} (now {actual}); not overwritten", plan.base_sha),
            );
            tracker.advance(MergeState::Blocked(BlockingReason::BaseMoved))?;
        }
        Ok(RefUpdate::Rejected {
            reason,
            policy: true,
        }) => {
            audit.record(
                Severity::Warning,
                "merge.policy_rejected",
                format!("{base} update refused by branch protection: {reason}"),
            );
            tracker.advance(MergeState::Blocked(BlockingReason::ProtectedBranchPolicy))?;
        }
        Ok(RefUpdate::Rejected { reason, .. }) => return fail(tracker, audit, base, &reason),
        Err(e) => return fail(tracker, audit, base, &e.to_string()),
    }
    Ok(tracker.finish())
}

fn fail(mut tracker: Tracker, audit: &AuditLog, base: &str, message: &str) -> Result<MergeExecution> {
    let message = audit.masker().mask(message).into_owned();
    warn!(base, error = %message, "merge write failed");
    audit.record(
        Severity::Warning,
        "merge.failed",
        format!("{base} update failed: {message}"),
    );
    tracker.advance(MergeState::Failed { message })?;
    Ok(tracker.finish())
}
