//! Merge planning - pure functions for deciding a merge
//!
//! No I/O happens here. Ancestry facts are gathered beforehand by
//! `gather_merge_facts()` and passed in, which keeps every decision unit
//! testable.

use crate::error::{Error, Result};
use crate::types::{BlockingReason, MergeMethod};

/// Repository facts a merge decision is based on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFacts {
    /// Base branch name
    pub base_ref: String,
    /// Head ref name
    pub head_ref: String,
    /// Base tip at check time
    pub base_sha: String,
    /// Head tip (the authenticated one)
    pub head_sha: String,
    /// Whether base is an ancestor of head
    pub base_is_ancestor: bool,
    /// Best common ancestor, `None` for unrelated histories
    pub merge_base: Option<String>,
}

/// Merge plan - the functional core output
///
/// Created by `create_merge_plan()` (pure) and carried out by
/// `execute_merge()` (effectful).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Base branch to advance
    pub base_ref: String,
    /// Head ref being merged
    pub head_ref: String,
    /// Base tip the ref update will be conditioned on
    pub base_sha: String,
    /// Head tip to merge
    pub head_sha: String,
    /// Requested method
    pub method: MergeMethod,
    /// Whether the merge can proceed
    pub feasible: bool,
    /// Why it cannot, when not feasible
    pub blocking_reason: Option<BlockingReason>,
    /// Where base will point after a fast-forward (unknown ahead of time for `merge`)
    pub merge_sha: Option<String>,
    /// Head adds nothing over base
    pub up_to_date: bool,
}

impl MergePlan {
    /// Whether there is nothing to do
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.up_to_date
    }
}

/// Create a merge plan (PURE - no I/O)
///
/// Divergent history is never feasible, whatever the method: base must be
/// an ancestor of head.
#[must_use]
pub fn create_merge_plan(facts: &MergeFacts, method: MergeMethod) -> MergePlan {
    let mut plan = MergePlan {
        base_ref: facts.base_ref.clone(),
        head_ref: facts.head_ref.clone(),
        base_sha: facts.base_sha.clone(),
        head_sha: facts.head_sha.clone(),
        method,
        feasible: false,
        blocking_reason: None,
        merge_sha: None,
        up_to_date: false,
    };

    if facts.base_sha == facts.head_sha {
        plan.up_to_date = true;
        return plan;
    }

    if facts.base_is_ancestor {
        plan.feasible = true;
        if method == MergeMethod::FastForward {
            plan.merge_sha = Some(facts.head_sha.clone());
        }
        return plan;
    }

    match facts.merge_base.as_deref() {
        None => plan.blocking_reason = Some(BlockingReason::NoCommonAncestor),
        // head is already contained in base
        Some(mb) if mb == facts.head_sha => plan.up_to_date = true,
        Some(_) => plan.blocking_reason = Some(BlockingReason::NotFastForward),
    }
    plan
}

/// Merge lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    /// Gathering facts and planning
    Checking,
    /// Plan says the advance is a fast-forward
    Feasible,
    /// Cannot proceed
    Blocked(BlockingReason),
    /// Ref update in flight
    Executing,
    /// Base now points at `sha`
    Committed {
        /// New base tip
        sha: String,
    },
    /// The write was rejected
    Failed {
        /// Redacted reason
        message: String,
    },
}

impl MergeState {
    /// Whether no further transition is possible
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Blocked(_) | Self::Committed { .. } | Self::Failed { .. }
        )
    }

    /// Whether `self -> next` is a legal transition
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Checking, Self::Feasible | Self::Blocked(_))
                | (Self::Feasible, Self::Executing | Self::Blocked(BlockingReason::BaseMoved))
                | (
                    Self::Executing,
                    Self::Committed { .. }
                        | Self::Failed { .. }
                        | Self::Blocked(
                            BlockingReason::BaseMoved | BlockingReason::ProtectedBranchPolicy
                        )
                )
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: Self) -> Result<()> {
        if !self.can_transition_to(&next) {
            return Err(Error::Internal(format!(
                "illegal merge transition {self:?} -> {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }
}
