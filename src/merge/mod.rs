//! Fast-forward merge engine
//!
//! Three-phase pattern:
//! 1. Gather - resolve refs and ancestry facts (effectful)
//! 2. Plan - decide feasibility with `create_merge_plan` (pure, testable)
//! 3. Execute - re-validate and compare-and-swap the base ref (effectful)

mod execute;
mod plan;

pub use execute::{MergeExecution, execute_merge, gather_merge_facts};
pub use plan::{MergeFacts, MergePlan, MergeState, create_merge_plan};
