//! sigmerge - commit signature gate with fast-forward merge
//!
//! Proves every commit in a change range was signed by an allowed SSH key,
//! then (optionally) advances the base branch to head when that is a pure
//! fast-forward. Both decisions leave a masked audit trail.
//!
//! The pieces, leaves first:
//! - [`auth::SignerRegistry`] parses the allowed-signers policy
//! - [`vcs::extract_range`] enumerates commits through a [`vcs::VersionControl`]
//! - [`auth::verify_commit`] checks one commit's SSH signature
//! - [`auth::authenticate`] drives verification across the range
//! - [`merge`] plans and executes the compare-and-swap advance
//! - [`resilience`] wraps external calls in retry and rate limiting
//! - [`audit::AuditLog`] records security events
//! - [`engine::Engine`] ties it together into a [`types::GateReport`]

pub mod audit;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod resilience;
pub mod types;
pub mod vcs;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
