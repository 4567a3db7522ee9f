//! CLI commands

pub mod context;
pub mod run;
pub mod signers;
pub mod style;

use clap::Args;
use sigmerge::types::{CommentMode, KeyType, MergeMethod};
use std::path::PathBuf;

/// Options shared by `run` and `check`
///
/// Every flag overrides the TOML file; unset flags leave it alone.
#[derive(Debug, Clone, Args)]
pub struct GateArgs {
    /// Repository to operate on
    #[arg(long, env = "SIGMERGE_REPO", default_value = ".")]
    pub repo: PathBuf,

    /// TOML configuration file
    #[arg(long, short = 'c', env = "SIGMERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Branch to advance (defaults to GITHUB_BASE_REF)
    #[arg(long, env = "SIGMERGE_BASE")]
    pub base: Option<String>,

    /// Ref to merge (defaults to GITHUB_HEAD_REF)
    #[arg(long, env = "SIGMERGE_HEAD")]
    pub head: Option<String>,

    /// Allowed-signers file
    #[arg(long, env = "SIGMERGE_ALLOWED_SIGNERS_FILE", conflicts_with = "allowed_signers")]
    pub allowed_signers_file: Option<PathBuf>,

    /// Inline allowed-signers policy
    #[arg(long, env = "SIGMERGE_ALLOWED_SIGNERS", hide_env_values = true)]
    pub allowed_signers: Option<String>,

    /// Only accept keys of this type (rsa, ecdsa, ed25519, ed25519-sk)
    #[arg(long, env = "SIGMERGE_REQUIRED_KEY_TYPE")]
    pub required_key_type: Option<KeyType>,

    /// Gate the merge on authentication
    #[arg(long, env = "SIGMERGE_AUTH_REQUIRED")]
    pub auth_required: Option<bool>,

    /// Verify and report even when authentication is not required
    #[arg(long, env = "SIGMERGE_VERIFY_WHEN_NOT_REQUIRED")]
    pub verify_when_not_required: Option<bool>,

    /// fast-forward or merge
    #[arg(long, env = "SIGMERGE_MERGE_METHOD")]
    pub merge_method: Option<MergeMethod>,

    /// always, on-error or never
    #[arg(long, env = "SIGMERGE_COMMENT_MODE")]
    pub comment_mode: Option<CommentMode>,

    /// Push the ref update to this remote instead of updating locally
    #[arg(long, env = "SIGMERGE_REMOTE")]
    pub remote: Option<String>,

    /// Skip the merge phase
    #[arg(long)]
    pub no_merge: bool,

    /// Append audit events as JSON lines to this file
    #[arg(long, env = "SIGMERGE_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Whole-invocation deadline in seconds
    #[arg(long, env = "SIGMERGE_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options for `signers`
#[derive(Debug, Clone, Args)]
pub struct SignersArgs {
    /// Allowed-signers file to validate
    pub file: PathBuf,

    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}
