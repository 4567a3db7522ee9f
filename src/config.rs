//! Engine configuration
//!
//! Loaded from an optional TOML file, then overridden field by field by the
//! CLI (flags and `SIGMERGE_*` environment variables). Refs not given
//! anywhere are inferred from the triggering CI event.

use crate::audit::SecretMasker;
use crate::error::{Error, Result};
use crate::resilience::{BucketConfig, RateLimiter, RetryPolicy, default_rate_limits};
use crate::types::{CommentMode, KeyType, MergeMethod};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables CI sets for pull-request events
const EVENT_BASE_VAR: &str = "GITHUB_BASE_REF";
const EVENT_HEAD_VAR: &str = "GITHUB_HEAD_REF";

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get().min(8))
}

/// Everything one invocation of the gate needs to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Inline allowed-signers policy
    pub allowed_signers: Option<String>,
    /// Path to an allowed-signers file (alternative to the inline form)
    pub allowed_signers_file: Option<PathBuf>,
    /// Only accept signatures from keys of this type
    pub required_key_type: Option<KeyType>,
    /// Gate the merge on authentication
    pub auth_required: bool,
    /// With `auth_required = false`, still verify and report failures
    pub verify_when_not_required: bool,
    /// Advance base after the checks
    pub perform_merge: bool,
    /// How base is advanced
    pub merge_method: MergeMethod,
    /// Branch to advance
    pub base_branch: Option<String>,
    /// Ref to merge
    pub head_branch: Option<String>,
    /// When the reporter should comment
    pub comment_mode: CommentMode,
    /// Remote to push the ref update to; local update when unset
    pub remote: Option<String>,
    /// Append audit events as JSON lines to this file
    pub audit_log: Option<PathBuf>,
    /// Whole-invocation deadline
    pub deadline_secs: u64,
    /// Timeout for a single external call
    pub call_timeout_secs: u64,
    /// Concurrent signature verifications
    pub verify_concurrency: usize,
    /// Backoff for transient failures
    pub retry: RetryPolicy,
    /// Per-category bucket overrides
    pub rate_limits: HashMap<String, BucketConfig>,
    /// Extra regexes whose matches are masked in audit output
    pub secret_patterns: Vec<String>,
    /// SSH signature namespace
    pub signature_namespace: String,
    /// Message for merge commits; `{base}` and `{head}` are substituted
    pub merge_commit_message: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allowed_signers: None,
            allowed_signers_file: None,
            required_key_type: None,
            auth_required: true,
            verify_when_not_required: false,
            perform_merge: true,
            merge_method: MergeMethod::default(),
            base_branch: None,
            head_branch: None,
            comment_mode: CommentMode::default(),
            remote: None,
            audit_log: None,
            deadline_secs: 600,
            call_timeout_secs: 120,
            verify_concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            rate_limits: HashMap::new(),
            secret_patterns: Vec::new(),
            signature_namespace: "git".to_string(),
            merge_commit_message: None,
        }
    }
}

impl EngineConfig {
    /// Parse TOML configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid configuration: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Fill unset refs from the CI event environment
    pub fn apply_event_defaults(&mut self, env: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        if self.base_branch.is_none() {
            self.base_branch = non_empty(EVENT_BASE_VAR);
        }
        if self.head_branch.is_none() {
            self.head_branch = non_empty(EVENT_HEAD_VAR);
        }
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.deadline_secs == 0 {
            return Err(Error::Config("deadline_secs must be positive".to_string()));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::Config("call_timeout_secs must be positive".to_string()));
        }
        if self.verify_concurrency == 0 {
            return Err(Error::Config("verify_concurrency must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.signature_namespace.trim().is_empty() {
            return Err(Error::Config("signature_namespace must not be empty".to_string()));
        }
        if self.allowed_signers.is_some() && self.allowed_signers_file.is_some() {
            return Err(Error::Config(
                "set either allowed_signers or allowed_signers_file, not both".to_string(),
            ));
        }
        Ok(())
    }

    /// Base and head refs, which must be known by now
    pub fn refs(&self) -> Result<(String, String)> {
        let base = self.base_branch.clone().ok_or_else(|| {
            Error::Config(format!("base branch not configured and {EVENT_BASE_VAR} is unset"))
        })?;
        let head = self.head_branch.clone().ok_or_else(|| {
            Error::Config(format!("head branch not configured and {EVENT_HEAD_VAR} is unset"))
        })?;
        Ok((base, head))
    }

    /// The allowed-signers policy text
    pub fn policy_text(&self) -> Result<String> {
        match (&self.allowed_signers, &self.allowed_signers_file) {
            (Some(inline), None) => Ok(inline.clone()),
            (None, Some(path)) => fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("failed to read allowed signers {}: {e}", path.display()))
            }),
            (Some(_), Some(_)) => Err(Error::Config(
                "set either allowed_signers or allowed_signers_file, not both".to_string(),
            )),
            (None, None) => Err(Error::Config("allowed_signers is required".to_string())),
        }
    }

    /// Whole-invocation deadline
    pub const fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Per-call timeout
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Rate limiter with built-in buckets and configured overrides
    pub fn rate_limiter(&self) -> RateLimiter {
        let mut buckets = default_rate_limits();
        buckets.extend(self.rate_limits.iter().map(|(k, v)| (k.clone(), *v)));
        RateLimiter::new(buckets)
    }

    /// Masker with the built-in rules plus `secret_patterns`
    pub fn masker(&self) -> Result<SecretMasker> {
        SecretMasker::with_patterns(&self.secret_patterns)
    }

    /// Message for an explicit merge commit
    pub fn merge_message(&self, base: &str, head: &str) -> String {
        self.merge_commit_message.as_deref().map_or_else(
            || format!("Merge {head} into {base}"),
            |template| template.replace("{base}", base).replace("{head}", head),
        )
    }
}
