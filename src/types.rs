//! Core types for sigmerge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Key algorithm family of an allowed signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// `ssh-rsa`
    Rsa,
    /// `ecdsa-sha2-nistp256` / `nistp384` / `nistp521`
    Ecdsa,
    /// `ssh-ed25519`
    Ed25519,
    /// `sk-ssh-ed25519@openssh.com` (FIDO security key)
    Ed25519Sk,
    /// Anything else; kept so policy lines are not rejected outright
    Unknown,
}

impl KeyType {
    /// Classify an OpenSSH key algorithm name (`ssh-ed25519`, `ssh-rsa`, ...)
    pub fn from_ssh_name(name: &str) -> Self {
        match name {
            "ssh-rsa" | "rsa-sha2-256" | "rsa-sha2-512" => Self::Rsa,
            "ecdsa-sha2-nistp256" | "ecdsa-sha2-nistp384" | "ecdsa-sha2-nistp521" => Self::Ecdsa,
            "ssh-ed25519" => Self::Ed25519,
            "sk-ssh-ed25519@openssh.com" => Self::Ed25519Sk,
            _ => Self::Unknown,
        }
    }

    /// Short name used in configuration and reports
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ecdsa => "ecdsa",
            Self::Ed25519 => "ed25519",
            Self::Ed25519Sk => "ed25519-sk",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = String;

    /// Accepts both the short names and OpenSSH algorithm names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa" => Ok(Self::Rsa),
            "ecdsa" => Ok(Self::Ecdsa),
            "ed25519" => Ok(Self::Ed25519),
            "ed25519-sk" | "ed25519_sk" => Ok(Self::Ed25519Sk),
            "unknown" => Ok(Self::Unknown),
            other => match Self::from_ssh_name(other) {
                Self::Unknown => Err(format!("unknown key type '{other}'")),
                known => Ok(known),
            },
        }
    }
}

/// One entry of the allowed-signers policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedSigner {
    /// Principal field as written (may be a comma-separated list)
    pub principal: String,
    /// Algorithm family
    pub key_type: KeyType,
    /// Algorithm name exactly as written in the policy
    pub key_type_name: String,
    /// Decoded public key blob (SSH wire encoding)
    pub public_key: Vec<u8>,
    /// `SHA256:<base64>` fingerprint of `public_key`
    pub fingerprint: String,
    /// `namespaces="..."` restriction, if any
    pub namespaces: Option<Vec<String>>,
    /// `valid-after` bound
    pub valid_after: Option<DateTime<Utc>>,
    /// `valid-before` bound
    pub valid_before: Option<DateTime<Utc>>,
    /// Entry is a certificate authority rather than a signing key
    pub cert_authority: bool,
    /// 1-based line number in the policy text
    pub line: usize,
}

impl AllowedSigner {
    /// Whether this entry may sign in `namespace`
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        self.namespaces
            .as_ref()
            .is_none_or(|list| list.iter().any(|n| n == namespace || n == "*"))
    }

    /// Whether `at` falls inside the entry's validity window
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_after.is_none_or(|after| at >= after)
            && self.valid_before.is_none_or(|before| at < before)
    }
}

/// A commit to authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Commit object id (hex)
    pub sha: String,
    /// `Name <email>` from the author header
    pub author: String,
    /// Committer timestamp, when parseable
    pub committed_at: Option<DateTime<Utc>>,
    /// Raw `gpgsig` header value, if the commit is signed
    pub signature: Option<Vec<u8>>,
    /// Exact bytes the signature covers (commit object minus the signature header)
    pub payload: Vec<u8>,
    /// Set when the object itself is malformed; such a commit never verifies
    pub defect: Option<String>,
}

/// Per-commit verification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationOutcome {
    /// Signed by an allowed key and the signature checks out
    Verified,
    /// No signature present
    Unsigned,
    /// Signing key not in the policy (or not usable for this signature)
    UnknownSigner,
    /// Signing key found but its type is not the required one
    KeyTypeRejected,
    /// Signature unparseable or cryptographically invalid
    MalformedSignature,
}

impl std::fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Unsigned => write!(f, "unsigned"),
            Self::UnknownSigner => write!(f, "unknownSigner"),
            Self::KeyTypeRejected => write!(f, "keyTypeRejected"),
            Self::MalformedSignature => write!(f, "malformedSignature"),
        }
    }
}

/// Result of verifying one commit
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// The commit that was checked
    pub commit: Arc<CommitRecord>,
    /// Outcome
    pub outcome: VerificationOutcome,
    /// Policy entry whose key signed the commit, when one matched
    pub matched_signer: Option<Arc<AllowedSigner>>,
    /// Human-readable reason for non-verified outcomes
    pub detail: Option<String>,
}

impl VerificationResult {
    /// Whether the commit passed
    pub fn is_verified(&self) -> bool {
        self.outcome == VerificationOutcome::Verified
    }
}

/// Overall authentication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    /// Every commit in range verified
    Success,
    /// At least one commit failed, or the range could not be built
    Failed,
    /// Authentication disabled by configuration
    Skipped,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Aggregated result of authenticating a range
#[derive(Debug, Clone)]
pub struct AuthenticationVerdict {
    /// Overall status
    pub overall: AuthStatus,
    /// One result per commit, oldest first
    pub results: Vec<VerificationResult>,
}

impl AuthenticationVerdict {
    /// Verdict for a disabled authentication phase
    pub const fn skipped() -> Self {
        Self {
            overall: AuthStatus::Skipped,
            results: Vec::new(),
        }
    }

    /// Results whose outcome is not `Verified`, in range order
    pub fn failed_commits(&self) -> Vec<&VerificationResult> {
        self.results.iter().filter(|r| !r.is_verified()).collect()
    }

    /// Number of verified commits
    pub fn verified_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_verified()).count()
    }
}

/// How base is advanced to head
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMethod {
    /// Move the base pointer to head's tip
    #[default]
    FastForward,
    /// Record an explicit two-parent merge commit (history must still be fast-forwardable)
    Merge,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FastForward => write!(f, "fast-forward"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast-forward" | "ff" | "fast_forward" => Ok(Self::FastForward),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown merge method '{other}'")),
        }
    }
}

/// Why a merge cannot proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockingReason {
    /// Both sides have commits the other lacks
    NotFastForward,
    /// Base tip changed after the feasibility check
    BaseMoved,
    /// Base and head share no history
    NoCommonAncestor,
    /// The ref update was refused by branch protection
    ProtectedBranchPolicy,
}

impl std::fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFastForward => write!(f, "notFastForward"),
            Self::BaseMoved => write!(f, "baseMoved"),
            Self::NoCommonAncestor => write!(f, "noCommonAncestor"),
            Self::ProtectedBranchPolicy => write!(f, "protectedBranchPolicy"),
        }
    }
}

/// Overall merge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    /// Base advanced
    Success,
    /// The write was attempted and rejected
    Failed,
    /// Nothing to do, merge disabled, or gated by authentication
    Skipped,
    /// Structural reason prevents the merge
    Blocked,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// When the reporting collaborator should post a review comment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommentMode {
    /// Every run
    Always,
    /// Only when authentication or merge did not succeed
    #[default]
    OnError,
    /// Never
    Never,
}

impl CommentMode {
    /// Decide whether a comment is wanted for a run that did (`failed`) or did not fail
    pub const fn should_comment(self, failed: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnError => failed,
            Self::Never => false,
        }
    }
}

impl FromStr for CommentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "on-error" | "on_error" => Ok(Self::OnError),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown comment mode '{other}'")),
        }
    }
}

/// Outcome of a compare-and-swap ref update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    /// Ref now points at the new value
    Updated,
    /// Ref no longer held the expected old value
    Conflict {
        /// Value observed instead, when known
        actual: Option<String>,
    },
    /// The update was refused for another reason
    Rejected {
        /// Redacted rejection message
        reason: String,
        /// Refusal came from branch-protection policy
        policy: bool,
    },
}

// =============================================================================
// Result surface
// =============================================================================

/// A commit that did not verify, as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCommit {
    /// Commit id
    pub sha: String,
    /// Non-verified outcome
    pub outcome: VerificationOutcome,
    /// Author identity
    pub author: String,
}

impl From<&VerificationResult> for FailedCommit {
    fn from(result: &VerificationResult) -> Self {
        Self {
            sha: result.commit.sha.clone(),
            outcome: result.outcome,
            author: result.commit.author.clone(),
        }
    }
}

/// Structured context for a fatal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Stable error tag
    pub kind: String,
    /// Masked message
    pub message: String,
    /// Operator hint
    pub remediation: Option<String>,
}

/// Everything an invocation reports back to its caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    /// Base ref name
    pub base: String,
    /// Head ref name
    pub head: String,
    /// Resolved base sha (if resolution got that far)
    pub base_sha: Option<String>,
    /// Resolved head sha
    pub head_sha: Option<String>,
    /// Authentication status
    pub auth_status: AuthStatus,
    /// Merge status
    pub merge_status: MergeStatus,
    /// Commits that did not verify, in range order
    pub failed_commits: Vec<FailedCommit>,
    /// Number of commits that verified
    pub verified_count: usize,
    /// Sha base now points at, when the merge succeeded
    pub merge_sha: Option<String>,
    /// Why the merge was blocked
    pub blocking_reason: Option<BlockingReason>,
    /// Phase-fatal error, if any
    pub error: Option<ErrorReport>,
    /// Whether the reporting collaborator should comment
    pub should_comment: bool,
}

impl GateReport {
    /// Whether the run should count as a failure for CI
    pub fn is_failure(&self) -> bool {
        self.auth_status == AuthStatus::Failed
            || matches!(self.merge_status, MergeStatus::Failed | MergeStatus::Blocked)
            || self.error.is_some()
    }
}
