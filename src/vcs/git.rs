//! `git` binary adapter
//!
//! Every call runs `git -C <repo>` with prompts disabled, a per-call
//! timeout, and credential-redacted stderr.

use super::{VersionControl, is_object_id, parse_commit_object};
use crate::audit::{redact_credentials, redact_url};
use crate::error::{Error, Result};
use crate::types::{CommitRecord, RefUpdate};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

static CAS_MISMATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"is at ([0-9a-f]{40,64}) but expected").expect("static regex is valid")
});

/// Phrases that mark a failure as deterministic even if a transient phrase also appears
const PERMANENT_MARKERS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "returned error: 4",
    "repository not found",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "index.lock",
    "unable to create",
    "could not resolve host",
    "timed out",
    "connection reset",
    "connection refused",
    "early eof",
    "the remote end hung up",
    "returned error: 5",
    "rpc failed",
    "temporarily unavailable",
];

const POLICY_MARKERS: &[&str] = &[
    "protected branch",
    "gh006",
    "hook declined",
    "pre-receive hook",
    "push declined due to repository rule",
];

const CONFLICT_MARKERS: &[&str] = &["stale info", "fetch first", "non-fast-forward"];

/// Whether a git failure message describes a condition that may clear up on retry
pub fn is_transient_git_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

struct GitOutput {
    code: Option<i32>,
    stdout: Vec<u8>,
    stderr: String,
}

impl GitOutput {
    fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// [`VersionControl`] over a local clone via the `git` CLI
#[derive(Debug, Clone)]
pub struct GitCli {
    git: PathBuf,
    repo: PathBuf,
    remote: Option<String>,
    call_timeout: Duration,
}

impl GitCli {
    /// Adapter for the repository at `repo`
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            git: PathBuf::from("git"),
            repo: repo.into(),
            remote: None,
            call_timeout: Duration::from_secs(120),
        }
    }

    /// Publish ref updates to `remote` with a leased push instead of updating locally
    #[must_use]
    pub fn with_remote(mut self, remote: Option<String>) -> Self {
        self.remote = remote;
        self
    }

    /// Per-call timeout
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn exec(&self, operation: &str, args: &[&str], input: Option<Vec<u8>>) -> Result<GitOutput> {
        // remotes may be URLs carrying a token
        let shown: Vec<String> = args.iter().map(|a| redact_url(a)).collect();
        debug!(operation, args = ?shown, "git");
        let mut command = Command::new(&self.git);
        command
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| Error::Git {
            operation: operation.to_string(),
            message: format!("failed to run {}: {e}", self.git.display()),
            transient: false,
        })?;

        // Feed stdin from its own task so a full stdout pipe cannot deadlock us
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "git stdin closed early");
                }
            });
        }

        let output = tokio::time::timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::CallTimeout {
                operation: operation.to_string(),
                after: self.call_timeout,
            })??;

        Ok(GitOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: redact_credentials(String::from_utf8_lossy(&output.stderr).trim()).into_owned(),
        })
    }

    /// Run and require exit code 0
    async fn run(&self, operation: &str, args: &[&str]) -> Result<GitOutput> {
        let output = self.exec(operation, args, None).await?;
        if output.code == Some(0) {
            Ok(output)
        } else {
            Err(failure(operation, &output))
        }
    }

    async fn rev_parse(&self, spec: &str) -> Result<Option<String>> {
        let output = self
            .exec("rev-parse", &["rev-parse", "--verify", "--quiet", spec], None)
            .await?;
        match output.code {
            Some(0) => Ok(Some(output.stdout_text())),
            Some(1) => Ok(None),
            _ => Err(failure("rev-parse", &output)),
        }
    }

    async fn read_objects(&self, shas: &[String]) -> Result<Vec<CommitRecord>> {
        let mut input = Vec::with_capacity(shas.len() * 41);
        for sha in shas {
            input.extend_from_slice(sha.as_bytes());
            input.push(b'\n');
        }
        let output = self
            .exec("cat-file", &["cat-file", "--batch"], Some(input))
            .await?;
        if output.code != Some(0) {
            return Err(failure("cat-file", &output));
        }
        parse_batch(&output.stdout)
    }

    async fn update_local(&self, full_ref: &str, expected_old: &str, new_sha: &str) -> Result<RefUpdate> {
        let output = self
            .exec(
                "update-ref",
                &[
                    "update-ref",
                    "-m",
                    "sigmerge: advance",
                    full_ref,
                    new_sha,
                    expected_old,
                ],
                None,
            )
            .await?;
        if output.code == Some(0) {
            return Ok(RefUpdate::Updated);
        }
        if let Some(caps) = CAS_MISMATCH.captures(&output.stderr) {
            return Ok(RefUpdate::Conflict {
                actual: caps.get(1).map(|m| m.as_str().to_string()),
            });
        }
        if output.stderr.contains("unable to resolve reference") {
            return Ok(RefUpdate::Conflict { actual: None });
        }
        Err(failure("update-ref", &output))
    }

    async fn update_remote(
        &self,
        remote: &str,
        full_ref: &str,
        expected_old: &str,
        new_sha: &str,
    ) -> Result<RefUpdate> {
        let lease = format!("--force-with-lease={full_ref}:{expected_old}");
        let refspec = format!("{new_sha}:{full_ref}");
        let output = self
            .exec(
                "push",
                &["push", "--porcelain", &lease, remote, &refspec],
                None,
            )
            .await?;
        if output.code == Some(0) {
            return Ok(RefUpdate::Updated);
        }

        let combined = format!("{}\n{}", String::from_utf8_lossy(&output.stdout), output.stderr);
        let lower = combined.to_ascii_lowercase();
        if CONFLICT_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(RefUpdate::Conflict { actual: None });
        }
        if POLICY_MARKERS.iter().any(|m| lower.contains(m)) {
            return Ok(RefUpdate::Rejected {
                reason: redact_credentials(combined.trim()).into_owned(),
                policy: true,
            });
        }
        if is_transient_git_failure(&combined) {
            return Err(failure("push", &output));
        }
        Ok(RefUpdate::Rejected {
            reason: redact_credentials(combined.trim()).into_owned(),
            policy: false,
        })
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn resolve(&self, reference: &str) -> Result<String> {
        if reference.is_empty() || reference.starts_with('-') {
            return Err(Error::RefNotFound(reference.to_string()));
        }
        if let Some(sha) = self.rev_parse(&format!("{reference}^{{commit}}")).await? {
            return Ok(sha);
        }
        let remote = self.remote.as_deref().unwrap_or("origin");
        let tracking = format!("refs/remotes/{remote}/{reference}^{{commit}}");
        self.rev_parse(&tracking)
            .await?
            .ok_or_else(|| Error::RefNotFound(reference.to_string()))
    }

    async fn list_commits(&self, base_sha: &str, head_sha: &str) -> Result<Vec<CommitRecord>> {
        if !is_object_id(base_sha) || !is_object_id(head_sha) {
            return Err(Error::Internal(format!(
                "list_commits expects object ids, got {base_sha}..{head_sha}"
            )));
        }
        let exclude = format!("^{base_sha}");
        let output = self
            .run(
                "rev-list",
                &["rev-list", "--reverse", "--topo-order", head_sha, &exclude],
            )
            .await?;
        let shas: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if shas.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.read_objects(&shas).await?;
        if records.len() != shas.len() {
            return Err(Error::Internal(format!(
                "cat-file returned {} objects for {} commits",
                records.len(),
                shas.len()
            )));
        }
        Ok(records)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self
            .exec(
                "merge-base",
                &["merge-base", "--is-ancestor", ancestor, descendant],
                None,
            )
            .await?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure("merge-base", &output)),
        }
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let output = self.exec("merge-base", &["merge-base", a, b], None).await?;
        match output.code {
            Some(0) => Ok(Some(output.stdout_text())),
            Some(1) => Ok(None),
            _ => Err(failure("merge-base", &output)),
        }
    }

    async fn is_shallow(&self) -> Result<bool> {
        let output = self
            .run("rev-parse", &["rev-parse", "--is-shallow-repository"])
            .await?;
        Ok(output.stdout_text() == "true")
    }

    async fn shallow_boundary(&self) -> Result<Vec<String>> {
        let output = self
            .run("rev-parse", &["rev-parse", "--git-path", "shallow"])
            .await?;
        let path = self.repo.join(output.stdout_text());
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| is_object_id(l))
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_ref(
        &self,
        reference: &str,
        expected_old: &str,
        new_sha: &str,
    ) -> Result<RefUpdate> {
        if reference.starts_with('-') || !is_object_id(expected_old) || !is_object_id(new_sha) {
            return Err(Error::Internal(format!(
                "refusing ref update {reference}: {expected_old} -> {new_sha}"
            )));
        }
        let full_ref = if reference.starts_with("refs/") {
            reference.to_string()
        } else {
            format!("refs/heads/{reference}")
        };
        match &self.remote {
            Some(remote) => {
                self.update_remote(remote, &full_ref, expected_old, new_sha)
                    .await
            }
            None => self.update_local(&full_ref, expected_old, new_sha).await,
        }
    }

    async fn create_merge_commit(
        &self,
        base_sha: &str,
        head_sha: &str,
        message: &str,
    ) -> Result<String> {
        let tree = format!("{head_sha}^{{tree}}");
        let output = self
            .run(
                "commit-tree",
                &[
                    "commit-tree",
                    &tree,
                    "-p",
                    base_sha,
                    "-p",
                    head_sha,
                    "-m",
                    message,
                ],
            )
            .await?;
        let sha = output.stdout_text();
        if is_object_id(&sha) {
            Ok(sha)
        } else {
            Err(Error::Git {
                operation: "commit-tree".to_string(),
                message: format!("unexpected output '{sha}'"),
                transient: false,
            })
        }
    }
}

fn failure(operation: &str, output: &GitOutput) -> Error {
    let message = if output.stderr.is_empty() {
        format!("exit status {:?}", output.code)
    } else {
        output.stderr.clone()
    };
    Error::Git {
        operation: operation.to_string(),
        transient: is_transient_git_failure(&message),
        message,
    }
}

/// Parse `git cat-file --batch` output into commit records
fn parse_batch(mut out: &[u8]) -> Result<Vec<CommitRecord>> {
    let mut records = Vec::new();
    while !out.is_empty() {
        let header_end = out
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Internal("truncated cat-file header".to_string()))?;
        let header = String::from_utf8_lossy(&out[..header_end]).into_owned();
        out = &out[header_end + 1..];

        let mut fields = header.split_whitespace();
        let sha = fields.next().unwrap_or_default().to_string();
        let kind = fields.next().unwrap_or_default();
        if kind == "missing" {
            return Err(Error::InvalidObject {
                sha,
                message: "object missing from local history".to_string(),
            });
        }
        let size: usize = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Internal(format!("bad cat-file header '{header}'")))?;
        if out.len() < size + 1 {
            return Err(Error::Internal(format!("truncated object {sha}")));
        }
        let (body, rest) = out.split_at(size);
        out = &rest[1..];

        if kind != "commit" {
            return Err(Error::InvalidObject {
                sha,
                message: format!("expected commit, found {kind}"),
            });
        }
        records.push(parse_commit_object(&sha, body));
    }
    Ok(records)
}
