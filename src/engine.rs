//! Gate orchestration
//!
//! Authenticates the range (when configured to), gates and performs the
//! merge, and folds both into one [`GateReport`]. The whole invocation runs
//! under the configured deadline and always flushes the audit log.

use crate::audit::{AuditLog, Severity};
use crate::auth::{AuthOptions, SignerRegistry, authenticate};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::merge::{MergeState, create_merge_plan, execute_merge, gather_merge_facts};
use crate::resilience::{RateLimiter, ResilientVcs};
use crate::types::{AuthStatus, ErrorReport, FailedCommit, GateReport, MergeStatus};
use crate::vcs::VersionControl;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One configured gate invocation
pub struct Engine {
    config: EngineConfig,
    vcs: ResilientVcs<Arc<dyn VersionControl>>,
    audit: Arc<AuditLog>,
}

impl Engine {
    /// Build an engine over `vcs`
    ///
    /// `limiter` should be the same one the audit log draws from so every
    /// bucket is shared across the invocation.
    pub fn new(
        config: EngineConfig,
        vcs: Arc<dyn VersionControl>,
        audit: Arc<AuditLog>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let vcs = ResilientVcs::new(vcs, limiter, config.retry).with_audit(Arc::clone(&audit));
        Self { config, vcs, audit }
    }

    /// Configuration in effect
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Authenticate, then merge if allowed
    pub async fn run(&self) -> Result<GateReport> {
        self.run_bounded(self.config.perform_merge).await
    }

    /// Authenticate only
    pub async fn check(&self) -> Result<GateReport> {
        self.run_bounded(false).await
    }

    async fn run_bounded(&self, perform_merge: bool) -> Result<GateReport> {
        let deadline = self.config.deadline();
        let outcome = tokio::time::timeout(deadline, self.run_phases(perform_merge)).await;
        let result = outcome.unwrap_or_else(|_| {
            warn!(?deadline, "invocation deadline exceeded");
            self.audit.record(
                Severity::High,
                "engine.deadline_exceeded",
                format!("invocation abandoned after {deadline:?}"),
            );
            Err(Error::DeadlineExceeded(deadline))
        });
        if let Err(e) = self.audit.flush() {
            warn!(error = %e, "audit flush failed");
        }
        result
    }

    async fn run_phases(&self, perform_merge: bool) -> Result<GateReport> {
        let (base, head) = self.config.refs()?;
        let config = &self.config;
        let verifying = config.auth_required || config.verify_when_not_required;
        self.audit.record(
            Severity::Info,
            "engine.start",
            format!(
                "{base} <- {head}: auth_required={} verify={verifying} merge={perform_merge}",
                config.auth_required
            ),
        );

        let mut report = GateReport {
            base: base.clone(),
            head: head.clone(),
            base_sha: None,
            head_sha: None,
            auth_status: AuthStatus::Skipped,
            merge_status: MergeStatus::Skipped,
            failed_commits: Vec::new(),
            verified_count: 0,
            merge_sha: None,
            blocking_reason: None,
            error: None,
            should_comment: false,
        };

        if verifying {
            let registry = Arc::new(self.load_registry()?);
            let options = AuthOptions {
                required_key_type: config.required_key_type,
                namespace: config.signature_namespace.clone(),
                concurrency: config.verify_concurrency,
            };
            match authenticate(&self.vcs, &base, &head, registry, &options, &self.audit).await {
                Ok(range) => {
                    report.base_sha = Some(range.base_sha);
                    report.head_sha = Some(range.head_sha);
                    report.failed_commits = range
                        .verdict
                        .failed_commits()
                        .into_iter()
                        .map(FailedCommit::from)
                        .collect();
                    report.verified_count = range.verdict.verified_count();
                    report.auth_status = if config.auth_required {
                        range.verdict.overall
                    } else {
                        AuthStatus::Skipped
                    };
                }
                Err(e) => {
                    warn!(error = %e, "commit range could not be authenticated");
                    self.audit.record(
                        Severity::Warning,
                        "auth.range_failed",
                        format!("{base}..{head}: {e}"),
                    );
                    // observation-only verification never holds up the merge
                    if config.auth_required {
                        report.auth_status = AuthStatus::Failed;
                        report.error = Some(self.error_report(&e));
                        return Ok(self.finish(report));
                    }
                }
            }
        }

        if !perform_merge {
            debug!("merge disabled");
        } else if config.auth_required && report.auth_status != AuthStatus::Success {
            info!(auth = %report.auth_status, "merge gated by authentication");
            self.audit.record(
                Severity::Info,
                "merge.gated",
                format!("merge of {head} skipped: authentication {}", report.auth_status),
            );
        } else if let Err(e) = self.merge(&mut report).await {
            report.merge_status = MergeStatus::Failed;
            report.error = Some(self.error_report(&e));
        }

        Ok(self.finish(report))
    }

    fn load_registry(&self) -> Result<SignerRegistry> {
        let loaded = self
            .config
            .policy_text()
            .and_then(|text| SignerRegistry::load(&text));
        match loaded {
            Ok(registry) => {
                if registry.is_empty() {
                    self.audit.record(
                        Severity::Warning,
                        "policy.empty",
                        "allowed signers policy lists no keys; every signed commit will be rejected",
                    );
                }
                debug!(signers = registry.len(), "policy loaded");
                Ok(registry)
            }
            Err(e) => {
                self.audit
                    .record(Severity::High, "policy.invalid", e.to_string());
                Err(e)
            }
        }
    }

    /// Plan and execute against the already-known shas when there are some
    async fn merge(&self, report: &mut GateReport) -> Result<()> {
        let (base_sha, head_sha) = match (&report.base_sha, &report.head_sha) {
            (Some(b), Some(h)) => (b.clone(), h.clone()),
            _ => {
                let base_sha = self.vcs.resolve(&report.base).await?;
                let head_sha = self.vcs.resolve(&report.head).await?;
                report.base_sha = Some(base_sha.clone());
                report.head_sha = Some(head_sha.clone());
                (base_sha, head_sha)
            }
        };

        let facts =
            gather_merge_facts(&self.vcs, &report.base, &report.head, &base_sha, &head_sha).await?;
        let plan = create_merge_plan(&facts, self.config.merge_method);
        if plan.is_noop() {
            info!(base = %report.base, head = %report.head, "already up to date");
            self.audit.record(
                Severity::Info,
                "merge.up_to_date",
                format!("{} already contains {}", report.base, report.head),
            );
            return Ok(());
        }

        let message = self.config.merge_message(&report.base, &report.head);
        let execution = execute_merge(&plan, &self.vcs, &message, &self.audit).await?;
        match execution.state {
            MergeState::Committed { sha } => {
                report.merge_status = MergeStatus::Success;
                report.merge_sha = Some(sha);
            }
            MergeState::Blocked(reason) => {
                self.audit.record(
                    Severity::Warning,
                    "merge.blocked",
                    format!("{} <- {}: {reason}", report.base, report.head),
                );
                report.merge_status = MergeStatus::Blocked;
                report.blocking_reason = Some(reason);
            }
            MergeState::Failed { message } => {
                report.merge_status = MergeStatus::Failed;
                report.error = Some(ErrorReport {
                    kind: "merge_rejected".to_string(),
                    message,
                    remediation: None,
                });
            }
            other => {
                return Err(Error::Internal(format!(
                    "merge stopped in non-terminal state {other:?}"
                )));
            }
        }
        Ok(())
    }

    fn error_report(&self, error: &Error) -> ErrorReport {
        ErrorReport {
            kind: error.kind().to_string(),
            message: self.audit.masker().mask(&error.to_string()).into_owned(),
            remediation: error.remediation().map(str::to_string),
        }
    }

    fn finish(&self, mut report: GateReport) -> GateReport {
        report.should_comment = self.config.comment_mode.should_comment(report.is_failure());
        info!(
            auth = %report.auth_status,
            merge = %report.merge_status,
            failed = report.failed_commits.len(),
            "gate finished"
        );
        self.audit.record(
            if report.is_failure() {
                Severity::Warning
            } else {
                Severity::Info
            },
            "engine.finish",
            format!(
                "auth={} merge={} failed_commits={}",
                report.auth_status,
                report.merge_status,
                report.failed_commits.len()
            ),
        );
        report
    }
}
