//! Shared command context for CLI commands
//!
//! Extracts common setup shared by `run` and `check`.

use crate::cli::GateArgs;
use sigmerge::audit::{
    AuditLog, AuditSink, JsonLinesSink, SecretMasker, SecurityEvent, TracingSink,
};
use sigmerge::error::Result;
use sigmerge::resilience::RateLimiter;
use sigmerge::vcs::{GitCli, VersionControl};
use sigmerge::{Engine, EngineConfig};
use std::sync::Arc;

/// CI credentials that must never reach the audit log verbatim
const TOKEN_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN", "SIGMERGE_PUSH_TOKEN"];

/// Everything a gate command needs
///
/// The audit log and the engine share one rate limiter, so audit events
/// and external calls draw on the same per-invocation budget.
pub struct CommandContext {
    /// Configured engine over the local clone
    pub engine: Engine,
    /// Audit log (close it before exiting)
    pub audit: Arc<AuditLog>,
}

impl CommandContext {
    /// Build configuration and collaborators from CLI arguments
    pub fn new(args: &GateArgs) -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok();
        let config = build_config(args, env)?;

        let limiter = Arc::new(config.rate_limiter());
        let mut sinks: Vec<Box<dyn AuditSink>> = vec![Box::new(TracingSink)];
        if let Some(path) = &config.audit_log {
            sinks.push(Box::new(JsonLinesSink::open(path)?));
        }
        let audit = Arc::new(
            AuditLog::open(sinks, build_masker(&config, env)?, Arc::clone(&limiter))
                .with_alert(Box::new(annotate)),
        );

        let git = GitCli::new(&args.repo)
            .with_remote(config.remote.clone())
            .with_call_timeout(config.call_timeout());
        let vcs: Arc<dyn VersionControl> = Arc::new(git);
        let engine = Engine::new(config, vcs, Arc::clone(&audit), limiter);

        Ok(Self { engine, audit })
    }
}

/// TOML file, then CLI/env overrides, then CI event defaults
pub fn build_config(
    args: &GateArgs,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_or_default(args.config.as_deref())?;

    if let Some(base) = &args.base {
        config.base_branch = Some(base.clone());
    }
    if let Some(head) = &args.head {
        config.head_branch = Some(head.clone());
    }
    if let Some(file) = &args.allowed_signers_file {
        config.allowed_signers_file = Some(file.clone());
        config.allowed_signers = None;
    }
    if let Some(inline) = &args.allowed_signers {
        config.allowed_signers = Some(inline.clone());
        config.allowed_signers_file = None;
    }
    if let Some(key_type) = args.required_key_type {
        config.required_key_type = Some(key_type);
    }
    if let Some(required) = args.auth_required {
        config.auth_required = required;
    }
    if let Some(verify) = args.verify_when_not_required {
        config.verify_when_not_required = verify;
    }
    if let Some(method) = args.merge_method {
        config.merge_method = method;
    }
    if let Some(mode) = args.comment_mode {
        config.comment_mode = mode;
    }
    if let Some(remote) = &args.remote {
        config.remote = Some(remote.clone());
    }
    if args.no_merge {
        config.perform_merge = false;
    }
    if let Some(path) = &args.audit_log {
        config.audit_log = Some(path.clone());
    }
    if let Some(secs) = args.deadline_secs {
        config.deadline_secs = secs;
    }

    config.apply_event_defaults(env);
    config.validate()?;
    Ok(config)
}

/// Configured patterns plus any CI token present in the environment
fn build_masker(config: &EngineConfig, env: impl Fn(&str) -> Option<String>) -> Result<SecretMasker> {
    let mut masker = config.masker()?;
    for var in TOKEN_VARS {
        if let Some(token) = env(var) {
            masker = masker.with_literal(&token);
        }
    }
    Ok(masker)
}

/// Workflow command data escaping
fn escape_data(text: &str) -> String {
    text.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Surface high-severity events as CI workflow annotations
fn annotate(event: &SecurityEvent) {
    eprintln!(
        "::warning title=sigmerge security event::{}: {}",
        event.category,
        escape_data(&event.detail)
    );
}
