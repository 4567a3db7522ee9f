//! `run` and `check` commands

use crate::cli::GateArgs;
use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check, cross, short_sha};
use anstream::{eprintln, println};
use sigmerge::error::Error;
use sigmerge::types::{AuthStatus, ErrorReport, GateReport, MergeStatus};
use std::process::ExitCode;

/// Exit code for a fatal error (bad policy, bad config, deadline)
pub const EXIT_FATAL: u8 = 2;
/// Exit code when authentication or the merge did not succeed
pub const EXIT_GATE_FAILED: u8 = 1;

/// Run the gate; `check_only` skips the merge phase
pub async fn run_gate(args: &GateArgs, check_only: bool) -> anyhow::Result<ExitCode> {
    let ctx = CommandContext::new(args)?;

    let outcome = if check_only {
        ctx.engine.check().await
    } else {
        ctx.engine.run().await
    };

    let code = match outcome {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if report.is_failure() {
                ExitCode::from(EXIT_GATE_FAILED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            let masked = ctx.audit.masker().mask(&e.to_string()).into_owned();
            if args.json {
                let report = ErrorReport {
                    kind: e.kind().to_string(),
                    message: masked,
                    remediation: e.remediation().map(str::to_string),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "error": report }))?
                );
            } else {
                print_fatal(&e, &masked);
            }
            ExitCode::from(EXIT_FATAL)
        }
    };

    ctx.audit.close()?;
    Ok(code)
}

fn print_fatal(error: &Error, masked: &str) {
    eprintln!("{} {masked}", "error:".error());
    if let Some(hint) = error.remediation() {
        eprintln!("  {} {hint}", "hint:".muted());
    }
}

fn print_report(report: &GateReport) {
    println!(
        "{} {} {} {}",
        "Gate".emphasis(),
        report.base.accent(),
        "<-".muted(),
        report.head.accent()
    );
    if let (Some(base), Some(head)) = (&report.base_sha, &report.head_sha) {
        println!(
            "  {}",
            format!("{}..{}", short_sha(base), short_sha(head)).muted()
        );
    }
    println!();

    let auth = match report.auth_status {
        AuthStatus::Success => format!("{} authentication passed", check()),
        AuthStatus::Failed => format!("{} authentication failed", cross()),
        AuthStatus::Skipped => "- authentication skipped".warn(),
    };
    println!("{auth} {}", format!("({} verified)", report.verified_count).muted());
    for failed in &report.failed_commits {
        println!(
            "    {} {} {}",
            short_sha(&failed.sha).accent(),
            failed.outcome.to_string().error(),
            failed.author.muted()
        );
    }

    let merge = match report.merge_status {
        MergeStatus::Success => format!(
            "{} merged {}",
            check(),
            report.merge_sha.as_deref().map(short_sha).unwrap_or_default().accent()
        ),
        MergeStatus::Blocked => format!(
            "{} merge blocked: {}",
            cross(),
            report
                .blocking_reason
                .map(|r| r.to_string())
                .unwrap_or_default()
        ),
        MergeStatus::Failed => format!("{} merge failed", cross()),
        MergeStatus::Skipped => "- merge skipped".warn(),
    };
    println!("{merge}");

    if let Some(error) = &report.error {
        println!();
        println!("{} {}", "error:".error(), error.message);
        if let Some(hint) = &error.remediation {
            println!("  {} {hint}", "hint:".muted());
        }
    }
    if report.should_comment {
        println!("{}", "comment requested".muted());
    }
}
