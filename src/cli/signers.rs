//! `signers` command - validate and list an allowed-signers file

use crate::cli::SignersArgs;
use crate::cli::style::{Stylize, check};
use anstream::println;
use anyhow::Context;
use serde::Serialize;
use sigmerge::auth::SignerRegistry;
use sigmerge::types::{AllowedSigner, KeyType};
use std::fs;
use std::process::ExitCode;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignerEntry<'a> {
    line: usize,
    principal: &'a str,
    key_type: KeyType,
    fingerprint: &'a str,
    namespaces: Option<&'a [String]>,
    valid_after: Option<String>,
    valid_before: Option<String>,
    cert_authority: bool,
}

impl<'a> From<&'a AllowedSigner> for SignerEntry<'a> {
    fn from(signer: &'a AllowedSigner) -> Self {
        Self {
            line: signer.line,
            principal: &signer.principal,
            key_type: signer.key_type,
            fingerprint: &signer.fingerprint,
            namespaces: signer.namespaces.as_deref(),
            valid_after: signer.valid_after.map(|t| t.to_rfc3339()),
            valid_before: signer.valid_before.map(|t| t.to_rfc3339()),
            cert_authority: signer.cert_authority,
        }
    }
}

/// Parse the policy and print what it allows
pub fn run_signers(args: &SignersArgs) -> anyhow::Result<ExitCode> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let registry = SignerRegistry::load(&text)?;

    let entries: Vec<SignerEntry<'_>> = registry
        .entries()
        .iter()
        .map(|s| SignerEntry::from(s.as_ref()))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} {}",
        check(),
        format!("{} signer(s) in {}", entries.len(), args.file.display()).emphasis()
    );
    for entry in &entries {
        let mut notes = Vec::new();
        if let Some(ns) = entry.namespaces {
            notes.push(format!("namespaces={}", ns.join(",")));
        }
        if let Some(after) = &entry.valid_after {
            notes.push(format!("after {after}"));
        }
        if let Some(before) = &entry.valid_before {
            notes.push(format!("before {before}"));
        }
        if entry.cert_authority {
            notes.push("cert-authority (ignored for commit signatures)".to_string());
        }
        println!(
            "  {} {} {}",
            entry.principal.accent(),
            entry.key_type.to_string().emphasis(),
            entry.fingerprint.muted()
        );
        if !notes.is_empty() {
            println!("    {}", notes.join(", ").muted());
        }
    }
    Ok(ExitCode::SUCCESS)
}
