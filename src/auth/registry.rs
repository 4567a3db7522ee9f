//! Allowed-signers policy
//!
//! Parses the OpenSSH `allowed_signers` format:
//!
//! ```text
//! # comment
//! alice@example.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAI...
//! bob@example.com,ci@example.com namespaces="git",valid-after="20240101" ssh-rsa AAAA... laptop
//! ```
//!
//! The registry is built once and read-only thereafter.

use crate::error::{Error, Result};
use crate::types::{AllowedSigner, KeyType};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Indexed, immutable set of allowed signers
#[derive(Debug, Clone, Default)]
pub struct SignerRegistry {
    entries: Vec<Arc<AllowedSigner>>,
    by_fingerprint: HashMap<String, Vec<usize>>,
}

impl SignerRegistry {
    /// Parse policy text
    ///
    /// Blank lines and `#` comments are skipped. The first malformed line
    /// fails the whole load with its line number.
    pub fn load(text: &str) -> Result<Self> {
        let mut registry = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let signer = parse_line(trimmed, line)?;
            registry.insert(signer)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, signer: AllowedSigner) -> Result<()> {
        if let Some(existing) = self
            .by_fingerprint
            .get(&signer.fingerprint)
            .and_then(|idxs| idxs.first())
            .map(|&i| &self.entries[i])
            && existing.key_type != signer.key_type
        {
            return Err(Error::Policy {
                line: signer.line,
                message: format!(
                    "key {} already listed on line {} as {}",
                    signer.fingerprint, existing.line, existing.key_type
                ),
            });
        }
        let idx = self.entries.len();
        self.by_fingerprint
            .entry(signer.fingerprint.clone())
            .or_default()
            .push(idx);
        self.entries.push(Arc::new(signer));
        Ok(())
    }

    /// First entry for a raw public key blob
    pub fn lookup(&self, public_key: &[u8]) -> Option<&Arc<AllowedSigner>> {
        self.lookup_fingerprint(&fingerprint(public_key))
    }

    /// First entry for a `SHA256:` fingerprint
    pub fn lookup_fingerprint(&self, fingerprint: &str) -> Option<&Arc<AllowedSigner>> {
        self.candidates(fingerprint).next()
    }

    /// Every entry for a fingerprint, in policy order
    pub fn candidates<'a>(
        &'a self,
        fingerprint: &str,
    ) -> impl Iterator<Item = &'a Arc<AllowedSigner>> + use<'a> {
        self.by_fingerprint
            .get(fingerprint)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
    }

    /// Registry restricted to one key type
    #[must_use]
    pub fn filter_by_key_type(&self, key_type: KeyType) -> Self {
        let mut filtered = Self::default();
        for entry in self.entries.iter().filter(|e| e.key_type == key_type) {
            let idx = filtered.entries.len();
            filtered
                .by_fingerprint
                .entry(entry.fingerprint.clone())
                .or_default()
                .push(idx);
            filtered.entries.push(Arc::clone(entry));
        }
        filtered
    }

    /// Entries in policy order
    pub fn entries(&self) -> &[Arc<AllowedSigner>] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the policy lists no signers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// OpenSSH-style `SHA256:<base64>` fingerprint of a key blob
pub fn fingerprint(public_key: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(public_key)))
}

fn policy_error(line: usize, message: impl Into<String>) -> Error {
    Error::Policy {
        line,
        message: message.into(),
    }
}

fn parse_line(text: &str, line: usize) -> Result<AllowedSigner> {
    let tokens = tokenize(text).map_err(|m| policy_error(line, m))?;

    let (options, rest) = match tokens.get(1) {
        Some(t) if is_options_field(t) => (Some(t.as_str()), &tokens[2..]),
        Some(_) => (None, &tokens[1..]),
        None => return Err(policy_error(line, "expected `<principal> <key-type> <key>`")),
    };
    let [key_type_name, key_b64, ..] = rest else {
        return Err(policy_error(line, "expected `<principal> <key-type> <key>`"));
    };

    let principal = tokens[0].clone();
    if principal.split(',').any(str::is_empty) {
        return Err(policy_error(line, "empty principal"));
    }

    let public_key = STANDARD
        .decode(key_b64)
        .map_err(|e| policy_error(line, format!("key is not valid base64: {e}")))?;
    let key_type = KeyType::from_ssh_name(key_type_name);
    check_key_blob(&public_key, key_type_name, key_type, line)?;

    let mut signer = AllowedSigner {
        principal,
        key_type,
        key_type_name: key_type_name.clone(),
        fingerprint: fingerprint(&public_key),
        public_key,
        namespaces: None,
        valid_after: None,
        valid_before: None,
        cert_authority: false,
        line,
    };
    if let Some(options) = options {
        apply_options(&mut signer, options)?;
    }
    Ok(signer)
}

fn is_options_field(token: &str) -> bool {
    token.contains('=') || token.contains(',') || token.eq_ignore_ascii_case("cert-authority")
}

/// Split on whitespace outside double quotes; quotes are kept in the token
fn tokenize(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Known key types must be well-formed and embed the algorithm they claim
fn check_key_blob(blob: &[u8], declared: &str, key_type: KeyType, line: usize) -> Result<()> {
    if blob.len() < 4 {
        return Err(policy_error(line, "key blob is truncated"));
    }
    if key_type == KeyType::Unknown {
        return Ok(());
    }
    let name_len = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    let embedded = blob
        .get(4..4 + name_len)
        .ok_or_else(|| policy_error(line, "key blob is truncated"))?;
    if embedded != declared.as_bytes() {
        return Err(policy_error(
            line,
            format!(
                "key type '{declared}' does not match key material '{}'",
                String::from_utf8_lossy(embedded)
            ),
        ));
    }
    ssh_key::PublicKey::from_bytes(blob)
        .map_err(|e| policy_error(line, format!("invalid {declared} key: {e}")))?;
    Ok(())
}

/// Comma-separated options; commas inside quotes do not split
fn apply_options(signer: &mut AllowedSigner, options: &str) -> Result<()> {
    let line = signer.line;
    for option in split_options(options) {
        let (name, value) = match option.split_once('=') {
            Some((n, v)) => (n, Some(unquote(v))),
            None => (option, None),
        };
        match (name.to_ascii_lowercase().as_str(), value) {
            ("cert-authority", None) => signer.cert_authority = true,
            ("namespaces", Some(v)) => {
                signer.namespaces = Some(
                    v.split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            ("valid-after", Some(v)) => signer.valid_after = Some(parse_time(v, line)?),
            ("valid-before", Some(v)) => signer.valid_before = Some(parse_time(v, line)?),
            (other, _) => {
                return Err(policy_error(line, format!("unsupported option '{other}'")));
            }
        }
    }
    if let (Some(after), Some(before)) = (signer.valid_after, signer.valid_before)
        && after >= before
    {
        return Err(policy_error(line, "valid-after must be earlier than valid-before"));
    }
    Ok(())
}

fn split_options(options: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in options.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&options[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&options[start..]);
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// `YYYYMMDD[HHMM[SS]]` with an optional `Z`, read as UTC
fn parse_time(value: &str, line: usize) -> Result<DateTime<Utc>> {
    let digits = value.strip_suffix(['Z', 'z']).unwrap_or(value);
    let padded = match digits.len() {
        8 => format!("{digits}000000"),
        12 => format!("{digits}00"),
        14 => digits.to_string(),
        _ => return Err(policy_error(line, format!("invalid timestamp '{value}'"))),
    };
    NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
        .map(|t| t.and_utc())
        .map_err(|_| policy_error(line, format!("invalid timestamp '{value}'")))
}
