//! Commit object parsing
//!
//! Splits a raw commit object into the signature header value and the exact
//! bytes that signature covers. Object content is untrusted, so defects are
//! recorded on the record instead of failing the parse.

use crate::types::CommitRecord;
use chrono::{DateTime, Utc};

const SIG_HEADER_SHA1: &[u8] = b"gpgsig";
const SIG_HEADER_SHA256: &[u8] = b"gpgsig-sha256";

/// Parse a raw commit object (as printed by `git cat-file commit`)
///
/// The signature is taken from `gpgsig` for 40-hex ids and from
/// `gpgsig-sha256` for 64-hex ids. Every signature header is removed from
/// the payload, byte for byte, the way git itself reconstructs it.
pub fn parse_commit_object(sha: &str, raw: &[u8]) -> CommitRecord {
    let wanted = if sha.len() == 64 {
        SIG_HEADER_SHA256
    } else {
        SIG_HEADER_SHA1
    };

    let mut payload = Vec::with_capacity(raw.len());
    let mut signature: Option<Vec<u8>> = None;
    let mut author = None;
    let mut committed_at = None;
    let mut saw_tree = false;
    let mut defect = None;

    // 0 = copying, 1 = inside wanted signature, 2 = inside other signature
    let mut in_signature = 0_u8;
    let mut in_headers = true;
    let mut rest = raw;

    while !rest.is_empty() {
        let end = rest.iter().position(|&b| b == b'\n').map_or(rest.len(), |i| i + 1);
        let (line, tail) = rest.split_at(end);
        rest = tail;

        if !in_headers {
            payload.extend_from_slice(line);
            continue;
        }
        let content = line.strip_suffix(b"\n").unwrap_or(line);

        if in_signature != 0 && content.first() == Some(&b' ') {
            if in_signature == 1
                && let Some(sig) = signature.as_mut()
            {
                sig.extend_from_slice(&content[1..]);
                sig.push(b'\n');
            }
            continue;
        }
        in_signature = 0;

        if content.is_empty() {
            in_headers = false;
            payload.extend_from_slice(line);
            continue;
        }

        let (name, value) = split_header(content);
        if name == wanted {
            if signature.is_some() {
                defect.get_or_insert_with(|| "duplicate signature header".to_string());
                in_signature = 2;
                continue;
            }
            let mut sig = value.to_vec();
            sig.push(b'\n');
            signature = Some(sig);
            in_signature = 1;
            continue;
        }
        if name == SIG_HEADER_SHA1 || name == SIG_HEADER_SHA256 {
            in_signature = 2;
            continue;
        }

        match name {
            b"tree" => saw_tree = true,
            b"author" => author = Some(identity(value)),
            b"committer" => committed_at = timestamp(value),
            _ => {}
        }
        payload.extend_from_slice(line);
    }

    if !saw_tree {
        defect.get_or_insert_with(|| "missing tree header".to_string());
    }

    CommitRecord {
        sha: sha.to_string(),
        author: author.unwrap_or_default(),
        committed_at,
        signature,
        payload,
        defect,
    }
}

fn split_header(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, &[]),
    }
}

/// `Name <email> 1700000000 +0000` -> `Name <email>`
fn identity(value: &[u8]) -> String {
    let text = String::from_utf8_lossy(value);
    text.rfind('>')
        .map_or_else(|| text.trim().to_string(), |i| text[..=i].to_string())
}

fn timestamp(value: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(value).ok()?;
    let after_email = &text[text.rfind('>')? + 1..];
    let epoch = after_email.split_whitespace().next()?.parse::<i64>().ok()?;
    DateTime::from_timestamp(epoch, 0)
}
