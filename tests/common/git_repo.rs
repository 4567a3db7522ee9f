//! Throwaway git repositories with hand-written commit objects

#![allow(dead_code)]

use crate::common::keys::{TestSigner, commit_payload};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Identity env for git invocations in tests
pub const GIT_IDENTITY: [(&str, &str); 4] = [
    ("GIT_AUTHOR_NAME", "Dev"),
    ("GIT_AUTHOR_EMAIL", "dev@example.com"),
    ("GIT_COMMITTER_NAME", "Dev"),
    ("GIT_COMMITTER_EMAIL", "dev@example.com"),
];

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// A bare-bones repository where every commit is written with `hash-object`
pub struct TempGitRepo {
    dir: TempDir,
    clock: i64,
}

impl TempGitRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Self {
            dir,
            clock: 1_700_000_000,
        };
        repo.git(&["init", "--quiet"], None);
        let tree = repo.git(&["mktree"], Some(b""));
        assert_eq!(tree, EMPTY_TREE);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run git and return trimmed stdout, panicking on failure
    pub fn git(&self, args: &[&str], stdin: Option<&[u8]>) -> String {
        let mut child = Command::new("git")
            .arg("-C")
            .arg(self.dir.path())
            .args(args)
            .envs(GIT_IDENTITY)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        if let Some(input) = stdin {
            child.stdin.take().unwrap().write_all(input).unwrap();
        }
        drop(child.stdin.take());
        let output = child.wait_with_output().unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    fn write_object(&self, object: &[u8]) -> String {
        self.git(&["hash-object", "-t", "commit", "-w", "--stdin"], Some(object))
    }

    fn next_payload(&mut self, parents: &[&str], message: &str) -> Vec<u8> {
        self.clock += 60;
        commit_payload(parents, "Dev <dev@example.com>", self.clock, message)
    }

    pub fn unsigned_commit(&mut self, parents: &[&str], message: &str) -> String {
        let payload = self.next_payload(parents, message);
        self.write_object(&payload)
    }

    /// Write a commit carrying a `gpgsig` header made by `signer`
    pub fn signed_commit(&mut self, parents: &[&str], message: &str, signer: &TestSigner) -> String {
        let payload = self.next_payload(parents, message);
        let signature = signer.sign(&payload);
        self.write_object(&with_signature_header(&payload, &signature))
    }

    /// Write a commit with two `gpgsig` headers, bypassing git's object checks
    pub fn doubly_signed_commit(&mut self, parents: &[&str], message: &str, signer: &TestSigner) -> String {
        let payload = self.next_payload(parents, message);
        let signature = signer.sign(&payload);
        let once = with_signature_header(&payload, &signature);
        let twice = with_signature_header(&once, &signature);
        self.git(
            &["hash-object", "-t", "commit", "-w", "--stdin", "--literally"],
            Some(&twice),
        )
    }

    pub fn set_branch(&self, name: &str, sha: &str) {
        self.git(&["update-ref", &format!("refs/heads/{name}"), sha], None);
    }

    pub fn branch(&self, name: &str) -> String {
        self.git(&["rev-parse", &format!("refs/heads/{name}")], None)
    }

    pub fn parents(&self, sha: &str) -> Vec<String> {
        self.git(&["rev-list", "--parents", "-n", "1", sha], None)
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect()
    }
}

/// Insert `gpgsig` after the committer header, continuation lines space-prefixed
pub fn with_signature_header(payload: &[u8], signature: &[u8]) -> Vec<u8> {
    let text = std::str::from_utf8(payload).unwrap();
    let signature = std::str::from_utf8(signature).unwrap();
    let (headers, body) = text.split_once("\n\n").unwrap();

    let mut header = String::from("gpgsig");
    for (i, line) in signature.trim_end().lines().enumerate() {
        header.push_str(if i == 0 { " " } else { "\n " });
        header.push_str(line);
    }
    format!("{headers}\n{header}\n\n{body}").into_bytes()
}
