//! Key material and commit builders for tests
//!
//! Ed25519 keys are derived from fixed seeds and sign in-process, so tests
//! need neither `ssh-keygen` nor network access.

#![allow(dead_code)]

use sigmerge::types::CommitRecord;
use ssh_key::private::{Ed25519Keypair, KeypairData};
use ssh_key::public::{KeyData, RsaPublicKey};
use ssh_key::{Algorithm, HashAlg, LineEnding, Mpint, PrivateKey, PublicKey, Signature, SshSig};

/// A deterministic ed25519 signer
pub struct TestSigner {
    key: PrivateKey,
}

impl TestSigner {
    pub fn ed25519(seed: u8) -> Self {
        let keypair = Ed25519Keypair::from_seed(&[seed; 32]);
        let key = PrivateKey::new(KeypairData::from(keypair), format!("seed-{seed}")).unwrap();
        Self { key }
    }

    /// `ssh-ed25519 AAAA... comment`
    pub fn public_openssh(&self) -> String {
        self.key.public_key().to_openssh().unwrap()
    }

    /// An allowed-signers line for this key
    pub fn policy_line(&self, principal: &str) -> String {
        format!("{principal} {}", self.public_openssh())
    }

    /// An allowed-signers line with an options field
    pub fn policy_line_with(&self, principal: &str, options: &str) -> String {
        format!("{principal} {options} {}", self.public_openssh())
    }

    /// Armored SSH signature over `payload` in the `git` namespace
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.sign_in("git", payload)
    }

    pub fn sign_in(&self, namespace: &str, payload: &[u8]) -> Vec<u8> {
        self.key
            .sign(namespace, HashAlg::Sha512, payload)
            .unwrap()
            .to_pem(LineEnding::LF)
            .unwrap()
            .into_bytes()
    }
}

/// A syntactically valid RSA public key (2048-bit modulus, not a real key)
pub fn fake_rsa_key() -> KeyData {
    KeyData::Rsa(RsaPublicKey {
        e: Mpint::from_positive_bytes(&[0x01, 0x00, 0x01]).unwrap(),
        n: Mpint::from_positive_bytes(&[0xc5; 256]).unwrap(),
    })
}

/// Allowed-signers line for [`fake_rsa_key`]
pub fn fake_rsa_policy_line(principal: &str) -> String {
    let line = PublicKey::new(fake_rsa_key(), "rsa").to_openssh().unwrap();
    format!("{principal} {line}")
}

/// Well-formed SSH signature envelope claiming to come from [`fake_rsa_key`]
///
/// The signature bytes are garbage; anything that checks the math rejects it.
pub fn fake_rsa_signature() -> Vec<u8> {
    let signature = Signature::new(
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        vec![0x42; 256],
    )
    .unwrap();
    SshSig::new(fake_rsa_key(), "git", HashAlg::Sha512, signature)
        .unwrap()
        .to_pem(LineEnding::LF)
        .unwrap()
        .into_bytes()
}

/// 40-hex sha from a small number
pub fn sha(n: u32) -> String {
    format!("{n:040x}")
}

/// Raw commit object text the way git lays it out
pub fn commit_payload(parents: &[&str], author: &str, time: i64, message: &str) -> Vec<u8> {
    let mut text = String::from("tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n");
    for parent in parents {
        text.push_str(&format!("parent {parent}\n"));
    }
    text.push_str(&format!("author {author} {time} +0000\n"));
    text.push_str(&format!("committer {author} {time} +0000\n"));
    text.push('\n');
    text.push_str(message);
    text.push('\n');
    text.into_bytes()
}

/// An unsigned commit record
pub fn unsigned_commit(n: u32, parents: &[&str]) -> CommitRecord {
    let author = "Dev <dev@example.com>";
    CommitRecord {
        sha: sha(n),
        author: author.to_string(),
        committed_at: chrono::DateTime::from_timestamp(1_700_000_000 + i64::from(n), 0),
        signature: None,
        payload: commit_payload(parents, author, 1_700_000_000 + i64::from(n), &format!("commit {n}")),
        defect: None,
    }
}

/// A commit record signed by `signer`
pub fn signed_commit(n: u32, parents: &[&str], signer: &TestSigner) -> CommitRecord {
    let mut record = unsigned_commit(n, parents);
    record.signature = Some(signer.sign(&record.payload));
    record
}

/// A commit record carrying an arbitrary signature blob
pub fn commit_with_signature(n: u32, parents: &[&str], signature: Vec<u8>) -> CommitRecord {
    let mut record = unsigned_commit(n, parents);
    record.signature = Some(signature);
    record
}
