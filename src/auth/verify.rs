//! Per-commit SSH signature verification
//!
//! Every path that is not a clean cryptographic pass yields a non-verified
//! outcome. Nothing here returns an error or panics on commit content.

use super::registry::SignerRegistry;
use crate::types::{AllowedSigner, CommitRecord, KeyType, VerificationOutcome, VerificationResult};
use ssh_key::{HashAlg, PublicKey, SshSig};
use std::sync::Arc;

/// Knobs for [`verify_commit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Only accept signers of this key type
    pub required_key_type: Option<KeyType>,
    /// SSH signature namespace commits must be signed in
    pub namespace: String,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            required_key_type: None,
            namespace: "git".to_string(),
        }
    }
}

fn result(
    commit: &Arc<CommitRecord>,
    outcome: VerificationOutcome,
    signer: Option<&Arc<AllowedSigner>>,
    detail: Option<String>,
) -> VerificationResult {
    VerificationResult {
        commit: Arc::clone(commit),
        outcome,
        matched_signer: signer.cloned(),
        detail,
    }
}

fn usable(signer: &AllowedSigner, commit: &CommitRecord, options: &VerifyOptions) -> bool {
    if signer.cert_authority || !signer.allows_namespace(&options.namespace) {
        return false;
    }
    if signer.key_type == KeyType::Unknown && options.required_key_type != Some(KeyType::Unknown) {
        return false;
    }
    match commit.committed_at {
        Some(at) => signer.valid_at(at),
        // no timestamp, so only unbounded entries apply
        None => signer.valid_after.is_none() && signer.valid_before.is_none(),
    }
}

/// Verify one commit against the registry
pub fn verify_commit(
    commit: &Arc<CommitRecord>,
    registry: &SignerRegistry,
    options: &VerifyOptions,
) -> VerificationResult {
    use VerificationOutcome::{KeyTypeRejected, MalformedSignature, UnknownSigner, Unsigned, Verified};

    if let Some(defect) = &commit.defect {
        return result(
            commit,
            MalformedSignature,
            None,
            Some(format!("malformed commit object: {defect}")),
        );
    }
    let Some(blob) = commit.signature.as_deref() else {
        return result(commit, Unsigned, None, None);
    };

    let Ok(armored) = std::str::from_utf8(blob) else {
        return result(
            commit,
            MalformedSignature,
            None,
            Some("signature is not valid UTF-8".to_string()),
        );
    };
    if armored.contains("BEGIN PGP SIGNATURE") {
        return result(
            commit,
            MalformedSignature,
            None,
            Some("OpenPGP signatures are not accepted".to_string()),
        );
    }
    let sig = match SshSig::from_pem(armored.trim()) {
        Ok(sig) => sig,
        Err(e) => {
            return result(
                commit,
                MalformedSignature,
                None,
                Some(format!("cannot parse SSH signature: {e}")),
            );
        }
    };

    let fingerprint = sig.public_key().fingerprint(HashAlg::Sha256).to_string();
    let mut candidates = registry.candidates(&fingerprint).peekable();
    if candidates.peek().is_none() {
        return result(
            commit,
            UnknownSigner,
            None,
            Some(format!("key {fingerprint} is not an allowed signer")),
        );
    }
    let Some(signer) = candidates.find(|s| usable(s, commit, options)) else {
        return result(
            commit,
            UnknownSigner,
            None,
            Some(format!(
                "key {fingerprint} is listed but not valid for this commit"
            )),
        );
    };

    if let Some(required) = options.required_key_type
        && signer.key_type != required
    {
        return result(
            commit,
            KeyTypeRejected,
            Some(signer),
            Some(format!("signed with {}, {required} required", signer.key_type)),
        );
    }

    if sig.namespace() != options.namespace {
        return result(
            commit,
            MalformedSignature,
            Some(signer),
            Some(format!(
                "signature namespace '{}' is not '{}'",
                sig.namespace(),
                options.namespace
            )),
        );
    }

    let verified = PublicKey::from_bytes(&signer.public_key)
        .and_then(|key| key.verify(&options.namespace, &commit.payload, &sig));
    match verified {
        Ok(()) => result(commit, Verified, Some(signer), None),
        Err(e) => result(
            commit,
            MalformedSignature,
            Some(signer),
            Some(format!("signature does not verify: {e}")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(signature: Option<&[u8]>) -> Arc<CommitRecord> {
        Arc::new(CommitRecord {
            sha: "a".repeat(40),
            author: "Mallory <m@example.com>".to_string(),
            committed_at: None,
            signature: signature.map(<[u8]>::to_vec),
            payload: b"tree x\n\nmsg\n".to_vec(),
            defect: None,
        })
    }

    #[test]
    fn missing_signature_is_unsigned() {
        let result = verify_commit(&commit(None), &SignerRegistry::default(), &VerifyOptions::default());
        assert_eq!(result.outcome, VerificationOutcome::Unsigned);
        assert!(result.matched_signer.is_none());
    }

    #[test]
    fn defective_object_is_malformed_before_anything_else() {
        let mut record = (*commit(None)).clone();
        record.defect = Some("duplicate signature header".to_string());
        let result = verify_commit(&Arc::new(record), &SignerRegistry::default(), &VerifyOptions::default());
        assert_eq!(result.outcome, VerificationOutcome::MalformedSignature);
        assert!(result.detail.unwrap().contains("duplicate signature header"));
    }

    #[test]
    fn hostile_envelopes_are_malformed() {
        let registry = SignerRegistry::default();
        let options = VerifyOptions::default();
        let inputs: [&[u8]; 4] = [
            b"\xff\xfe\x00",
            b"-----BEGIN PGP SIGNATURE-----\n\niQEz\n-----END PGP SIGNATURE-----\n",
            b"-----BEGIN SSH SIGNATURE-----\nnot base64 at all\n-----END SSH SIGNATURE-----\n",
            b"-----BEGIN SSH SIGNATURE-----\nU1NIU0lH\n-----END SSH SIGNATURE-----\n",
        ];
        for input in inputs {
            let result = verify_commit(&commit(Some(input)), &registry, &options);
            assert_eq!(result.outcome, VerificationOutcome::MalformedSignature);
            assert!(result.detail.is_some());
        }
    }
}
