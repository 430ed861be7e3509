//! Detached SHA256withRSA signature verification for feed documents.
//!
//! Feeds are signed with a single release key whose public half is compiled
//! into the binary. There is no key rotation.

use crate::utils::errors::{Result, UpdateError};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;

/// Release public key (SubjectPublicKeyInfo, PEM).
pub const RELEASE_PUBLIC_KEY_PEM: &str = include_str!("../keys/release_public_key.pem");

/// The only signature scheme feeds are published with.
pub const SIGNATURE_ALGORITHM: &str = "SHA256withRSA";

/// Verifies feed bytes against detached signatures with one fixed key.
#[derive(Clone, Debug)]
pub struct FeedVerifier {
    key: RsaPublicKey,
}

impl FeedVerifier {
    /// Verifier for the embedded release key.
    pub fn embedded() -> Result<Self> {
        Self::from_public_key_pem(RELEASE_PUBLIC_KEY_PEM)
    }

    pub fn from_public_key_pem(pem: &str) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| UpdateError::Config(format!("invalid feed public key: {e}")))?;
        Ok(Self { key: public_key })
    }

    /// `true` only when `signature` is a valid signature of `payload`.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(self.key.clone())
            .verify(payload, &signature)
            .is_ok()
    }
}

/// One-shot verification with a PEM-encoded public key.
///
/// Any malformed key, signature or unsupported algorithm yields `false`.
pub fn verify(payload: &[u8], signature: &[u8], public_key_pem: &str, algorithm: &str) -> bool {
    if algorithm != SIGNATURE_ALGORITHM {
        return false;
    }
    FeedVerifier::from_public_key_pem(public_key_pem)
        .map(|verifier| verifier.verify(payload, signature))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod test_keys {
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::sha2::Sha256;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;

    pub const SIGNING_KEY_PEM: &str = include_str!("../tests/fixtures/test_signing_key.pem");
    pub const VERIFYING_KEY_PEM: &str = include_str!("../tests/fixtures/test_verifying_key.pem");

    pub fn sign(payload: &[u8]) -> Vec<u8> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(SIGNING_KEY_PEM).unwrap();
        SigningKey::<Sha256>::new(private_key).sign(payload).to_vec()
    }

    pub fn verifier() -> super::FeedVerifier {
        super::FeedVerifier::from_public_key_pem(VERIFYING_KEY_PEM).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_keys::{sign, verifier, VERIFYING_KEY_PEM};
    use super::*;

    #[test]
    fn test_valid_signature() {
        let payload = b"<main_feed><min_revision>42</min_revision></main_feed>";
        let signature = sign(payload);
        assert!(verifier().verify(payload, &signature));
        assert!(verify(payload, &signature, VERIFYING_KEY_PEM, SIGNATURE_ALGORITHM));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signature = sign(b"original");
        assert!(!verifier().verify(b"tampered", &signature));
    }

    #[test]
    fn test_garbage_inputs_yield_false() {
        let payload = b"payload";
        assert!(!verifier().verify(payload, b""));
        assert!(!verifier().verify(payload, &[0u8; 7]));
        assert!(!verify(payload, &sign(payload), "not a key", SIGNATURE_ALGORITHM));
        assert!(!verify(payload, &sign(payload), VERIFYING_KEY_PEM, "SHA1withRSA"));
    }

    #[test]
    fn test_embedded_key_rejects_foreign_signature() {
        let payload = b"signed by the test key";
        let verifier = FeedVerifier::embedded().unwrap();
        assert!(!verifier.verify(payload, &sign(payload)));
    }
}
