//! Credential proof primitives for the two device slots.
//!
//! PINs and passwords are stored as salted argon2 PHC strings. Fingerprint
//! proofs are RSA pkcs1v15 signatures over the server-issued challenge,
//! verified against the public key pinned at registration. Verification never
//! reveals which part of a proof failed.

use anyhow::{Result, anyhow};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier;

/// Hash a PIN or password into a salted argon2 PHC string for storage.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("failed to hash secret: {e}"))
}

/// Verify a PIN or password against a stored PHC string.
/// An unparseable hash counts as a mismatch, never as an error.
#[must_use]
pub fn secret_hash_matches(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

/// Parse a PEM-encoded RSA public key (SubjectPublicKeyInfo or PKCS#1).
fn parse_public_key(pem: &str) -> Option<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .ok()
}

/// Whether the PEM is a key this service can pin and verify against.
#[must_use]
pub fn public_key_is_valid(pem: &str) -> bool {
    parse_public_key(pem).is_some()
}

/// Verify an RSA-SHA256 pkcs1v15 signature over `message`.
///
/// The signature is Base64 (standard alphabet) as produced by mobile keystore
/// APIs. Any parse failure is a plain mismatch.
#[must_use]
pub fn signature_matches(public_key_pem: &str, message: &str, signature_b64: &str) -> bool {
    let Some(public_key) = parse_public_key(public_key_pem) else {
        return false;
    };
    let Ok(signature_bytes) = STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(public_key)
        .verify(message.as_bytes(), &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::signature::{SignatureEncoding, Signer};

    fn keypair() -> (SigningKey<Sha256>, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
        let pem = private_key
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .expect("pem");
        (SigningKey::new(private_key), pem)
    }

    #[test]
    fn secret_hash_round_trips() {
        let hash = hash_secret("1234").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(secret_hash_matches("1234", &hash));
        assert!(!secret_hash_matches("4321", &hash));
    }

    #[test]
    fn two_hashes_of_same_secret_differ() {
        let first = hash_secret("1234").expect("hash");
        let second = hash_secret("1234").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn garbage_stored_hash_is_a_mismatch() {
        assert!(!secret_hash_matches("1234", "not-a-phc-string"));
    }

    #[test]
    fn signature_verifies_against_pinned_key() {
        let (signing_key, pem) = keypair();
        assert!(public_key_is_valid(&pem));

        let challenge = "c2VydmVyLWNoYWxsZW5nZQ";
        let signature = STANDARD.encode(signing_key.sign(challenge.as_bytes()).to_bytes());
        assert!(signature_matches(&pem, challenge, &signature));
    }

    #[test]
    fn signature_over_other_message_fails() {
        let (signing_key, pem) = keypair();
        let signature = STANDARD.encode(signing_key.sign(b"challenge-a").to_bytes());
        assert!(!signature_matches(&pem, "challenge-b", &signature));
    }

    #[test]
    fn signature_from_other_key_fails() {
        let (signing_key, _) = keypair();
        let (_, other_pem) = keypair();
        let signature = STANDARD.encode(signing_key.sign(b"challenge").to_bytes());
        assert!(!signature_matches(&other_pem, "challenge", &signature));
    }

    #[test]
    fn malformed_inputs_are_mismatches() {
        let (_, pem) = keypair();
        assert!(!signature_matches(&pem, "challenge", "@@not-base64@@"));
        assert!(!signature_matches("not a pem", "challenge", ""));
        assert!(!public_key_is_valid("-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----\n"));
    }
}
