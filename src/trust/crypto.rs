//! Cryptographic utilities for skyguard.
//!
//! Provides Ed25519 signing/verification, SHA3-256 hashing, HMAC-SHA3-256
//! tags and the canonical encoding used for everything that gets signed.

use crate::core::{Error, Hash256, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha3::{Digest, Sha3_256};

type HmacSha3 = Hmac<Sha3_256>;

/// Generate a fresh Ed25519 signing key from the OS RNG.
pub fn generate_signing_key() -> SigningKey {
    use rand::RngCore;
    let mut csprng = rand::rngs::OsRng;
    let mut secret_key_bytes = [0u8; 32];
    csprng.fill_bytes(&mut secret_key_bytes);
    let signing_key = SigningKey::from_bytes(&secret_key_bytes);
    zeroize::Zeroize::zeroize(&mut secret_key_bytes);
    signing_key
}

/// Sign a message with a signing key.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let signature = signing_key.sign(message);
    signature.to_bytes().to_vec()
}

/// Verify a signature with a public key.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<()> {
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| Error::InvalidKeyFormat("Invalid signature length".into()))?;
    let sig = Signature::from_bytes(&sig_bytes);
    public_key.verify_strict(message, &sig)?;
    Ok(())
}

/// Canonical byte encoding of a structured value.
///
/// The value is first lowered to a `serde_json::Value`, whose object maps
/// are key-ordered, so two equal values always encode to identical bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Compute SHA3-256 hash of data.
pub fn sha3_256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash256::new(bytes)
}

/// Compute SHA3-256 hash of multiple data chunks.
pub fn sha3_256_multi(chunks: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash256::new(bytes)
}

/// Compute an HMAC-SHA3-256 tag over multiple data chunks.
pub fn hmac_sha3(key: &[u8], chunks: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha3 as Mac>::new_from_slice(key)
        .map_err(|e| Error::InvalidKeyFormat(e.to_string()))?;
    for chunk in chunks {
        mac.update(chunk);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify an HMAC-SHA3-256 tag in constant time.
pub fn verify_hmac_sha3(key: &[u8], chunks: &[&[u8]], tag: &[u8]) -> Result<()> {
    let mut mac = <HmacSha3 as Mac>::new_from_slice(key)
        .map_err(|e| Error::InvalidKeyFormat(e.to_string()))?;
    for chunk in chunks {
        mac.update(chunk);
    }
    mac.verify_slice(tag)
        .map_err(|_| Error::IntegrityFailure("tag mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sign_and_verify() {
        let key = generate_signing_key();
        let message = b"Hello, skyguard!";
        let signature = sign(&key, message);
        assert!(verify(&key.verifying_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_verify_wrong_message() {
        let key = generate_signing_key();
        let signature = sign(&key, b"Hello, skyguard!");
        assert!(verify(&key.verifying_key(), b"Wrong message", &signature).is_err());
    }

    #[test]
    fn test_verify_wrong_key() {
        let key = generate_signing_key();
        let other = generate_signing_key();
        let signature = sign(&key, b"payload");
        assert!(verify(&other.verifying_key(), b"payload", &signature).is_err());
    }

    #[test]
    fn test_verify_short_signature() {
        let key = generate_signing_key();
        let result = verify(&key.verifying_key(), b"payload", &[0u8; 10]);
        assert!(matches!(result, Err(Error::InvalidKeyFormat(_))));
    }

    #[test]
    fn test_canonical_bytes_ignore_insertion_order() {
        let mut a = HashMap::new();
        a.insert("zeta", 1);
        a.insert("alpha", 2);
        let mut b = HashMap::new();
        b.insert("alpha", 2);
        b.insert("zeta", 1);
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
        assert_eq!(canonical_bytes(&a).unwrap(), br#"{"alpha":2,"zeta":1}"#.to_vec());
    }

    #[test]
    fn test_sha3_256_different_data() {
        let hash1 = sha3_256(b"data1");
        let hash2 = sha3_256(b"data2");
        assert_ne!(hash1, hash2);
        assert_eq!(sha3_256(b"data1"), hash1);
    }

    #[test]
    fn test_sha3_256_multi_matches_concatenation() {
        let chunks: &[&[u8]] = &[b"chunk1", b"chunk2"];
        assert_eq!(sha3_256_multi(chunks), sha3_256(b"chunk1chunk2"));
    }

    #[test]
    fn test_hmac_roundtrip_and_mismatch() {
        let key = [7u8; 32];
        let tag = hmac_sha3(&key, &[b"a", b"b"]).unwrap();
        assert_eq!(tag.len(), 32);
        assert!(verify_hmac_sha3(&key, &[b"a", b"b"], &tag).is_ok());
        assert!(matches!(
            verify_hmac_sha3(&key, &[b"a", b"c"], &tag),
            Err(Error::IntegrityFailure(_))
        ));
        assert!(verify_hmac_sha3(&[8u8; 32], &[b"a", b"b"], &tag).is_err());
    }
}
