//! Per-participant key material.
//!
//! Every participant holds two key pairs: an Ed25519 pair for signatures
//! and an X25519 pair for key encapsulation.

use crate::core::{now, Error, Result, Timestamp};
use crate::trust::crypto::{generate_signing_key, sha3_256};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as ExchangePublicKey, StaticSecret};

/// Public half of a participant's key material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// Owner identity
    pub owner: String,
    /// Ed25519 verifying key bytes
    pub verifying_key: [u8; 32],
    /// X25519 public key bytes
    pub exchange_key: [u8; 32],
    /// Issuance timestamp
    pub issued: Timestamp,
    /// Issuance version (incremented on re-issue)
    pub version: u32,
}

impl PublicIdentity {
    /// Get the verifying key for signature verification.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.verifying_key)
            .map_err(|e| Error::InvalidKeyFormat(e.to_string()))
    }

    /// Short hex fingerprint over both public keys.
    pub fn fingerprint(&self) -> String {
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(&self.verifying_key);
        material.extend_from_slice(&self.exchange_key);
        sha3_256(&material).to_hex()[..16].to_string()
    }
}

/// Full key pair for one participant. Private halves never leave the
/// authority that issued them.
pub struct KeyPair {
    owner: String,
    signing: SigningKey,
    exchange: StaticSecret,
    public: PublicIdentity,
}

impl KeyPair {
    /// Generate fresh key material for `owner`.
    pub fn generate(owner: &str, version: u32) -> Self {
        let signing = generate_signing_key();
        let exchange = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicIdentity {
            owner: owner.to_string(),
            verifying_key: signing.verifying_key().to_bytes(),
            exchange_key: ExchangePublicKey::from(&exchange).to_bytes(),
            issued: now(),
            version,
        };
        Self {
            owner: owner.to_string(),
            signing,
            exchange,
            public,
        }
    }

    /// Owner identity.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Public half.
    pub fn public(&self) -> &PublicIdentity {
        &self.public
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("owner", &self.owner)
            .field("fingerprint", &self.public.fingerprint())
            .field("private", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct_keys() {
        let a = KeyPair::generate("NASA", 1);
        let b = KeyPair::generate("NASA", 1);
        assert_eq!(a.owner(), "NASA");
        assert_ne!(a.public().verifying_key, b.public().verifying_key);
        assert_ne!(a.public().exchange_key, b.public().exchange_key);
    }

    #[test]
    fn test_public_matches_private() {
        let pair = KeyPair::generate("NOAA", 1);
        assert_eq!(
            pair.signing_key().verifying_key().to_bytes(),
            pair.public().verifying_key
        );
        assert_eq!(
            ExchangePublicKey::from(pair.exchange_secret()).to_bytes(),
            pair.public().exchange_key
        );
        assert!(pair.public().verifying_key().is_ok());
    }

    #[test]
    fn test_debug_redacts_private_material() {
        let pair = KeyPair::generate("USGS", 1);
        let rendered = format!("{:?}", pair);
        assert!(rendered.contains("<redacted>"));
        assert_eq!(pair.public().fingerprint().len(), 16);
    }
}
