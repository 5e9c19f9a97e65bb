//! Trust authority issuing and validating per-participant key material.
//!
//! The authority keeps custody of every private key: callers sign and
//! decapsulate through it and only ever see [`PublicIdentity`] values.

use crate::core::{Error, Result};
use crate::envelope::kem::{self, SharedSecret};
use crate::trust::crypto::{canonical_bytes, sign, verify};
use crate::trust::keys::{KeyPair, PublicIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// What to do when an identity registers twice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationPolicy {
    /// Fail with `AlreadyRegistered`
    #[default]
    Reject,
    /// Replace the key material and bump the version
    Reissue,
}

/// Storage for issued key material.
///
/// Implementations must make `issue` a single atomic check-and-insert.
pub trait KeyStore: Send + Sync {
    /// Issue fresh key material for `identity` under `policy`.
    fn issue(&self, identity: &str, policy: RegistrationPolicy) -> Result<Arc<KeyPair>>;

    /// Look up key material.
    fn get(&self, identity: &str) -> Result<Option<Arc<KeyPair>>>;

    /// All registered identities, sorted.
    fn identities(&self) -> Result<Vec<String>>;
}

/// In-process key store.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, Arc<KeyPair>>>,
}

impl InMemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn issue(&self, identity: &str, policy: RegistrationPolicy) -> Result<Arc<KeyPair>> {
        let mut keys = self.keys.write()?;
        let version = match (keys.get(identity), policy) {
            (Some(_), RegistrationPolicy::Reject) => {
                return Err(Error::AlreadyRegistered(identity.to_string()))
            }
            (Some(existing), RegistrationPolicy::Reissue) => existing.public().version + 1,
            (None, _) => 1,
        };
        let pair = Arc::new(KeyPair::generate(identity, version));
        keys.insert(identity.to_string(), pair.clone());
        Ok(pair)
    }

    fn get(&self, identity: &str) -> Result<Option<Arc<KeyPair>>> {
        Ok(self.keys.read()?.get(identity).cloned())
    }

    fn identities(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.keys.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Issues key pairs and performs every private-key operation.
pub struct TrustAuthority {
    store: Arc<dyn KeyStore>,
    policy: RegistrationPolicy,
}

impl TrustAuthority {
    /// Create an authority over an in-memory store.
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self::with_store(Arc::new(InMemoryKeyStore::new()), policy)
    }

    /// Create an authority over an injected store.
    pub fn with_store(store: Arc<dyn KeyStore>, policy: RegistrationPolicy) -> Self {
        Self { store, policy }
    }

    /// Registration policy in force.
    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Issue key material for `identity` and return its public half.
    pub fn register(&self, identity: &str) -> Result<PublicIdentity> {
        let pair = self.store.issue(identity, self.policy)?;
        let public = pair.public().clone();
        info!(
            identity,
            version = public.version,
            fingerprint = %public.fingerprint(),
            "Registered identity"
        );
        Ok(public)
    }

    /// Return the existing public identity, issuing key material only if
    /// `identity` has none. Never re-issues, whatever the policy.
    pub fn ensure_registered(&self, identity: &str) -> Result<PublicIdentity> {
        if let Some(pair) = self.store.get(identity)? {
            return Ok(pair.public().clone());
        }
        match self.store.issue(identity, RegistrationPolicy::Reject) {
            Ok(pair) => {
                let public = pair.public().clone();
                info!(
                    identity,
                    version = public.version,
                    fingerprint = %public.fingerprint(),
                    "Registered identity"
                );
                Ok(public)
            }
            // Lost a race with a concurrent registration.
            Err(Error::AlreadyRegistered(_)) => self.public_identity(identity),
            Err(err) => Err(err),
        }
    }

    /// Whether `identity` holds key material.
    pub fn is_registered(&self, identity: &str) -> bool {
        matches!(self.store.get(identity), Ok(Some(_)))
    }

    /// All registered identities, sorted.
    pub fn identities(&self) -> Result<Vec<String>> {
        self.store.identities()
    }

    /// Public key material for `identity`.
    pub fn public_identity(&self, identity: &str) -> Result<PublicIdentity> {
        Ok(self.key_pair(identity)?.public().clone())
    }

    /// Sign the canonical encoding of a structured message.
    pub fn sign<T: Serialize + ?Sized>(&self, identity: &str, message: &T) -> Result<Vec<u8>> {
        let bytes = canonical_bytes(message)?;
        self.sign_bytes(identity, &bytes)
    }

    /// Sign raw bytes.
    pub fn sign_bytes(&self, identity: &str, message: &[u8]) -> Result<Vec<u8>> {
        let pair = self.key_pair(identity)?;
        Ok(sign(pair.signing_key(), message))
    }

    /// Verify a signature over the canonical encoding of a structured message.
    ///
    /// Fails closed: unknown identities and unencodable messages yield `false`.
    pub fn verify<T: Serialize + ?Sized>(
        &self,
        identity: &str,
        message: &T,
        signature: &[u8],
    ) -> bool {
        match canonical_bytes(message) {
            Ok(bytes) => self.verify_bytes(identity, &bytes, signature),
            Err(_) => false,
        }
    }

    /// Verify a signature over raw bytes. Fails closed.
    pub fn verify_bytes(&self, identity: &str, message: &[u8], signature: &[u8]) -> bool {
        let pair = match self.store.get(identity) {
            Ok(Some(pair)) => pair,
            _ => {
                debug!(identity, "Verification against unknown identity");
                return false;
            }
        };
        verify(&pair.signing_key().verifying_key(), message, signature).is_ok()
    }

    /// Recover the shared secret from a capsule addressed to `identity`.
    pub fn decapsulate(&self, identity: &str, capsule: &[u8]) -> Result<SharedSecret> {
        let pair = self.key_pair(identity)?;
        kem::decapsulate(pair.exchange_secret(), &pair.public().exchange_key, capsule)
    }

    fn key_pair(&self, identity: &str) -> Result<Arc<KeyPair>> {
        self.store
            .get(identity)?
            .ok_or_else(|| Error::UnknownIdentity(identity.to_string()))
    }
}

impl Default for TrustAuthority {
    fn default() -> Self {
        Self::new(RegistrationPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_lookup() {
        let authority = TrustAuthority::default();
        let public = authority.register("NASA").unwrap();
        assert_eq!(public.owner, "NASA");
        assert_eq!(public.version, 1);
        assert!(authority.is_registered("NASA"));
        assert!(!authority.is_registered("NOAA"));
        assert_eq!(authority.public_identity("NASA").unwrap(), public);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let authority = TrustAuthority::new(RegistrationPolicy::Reject);
        authority.register("NOAA").unwrap();
        let result = authority.register("NOAA");
        assert!(matches!(result, Err(Error::AlreadyRegistered(id)) if id == "NOAA"));
    }

    #[test]
    fn test_reissue_overwrites_and_bumps_version() {
        let authority = TrustAuthority::new(RegistrationPolicy::Reissue);
        let first = authority.register("USGS").unwrap();
        let old_sig = authority.sign("USGS", &json!({"v": 1})).unwrap();
        let second = authority.register("USGS").unwrap();

        assert_eq!(second.version, 2);
        assert_ne!(first.verifying_key, second.verifying_key);
        // Signatures from the superseded key no longer verify.
        assert!(!authority.verify("USGS", &json!({"v": 1}), &old_sig));
    }

    #[test]
    fn test_sign_unknown_identity() {
        let authority = TrustAuthority::default();
        let result = authority.sign("ghost", &json!({"a": 1}));
        assert!(matches!(result, Err(Error::UnknownIdentity(_))));
    }

    #[test]
    fn test_verify_structured_message() {
        let authority = TrustAuthority::default();
        authority.register("NASA").unwrap();
        let msg = json!({"temperature": 37.2, "risk": "heat"});
        let sig = authority.sign("NASA", &msg).unwrap();

        assert!(authority.verify("NASA", &msg, &sig));
        assert!(!authority.verify("NASA", &json!({"temperature": 37.3, "risk": "heat"}), &sig));
    }

    #[test]
    fn test_verify_only_against_correct_key() {
        let authority = TrustAuthority::default();
        authority.register("NASA").unwrap();
        authority.register("NOAA").unwrap();
        let sig = authority.sign_bytes("NASA", b"telemetry").unwrap();

        assert!(authority.verify_bytes("NASA", b"telemetry", &sig));
        assert!(!authority.verify_bytes("NOAA", b"telemetry", &sig));
    }

    #[test]
    fn test_verify_fails_closed_for_unknown_identity() {
        let authority = TrustAuthority::default();
        assert!(!authority.verify_bytes("ghost", b"x", &[0u8; 64]));
    }

    #[test]
    fn test_ensure_registered_is_idempotent() {
        let authority = TrustAuthority::new(RegistrationPolicy::Reissue);
        let first = authority.ensure_registered("FAA").unwrap();
        let second = authority.ensure_registered("FAA").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.version, 1);
    }

    #[test]
    fn test_concurrent_ensure_registered_agrees() {
        let authority = Arc::new(TrustAuthority::new(RegistrationPolicy::Reject));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let authority = authority.clone();
                std::thread::spawn(move || authority.ensure_registered("USBR"))
            })
            .collect();

        let identities: Vec<PublicIdentity> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(identities.iter().all(|id| *id == identities[0]));
        assert_eq!(authority.identities().unwrap(), vec!["USBR"]);
    }

    #[test]
    fn test_identities_sorted() {
        let authority = TrustAuthority::default();
        authority.register("NOAA").unwrap();
        authority.register("FAA").unwrap();
        assert_eq!(authority.identities().unwrap(), vec!["FAA", "NOAA"]);
    }
}
