//! Key encapsulation over X25519.
//!
//! The sender draws an ephemeral X25519 key, performs Diffie-Hellman with
//! the recipient's static exchange key and ships the ephemeral public key
//! as the capsule. The recipient repeats the exchange with its static
//! secret and arrives at the same shared secret.

use crate::core::{Error, Result};
use hkdf::Hkdf;
use sha3::Sha3_256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Capsule length in bytes (an X25519 public key).
pub const CAPSULE_LEN: usize = 32;

const KEM_INFO: &[u8] = b"skyguard/kem/x25519-hkdf-sha3/v1";
const AEAD_INFO: &[u8] = b"skyguard/session/aead";
const MAC_INFO: &[u8] = b"skyguard/session/mac";

/// A 256-bit shared secret, wiped on drop.
pub struct SharedSecret(Zeroizing<[u8; 32]>);

impl SharedSecret {
    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive independent AEAD and MAC keys from this secret.
    pub fn session_keys(&self) -> Result<SessionKeys> {
        let hk = Hkdf::<Sha3_256>::new(None, &self.0[..]);
        let mut aead_key = Zeroizing::new([0u8; 32]);
        let mut mac_key = Zeroizing::new([0u8; 32]);
        hk.expand(AEAD_INFO, &mut aead_key[..])
            .map_err(|e| Error::Internal(e.to_string()))?;
        hk.expand(MAC_INFO, &mut mac_key[..])
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(SessionKeys { aead_key, mac_key })
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Per-envelope symmetric keys.
pub struct SessionKeys {
    pub(crate) aead_key: Zeroizing<[u8; 32]>,
    pub(crate) mac_key: Zeroizing<[u8; 32]>,
}

/// Produce a fresh shared secret and the capsule that carries it to the
/// holder of `recipient_exchange_key`.
pub fn encapsulate(recipient_exchange_key: &[u8; 32]) -> Result<(SharedSecret, Vec<u8>)> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let capsule = PublicKey::from(&ephemeral);
    let recipient = PublicKey::from(*recipient_exchange_key);
    let dh = ephemeral.diffie_hellman(&recipient);
    if !dh.was_contributory() {
        return Err(Error::InvalidKeyFormat(
            "recipient exchange key is a low-order point".into(),
        ));
    }
    let secret = derive(dh.as_bytes(), capsule.as_bytes(), recipient_exchange_key)?;
    Ok((secret, capsule.as_bytes().to_vec()))
}

/// Recover the shared secret from a capsule with the recipient's static secret.
pub fn decapsulate(
    secret: &StaticSecret,
    own_exchange_key: &[u8; 32],
    capsule: &[u8],
) -> Result<SharedSecret> {
    let capsule: [u8; CAPSULE_LEN] = capsule
        .try_into()
        .map_err(|_| Error::IntegrityFailure("malformed capsule".into()))?;
    let dh = secret.diffie_hellman(&PublicKey::from(capsule));
    if !dh.was_contributory() {
        return Err(Error::IntegrityFailure("non-contributory capsule".into()));
    }
    derive(dh.as_bytes(), &capsule, own_exchange_key)
}

fn derive(dh: &[u8; 32], capsule: &[u8; 32], recipient: &[u8; 32]) -> Result<SharedSecret> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(capsule);
    salt[32..].copy_from_slice(recipient);
    let hk = Hkdf::<Sha3_256>::new(Some(&salt[..]), dh);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(KEM_INFO, &mut okm[..])
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(SharedSecret(okm))
}
