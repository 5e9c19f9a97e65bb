//! Hybrid envelope codec.
//!
//! Sealing runs key encapsulation, AES-256-GCM encryption, an Ed25519
//! signature by the sender and an HMAC-SHA3-256 tag. Opening runs the
//! inverse chain in a fixed order and never decrypts before the tag and
//! the signature have both been checked.

use crate::core::{Error, Hash256, Result};
use crate::envelope::kem;
use crate::trust::crypto::{canonical_bytes, hmac_sha3, sha3_256_multi, verify_hmac_sha3};
use crate::trust::TrustAuthority;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

const SIGNATURE_DOMAIN: &[u8] = b"skyguard/envelope/signature/v1";
const TAG_DOMAIN: &[u8] = b"skyguard/envelope/tag/v1";

/// The transmissible packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// KEM capsule
    #[serde(with = "crate::core::types::b64")]
    pub capsule: Vec<u8>,
    /// Nonce followed by AEAD output
    #[serde(with = "crate::core::types::b64")]
    pub ciphertext: Vec<u8>,
    /// Sender signature over capsule and ciphertext
    #[serde(with = "crate::core::types::b64")]
    pub signature: Vec<u8>,
    /// Keyed integrity tag over capsule and ciphertext
    #[serde(with = "crate::core::types::b64")]
    pub tag: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct BinaryFrame {
    capsule: Vec<u8>,
    ciphertext: Vec<u8>,
    signature: Vec<u8>,
    tag: Vec<u8>,
}

impl Envelope {
    /// Serialize to JSON (byte fields base64-encoded).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }

    /// Compact binary encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let frame = BinaryFrame {
            capsule: self.capsule.clone(),
            ciphertext: self.ciphertext.clone(),
            signature: self.signature.clone(),
            tag: self.tag.clone(),
        };
        Ok(bincode::serialize(&frame)?)
    }

    /// Decode the compact binary encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: BinaryFrame = bincode::deserialize(bytes)
            .map_err(|e| Error::DeserializationError(e.to_string()))?;
        Ok(Self {
            capsule: frame.capsule,
            ciphertext: frame.ciphertext,
            signature: frame.signature,
            tag: frame.tag,
        })
    }

    fn signing_digest(&self) -> Hash256 {
        signing_digest(&self.capsule, &self.ciphertext)
    }
}

fn signing_digest(capsule: &[u8], ciphertext: &[u8]) -> Hash256 {
    sha3_256_multi(&[SIGNATURE_DOMAIN, capsule, ciphertext])
}

/// Seals and opens envelopes using keys held by a [`TrustAuthority`].
///
/// Stateless apart from the shared authority, so one codec can be used
/// from many tasks at once.
#[derive(Clone)]
pub struct EnvelopeCodec {
    authority: Arc<TrustAuthority>,
}

impl EnvelopeCodec {
    /// Create a codec bound to an authority.
    pub fn new(authority: Arc<TrustAuthority>) -> Self {
        Self { authority }
    }

    /// The backing authority.
    pub fn authority(&self) -> &Arc<TrustAuthority> {
        &self.authority
    }

    /// Encrypt `plaintext` from `sender` to `recipient`.
    pub fn seal(&self, sender: &str, recipient: &str, plaintext: &[u8]) -> Result<Envelope> {
        let recipient_key = self.authority.public_identity(recipient)?.exchange_key;

        // 1. Key encapsulation
        let (secret, capsule) = kem::encapsulate(&recipient_key)?;
        let keys = secret.session_keys()?;

        // 2. Authenticated encryption
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&keys.aead_key[..]));
        let mut nonce = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut nonce);
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &capsule,
                },
            )
            .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
        let mut ciphertext = Vec::with_capacity(NONCE_LEN + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);

        // 3. Signature
        let digest = signing_digest(&capsule, &ciphertext);
        let signature = self.authority.sign_bytes(sender, digest.as_bytes())?;

        // 4. Integrity tag
        let tag = hmac_sha3(&keys.mac_key[..], &[TAG_DOMAIN, &capsule, &ciphertext])?;

        debug!(sender, recipient, bytes = plaintext.len(), "Envelope sealed");
        Ok(Envelope {
            capsule,
            ciphertext,
            signature,
            tag,
        })
    }

    /// Verify and decrypt an envelope addressed to `recipient` from `sender`.
    pub fn open(&self, recipient: &str, sender: &str, envelope: &Envelope) -> Result<Vec<u8>> {
        // 1. Key decapsulation
        let secret = self.authority.decapsulate(recipient, &envelope.capsule)?;
        let keys = secret.session_keys()?;

        // 2. Integrity tag
        verify_hmac_sha3(
            &keys.mac_key[..],
            &[TAG_DOMAIN, &envelope.capsule, &envelope.ciphertext],
            &envelope.tag,
        )?;

        // 3. Signature
        let digest = envelope.signing_digest();
        if !self
            .authority
            .verify_bytes(sender, digest.as_bytes(), &envelope.signature)
        {
            return Err(Error::SignatureInvalid(sender.to_string()));
        }

        // 4. Authenticated decryption
        if envelope.ciphertext.len() < NONCE_LEN {
            return Err(Error::DecryptionFailure);
        }
        let (nonce, sealed) = envelope.ciphertext.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&keys.aead_key[..]));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &envelope.capsule,
                },
            )
            .map_err(|_| Error::DecryptionFailure)?;

        debug!(sender, recipient, bytes = plaintext.len(), "Envelope opened");
        Ok(plaintext)
    }

    /// Seal the canonical encoding of a structured value.
    pub fn seal_value<T: Serialize + ?Sized>(
        &self,
        sender: &str,
        recipient: &str,
        value: &T,
    ) -> Result<Envelope> {
        let bytes = canonical_bytes(value)?;
        self.seal(sender, recipient, &bytes)
    }

    /// Open an envelope and decode its structured payload.
    pub fn open_value<T: DeserializeOwned>(
        &self,
        recipient: &str,
        sender: &str,
        envelope: &Envelope,
    ) -> Result<T> {
        let bytes = self.open(recipient, sender, envelope)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::RegistrationPolicy;
    use proptest::prelude::*;
    use serde_json::json;

    fn setup() -> EnvelopeCodec {
        let authority = Arc::new(TrustAuthority::new(RegistrationPolicy::Reject));
        authority.register("GROUND").unwrap();
        authority.register("SAT-1").unwrap();
        authority.register("SAT-2").unwrap();
        EnvelopeCodec::new(authority)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let codec = setup();
        let envelope = codec.seal("GROUND", "SAT-1", b"orbit adjust +0.3").unwrap();
        let plaintext = codec.open("SAT-1", "GROUND", &envelope).unwrap();
        assert_eq!(plaintext, b"orbit adjust +0.3");
    }

    #[test]
    fn test_roundtrip_empty_plaintext() {
        let codec = setup();
        let envelope = codec.seal("GROUND", "SAT-1", b"").unwrap();
        assert!(codec.open("SAT-1", "GROUND", &envelope).unwrap().is_empty());
    }

    #[test]
    fn test_ciphertext_hides_plaintext() {
        let codec = setup();
        let envelope = codec.seal("GROUND", "SAT-1", b"secret telemetry").unwrap();
        assert!(!envelope
            .ciphertext
            .windows(b"secret telemetry".len())
            .any(|w| w == b"secret telemetry"));
    }

    #[test]
    fn test_structured_roundtrip() {
        let codec = setup();
        let payload = json!({"city": "Las Vegas", "signal": "ET anomaly"});
        let envelope = codec.seal_value("GROUND", "SAT-2", &payload).unwrap();
        let opened: serde_json::Value = codec.open_value("SAT-2", "GROUND", &envelope).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_wrong_recipient_fails_integrity() {
        let codec = setup();
        let envelope = codec.seal("GROUND", "SAT-1", b"for sat-1").unwrap();
        let result = codec.open("SAT-2", "GROUND", &envelope);
        assert!(matches!(result, Err(Error::IntegrityFailure(_))));
    }

    #[test]
    fn test_tag_tamper_fails_integrity() {
        let codec = setup();
        let mut envelope = codec.seal("GROUND", "SAT-1", b"payload").unwrap();
        envelope.tag[0] ^= 0x01;
        let result = codec.open("SAT-1", "GROUND", &envelope);
        assert!(matches!(result, Err(Error::IntegrityFailure(_))));
    }

    #[test]
    fn test_wrong_sender_fails_signature() {
        let codec = setup();
        let envelope = codec.seal("GROUND", "SAT-1", b"payload").unwrap();
        let result = codec.open("SAT-1", "SAT-2", &envelope);
        assert!(matches!(result, Err(Error::SignatureInvalid(id)) if id == "SAT-2"));
    }

    #[test]
    fn test_signature_tamper_fails_signature() {
        let codec = setup();
        let mut envelope = codec.seal("GROUND", "SAT-1", b"payload").unwrap();
        envelope.signature[10] ^= 0x80;
        let result = codec.open("SAT-1", "GROUND", &envelope);
        assert!(matches!(result, Err(Error::SignatureInvalid(_))));
    }

    #[test]
    fn test_unknown_recipient() {
        let codec = setup();
        let result = codec.seal("GROUND", "SAT-9", b"payload");
        assert!(matches!(result, Err(Error::UnknownIdentity(_))));
    }

    #[test]
    fn test_json_and_binary_forms() {
        let codec = setup();
        let envelope = codec.seal("GROUND", "SAT-1", b"payload").unwrap();

        let json = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for field in ["capsule", "ciphertext", "signature", "tag"] {
            assert!(value[field].is_string(), "missing field {}", field);
        }
        assert_eq!(Envelope::from_json(&json).unwrap(), envelope);

        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(codec.open("SAT-1", "GROUND", &decoded).unwrap(), b"payload");
    }

    #[test]
    fn test_from_json_missing_field() {
        let result = Envelope::from_json(r#"{"capsule":"AAAA","ciphertext":"AAAA","tag":"AAAA"}"#);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip(message in proptest::collection::vec(any::<u8>(), 0..512)) {
            let codec = setup();
            let envelope = codec.seal("GROUND", "SAT-1", &message).unwrap();
            prop_assert_eq!(codec.open("SAT-1", "GROUND", &envelope).unwrap(), message);
        }

        #[test]
        fn prop_ciphertext_bit_flip_detected(
            message in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let codec = setup();
            let mut envelope = codec.seal("GROUND", "SAT-1", &message).unwrap();
            let i = index.index(envelope.ciphertext.len());
            envelope.ciphertext[i] ^= 1 << bit;
            let result = codec.open("SAT-1", "GROUND", &envelope);
            prop_assert!(matches!(
                result,
                Err(Error::IntegrityFailure(_)) | Err(Error::DecryptionFailure)
            ));
        }
    }
}
