//! Common types used across skyguard modules.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A 256-bit hash value (SHA3-256).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Create a new Hash256 from bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a zero hash.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash256 {
    fn default() -> Self {
        Self::zero()
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Seconds since the UTC epoch with sub-second precision.
pub fn epoch_seconds(ts: &Timestamp) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

/// Source of wall-clock time in epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the UTC epoch.
    fn now_secs(&self) -> f64;
}

/// Clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        epoch_seconds(&now())
    }
}

/// Manually advanced clock, mostly for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    // f64 bits
    secs: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `secs`.
    pub fn new(secs: f64) -> Self {
        Self {
            secs: AtomicU64::new(secs.to_bits()),
        }
    }

    /// Set the current time.
    pub fn set(&self, secs: f64) {
        self.secs.store(secs.to_bits(), Ordering::SeqCst);
    }

    /// Move the clock forward by `delta` seconds.
    pub fn advance(&self, delta: f64) {
        let current = f64::from_bits(self.secs.load(Ordering::SeqCst));
        self.set(current + delta);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        f64::from_bits(self.secs.load(Ordering::SeqCst))
    }
}

/// Base64 serde adapter for byte fields in JSON forms.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
