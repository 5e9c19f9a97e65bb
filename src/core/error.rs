//! Error types for skyguard.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for skyguard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in skyguard operations.
#[derive(Error, Debug)]
pub enum Error {
    // Identity errors
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Identity already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    // Envelope errors
    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("Signature invalid for sender {0}")]
    SignatureInvalid(String),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    // Channel errors
    #[error("Duplicate participant identity: {0}")]
    DuplicateIdentity(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    // Safety errors
    #[error("Untrusted sender: {0}")]
    UntrustedSender(String),

    #[error("Replay or delayed message detected from {sender} at {timestamp}")]
    ReplayDetected { sender: String, timestamp: f64 },

    // Consensus errors
    #[error("Consensus quorum not met: {survivors} verified report(s), {required} required")]
    ConsensusQuorumFailure { survivors: usize, required: usize },

    #[error("Invalid risk metric {0}: value must be finite")]
    InvalidRiskMetric(String),

    #[error("Verification timed out for {0}")]
    VerificationTimeout(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audit category of a failure.
///
/// Rejections are always reported with one of these so that trust,
/// integrity and freshness problems stay distinguishable downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// Caller-facing registration and addressing errors
    Setup,
    /// Sender not trusted
    Trust,
    /// Tampering, bad signature or failed decryption
    Integrity,
    /// Replayed or stale message
    Freshness,
    /// Aggregation could not produce a trusted result
    Consensus,
    /// Everything else
    Internal,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::Setup => write!(f, "setup"),
            FailureCategory::Trust => write!(f, "trust"),
            FailureCategory::Integrity => write!(f, "integrity"),
            FailureCategory::Freshness => write!(f, "freshness"),
            FailureCategory::Consensus => write!(f, "consensus"),
            FailureCategory::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Classify this error for audit reporting.
    pub fn category(&self) -> FailureCategory {
        match self {
            Error::UnknownIdentity(_)
            | Error::AlreadyRegistered(_)
            | Error::DuplicateIdentity(_)
            | Error::UnknownParticipant(_)
            | Error::InvalidRiskMetric(_) => FailureCategory::Setup,
            Error::UntrustedSender(_) => FailureCategory::Trust,
            Error::IntegrityFailure(_)
            | Error::SignatureInvalid(_)
            | Error::DecryptionFailure
            | Error::InvalidKeyFormat(_) => FailureCategory::Integrity,
            Error::ReplayDetected { .. } | Error::VerificationTimeout(_) => {
                FailureCategory::Freshness
            }
            Error::ConsensusQuorumFailure { .. } => FailureCategory::Consensus,
            Error::EncryptionFailed(_)
            | Error::SerializationError(_)
            | Error::DeserializationError(_)
            | Error::Internal(_)
            | Error::Io(_) => FailureCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidKeyFormat(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("lock poisoned: {}", err))
    }
}
