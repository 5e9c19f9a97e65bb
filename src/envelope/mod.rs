//! Secure envelope protocol
//!
//! Binds key establishment, confidentiality, authenticity and integrity
//! into one transmissible packet:
//! - X25519 key encapsulation
//! - AES-256-GCM authenticated encryption
//! - Ed25519 sender signature
//! - HMAC-SHA3-256 integrity tag

pub mod codec;
pub mod kem;

pub use codec::{Envelope, EnvelopeCodec};
pub use kem::{decapsulate, encapsulate, SharedSecret};
