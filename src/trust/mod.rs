//! Trust layer
//!
//! Provides participant key management:
//! - Ed25519 signing and X25519 key-exchange key pairs
//! - Trust authority custody of private material
//! - Cryptographic utilities

pub mod authority;
pub mod crypto;
pub mod keys;

pub use authority::{InMemoryKeyStore, KeyStore, RegistrationPolicy, TrustAuthority};
pub use crypto::{sign, verify};
pub use keys::{KeyPair, PublicIdentity};
