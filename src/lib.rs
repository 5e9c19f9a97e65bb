//! # SkyGuard - Secure Envelope & Multi-Party Consensus
//!
//! Lets mutually distrustful participants exchange authenticated,
//! confidential, replay-protected messages and fuse independent risk
//! estimates into one confidence-weighted consensus:
//! - **Trust**: identity registry and custody of signing/key-exchange keys
//! - **Envelope**: hybrid KEM + AEAD + signature + integrity tag codec
//! - **Channel**: routing of sealed envelopes to registered participants
//! - **Safety**: trusted-sender, integrity and replay checks on payloads
//! - **Consensus**: verified, weighted aggregation with quorum enforcement
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skyguard::consensus::{ConsensusConfig, ConsensusEngine, RiskMetrics};
//! use skyguard::safety::{SafetyConfig, SafetyLayer};
//! use skyguard::trust::TrustAuthority;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> skyguard::Result<()> {
//!     let authority = Arc::new(TrustAuthority::default());
//!     let safety = Arc::new(SafetyLayer::new(authority, SafetyConfig::default()));
//!     let engine = ConsensusEngine::with_agencies(safety, ConsensusConfig::default())?;
//!
//!     let risk: RiskMetrics = [("heat".to_string(), 0.6), ("flood".to_string(), 0.2)]
//!         .into_iter()
//!         .collect();
//!     println!("{}", engine.consensus_report(&risk).await?);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod consensus;
pub mod core;
pub mod envelope;
pub mod monitoring;
pub mod safety;
pub mod trust;

pub use core::error::{Error, FailureCategory, Result};
pub use core::SubsystemConfig;
