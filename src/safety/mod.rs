//! Safety layer
//!
//! Enforces sender trust and replay protection on application payloads:
//! - Trusted-sender gate
//! - Signature over (sender, timestamp, payload)
//! - Per-sender replay window

pub mod layer;
pub mod replay;

pub use layer::{SafetyConfig, SafetyEnvelope, SafetyLayer};
pub use replay::{InMemoryReplayStore, ReplayStore};
