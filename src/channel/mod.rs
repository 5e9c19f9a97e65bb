//! Secure Channel Module
//!
//! Routes sealed envelopes between registered participants:
//! - Unique participant registry with audit snapshots
//! - Point-to-point send and filtered broadcast
//! - Decrypting handlers with optional safety re-validation

pub mod handler;
pub mod router;

pub use handler::{DecryptingHandler, InboundHandler};
pub use router::{ChannelConfig, ChannelMetrics, ParticipantFilter, ParticipantInfo, SecureChannel};
