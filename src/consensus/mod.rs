//! Consensus Module
//!
//! Provides confidence-weighted multi-party aggregation:
//! - Participants with reliability priors and pluggable noise
//! - Safety-layer verification of every report
//! - Weighted reduction with quorum enforcement

pub mod engine;
pub mod participant;

pub use engine::{
    default_agencies, weighted_consensus, ConsensusConfig, ConsensusEngine, ConsensusMetrics,
    ConsensusResult, RejectedReport, RoundReport,
};
pub use participant::{
    NoiseSource, Participant, ParticipantReport, RiskMetrics, UniformNoise, ZeroNoise,
};
