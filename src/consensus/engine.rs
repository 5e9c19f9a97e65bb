//! Consensus engine aggregating verified participant reports.
//!
//! Every participant's report travels through the safety layer before it
//! can influence the result. Rejected reports are dropped from the round
//! and collected; only a round with no usable reports fails.

use crate::consensus::participant::{
    NoiseSource, Participant, ParticipantReport, RiskMetrics, UniformNoise,
};
use crate::core::{now, Error, FailureCategory, Result, Timestamp};
use crate::safety::SafetyLayer;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the consensus engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum number of verified reports for a trusted round
    pub min_quorum: usize,
    /// Per-participant verification timeout in milliseconds
    pub round_timeout_ms: u64,
    /// Lower bound of the confidence noise factor
    pub confidence_floor: f64,
    /// Amplitude of the default uniform metric noise
    pub noise_amplitude: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_quorum: 1,
            round_timeout_ms: 5_000,
            confidence_floor: 0.9,
            noise_amplitude: 0.03,
        }
    }
}

/// Result of one aggregation round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Participants whose reports survived verification, in submission order
    pub agencies_involved: Vec<String>,
    /// Confidence-weighted value per metric
    pub consensus_risk: RiskMetrics,
    /// Mean confidence of surviving reports
    pub mean_confidence: f64,
    /// Generation timestamp
    pub generated_at: Timestamp,
}

impl ConsensusResult {
    /// Serialize to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A report dropped from a round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectedReport {
    /// Participant whose report was dropped
    pub participant: String,
    /// Audit category of the rejection
    pub category: FailureCategory,
    /// Human-readable reason
    pub reason: String,
}

/// A round's result together with the reports it dropped.
#[derive(Clone, Debug)]
pub struct RoundReport {
    /// Round identifier
    pub round_id: String,
    /// Aggregate
    pub result: ConsensusResult,
    /// Dropped reports
    pub rejected: Vec<RejectedReport>,
}

/// Consensus engine metrics.
#[derive(Clone, Debug, Default)]
pub struct ConsensusMetrics {
    pub total_rounds: u64,
    pub failed_rounds: u64,
    pub rejected_reports: u64,
    pub average_confidence: f64,
}

/// Confidence-weighted mean per metric over `reports`.
///
/// Fails with `ConsensusQuorumFailure` when fewer than `min_quorum` reports
/// are present or their total confidence is zero. Each value is clamped to
/// the range of the contributing readings.
pub fn weighted_consensus(
    reports: &[ParticipantReport],
    metrics: &[String],
    min_quorum: usize,
) -> Result<ConsensusResult> {
    let required = min_quorum.max(1);
    let quorum_failure = || Error::ConsensusQuorumFailure {
        survivors: reports.len(),
        required,
    };

    let total_confidence: f64 = reports.iter().map(|r| r.confidence).sum();
    if reports.len() < required || !(total_confidence > 0.0) {
        return Err(quorum_failure());
    }

    let mut consensus_risk = RiskMetrics::new();
    for metric in metrics {
        let mut weighted_sum = 0.0;
        let mut weight = 0.0;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for report in reports {
            if let Some(value) = report.verified_risk.get(metric) {
                weighted_sum += value * report.confidence;
                weight += report.confidence;
                lo = lo.min(*value);
                hi = hi.max(*value);
            }
        }
        if !(weight > 0.0) {
            return Err(quorum_failure());
        }
        consensus_risk.insert(metric.clone(), (weighted_sum / weight).clamp(lo, hi));
    }

    Ok(ConsensusResult {
        agencies_involved: reports.iter().map(|r| r.participant.clone()).collect(),
        consensus_risk,
        mean_confidence: total_confidence / reports.len() as f64,
        generated_at: now(),
    })
}

fn verify_participant(
    participant: &Participant,
    risk: &RiskMetrics,
    noise: &dyn NoiseSource,
    safety: &SafetyLayer,
    confidence_floor: f64,
) -> Result<ParticipantReport> {
    let report = participant.observe(risk, noise, confidence_floor);
    let envelope = safety.wrap(&participant.id, report)?;
    safety.unwrap(envelope)
}

/// Aggregates independently verified reports into one agreed result.
pub struct ConsensusEngine {
    participants: Vec<Participant>,
    safety: Arc<SafetyLayer>,
    noise: Arc<dyn NoiseSource>,
    config: ConsensusConfig,
    metrics: Mutex<ConsensusMetrics>,
}

impl ConsensusEngine {
    /// Create an engine with no participants.
    pub fn new(safety: Arc<SafetyLayer>, config: ConsensusConfig) -> Self {
        let noise = Arc::new(UniformNoise::new(
            config.noise_amplitude,
            config.confidence_floor,
        ));
        Self {
            participants: Vec::new(),
            safety,
            noise,
            config,
            metrics: Mutex::new(ConsensusMetrics::default()),
        }
    }

    /// Create an engine with the default agencies enrolled.
    pub fn with_agencies(safety: Arc<SafetyLayer>, config: ConsensusConfig) -> Result<Self> {
        let mut engine = Self::new(safety, config);
        for participant in default_agencies() {
            engine.add_participant(&participant.id, participant.reliability)?;
        }
        Ok(engine)
    }

    /// Use an injected noise model.
    pub fn with_noise(mut self, noise: Arc<dyn NoiseSource>) -> Self {
        self.noise = noise;
        self
    }

    /// Enroll a participant, issuing key material if it has none.
    pub fn add_participant(&mut self, id: &str, reliability: f64) -> Result<()> {
        if self.participants.iter().any(|p| p.id == id) {
            return Err(Error::DuplicateIdentity(id.to_string()));
        }
        self.safety.authority().ensure_registered(id)?;
        self.participants.push(Participant::new(id, reliability));
        Ok(())
    }

    /// Enrolled participants in submission order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// The safety layer reports pass through.
    pub fn safety(&self) -> &Arc<SafetyLayer> {
        &self.safety
    }

    /// Run one round and return the aggregate.
    pub async fn aggregate(&self, risk: &RiskMetrics) -> Result<ConsensusResult> {
        Ok(self.aggregate_detailed(risk).await?.result)
    }

    /// Run one round and return the aggregate with every dropped report.
    pub async fn aggregate_detailed(&self, risk: &RiskMetrics) -> Result<RoundReport> {
        if let Some((metric, _)) = risk.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidRiskMetric(metric.clone()));
        }

        let round_id = Uuid::new_v4().to_string();
        let timeout = Duration::from_millis(self.config.round_timeout_ms);
        let shared_risk = Arc::new(risk.clone());

        let verifications = self.participants.iter().cloned().map(|participant| {
            let risk = shared_risk.clone();
            let noise = self.noise.clone();
            let safety = self.safety.clone();
            let floor = self.config.confidence_floor;
            let id = participant.id.clone();
            // Noise sources may block; keep them off the async workers.
            let handle = tokio::task::spawn_blocking(move || {
                verify_participant(&participant, &risk, noise.as_ref(), &safety, floor)
            });
            async move {
                let outcome = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join_err)) => Err(Error::Internal(join_err.to_string())),
                    Err(_) => Err(Error::VerificationTimeout(id.clone())),
                };
                (id, outcome)
            }
        });
        let outcomes = join_all(verifications).await;

        let mut survivors = Vec::new();
        let mut rejected = Vec::new();
        for (participant, outcome) in outcomes {
            match outcome {
                Ok(report) => survivors.push(report),
                Err(err) => {
                    warn!(
                        round_id = %round_id,
                        participant = %participant,
                        category = %err.category(),
                        error = %err,
                        "Report rejected"
                    );
                    rejected.push(RejectedReport {
                        participant,
                        category: err.category(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let metrics: Vec<String> = risk.keys().cloned().collect();
        let outcome = weighted_consensus(&survivors, &metrics, self.config.min_quorum);
        self.update_metrics(outcome.as_ref().ok(), rejected.len())?;
        let result = outcome?;

        info!(
            round_id = %round_id,
            participants = result.agencies_involved.len(),
            rejected = rejected.len(),
            mean_confidence = result.mean_confidence,
            "Consensus round complete"
        );

        Ok(RoundReport {
            round_id,
            result,
            rejected,
        })
    }

    /// Run one round and render the result as pretty JSON.
    pub async fn consensus_report(&self, risk: &RiskMetrics) -> Result<String> {
        self.aggregate(risk).await?.to_json_pretty()
    }

    /// Snapshot of engine metrics.
    pub fn metrics(&self) -> Result<ConsensusMetrics> {
        Ok(self.metrics.lock()?.clone())
    }

    fn update_metrics(&self, result: Option<&ConsensusResult>, rejected: usize) -> Result<()> {
        let mut metrics = self.metrics.lock()?;
        metrics.total_rounds += 1;
        metrics.rejected_reports += rejected as u64;
        match result {
            Some(result) => {
                let successful = metrics.total_rounds - metrics.failed_rounds;
                metrics.average_confidence = (metrics.average_confidence
                    * (successful - 1) as f64
                    + result.mean_confidence)
                    / successful as f64;
            }
            None => metrics.failed_rounds += 1,
        }
        Ok(())
    }
}

/// The four reference agencies and their reliability priors.
pub fn default_agencies() -> Vec<Participant> {
    vec![
        Participant::new("NASA", 0.97),
        Participant::new("NOAA", 0.95),
        Participant::new("USGS", 0.93),
        Participant::new("LocalAgency", 0.85),
    ]
}
