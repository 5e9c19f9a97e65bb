//! Consensus participants and their per-round reports.

use crate::core::{epoch_seconds, now};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Risk metrics keyed by name, each value in [0, 1].
pub type RiskMetrics = BTreeMap<String, f64>;

/// A participant with a static reliability prior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identity (also its trust-authority identity)
    pub id: String,
    /// Historical reliability (0.0 - 1.0)
    pub reliability: f64,
}

impl Participant {
    /// Create a new participant.
    pub fn new(id: &str, reliability: f64) -> Self {
        Self {
            id: id.to_string(),
            reliability: finite_or(reliability, 0.0).clamp(0.0, 1.0),
        }
    }

    /// Produce this participant's independent reading of `risk`.
    ///
    /// Each metric is perturbed by noise scaled by `1 - reliability` and
    /// clamped to [0, 1]. Confidence is `reliability` times a noise factor
    /// bounded to `[confidence_floor, 1]`.
    pub fn observe(
        &self,
        risk: &RiskMetrics,
        noise: &dyn NoiseSource,
        confidence_floor: f64,
    ) -> ParticipantReport {
        let spread = 1.0 - self.reliability;
        let verified_risk = risk
            .iter()
            .map(|(metric, value)| {
                let deviation = finite_or(noise.deviation(&self.id, metric), 0.0) * spread;
                (metric.clone(), finite_or(value + deviation, *value).clamp(0.0, 1.0))
            })
            .collect();

        let floor = confidence_floor.clamp(0.0, 1.0);
        let factor = finite_or(noise.confidence_factor(&self.id), floor).clamp(floor, 1.0);

        ParticipantReport {
            participant: self.id.clone(),
            verified_risk,
            confidence: self.reliability * factor,
            timestamp: epoch_seconds(&now()),
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// One participant's verified contribution to a round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantReport {
    /// Reporting participant
    #[serde(rename = "agency")]
    pub participant: String,
    /// Perturbed metric values
    pub verified_risk: RiskMetrics,
    /// Confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Observation time, seconds since the UTC epoch
    pub timestamp: f64,
}

/// Measurement imprecision model.
pub trait NoiseSource: Send + Sync {
    /// Raw deviation for one metric, before reliability scaling.
    fn deviation(&self, participant: &str, metric: &str) -> f64;

    /// Multiplier applied to reliability to form confidence.
    fn confidence_factor(&self, participant: &str) -> f64;
}

/// Uniform random noise.
#[derive(Clone, Debug)]
pub struct UniformNoise {
    amplitude: f64,
    confidence_floor: f64,
}

impl UniformNoise {
    /// Deviations drawn from `[-amplitude, amplitude]`, confidence factors
    /// from `[confidence_floor, 1]`.
    pub fn new(amplitude: f64, confidence_floor: f64) -> Self {
        Self {
            amplitude: amplitude.abs(),
            confidence_floor: confidence_floor.clamp(0.0, 1.0),
        }
    }
}

impl Default for UniformNoise {
    fn default() -> Self {
        Self::new(0.03, 0.9)
    }
}

impl NoiseSource for UniformNoise {
    fn deviation(&self, _participant: &str, _metric: &str) -> f64 {
        if self.amplitude == 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(-self.amplitude..=self.amplitude)
    }

    fn confidence_factor(&self, _participant: &str) -> f64 {
        if self.confidence_floor >= 1.0 {
            return 1.0;
        }
        rand::thread_rng().gen_range(self.confidence_floor..=1.0)
    }
}

/// No noise: readings equal the input and confidence equals reliability.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn deviation(&self, _participant: &str, _metric: &str) -> f64 {
        0.0
    }

    fn confidence_factor(&self, _participant: &str) -> f64 {
        1.0
    }
}
