//! Subsystem-wide configuration.

use crate::channel::ChannelConfig;
use crate::consensus::ConsensusConfig;
use crate::core::Result;
use crate::monitoring::LoggerConfig;
use crate::safety::SafetyConfig;
use crate::trust::RegistrationPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for every SkyGuard component.
///
/// Missing sections fall back to their defaults, so a partial JSON document
/// is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    /// Duplicate-registration behaviour of the trust authority
    pub registration: RegistrationPolicy,
    /// Trusted set and replay window
    pub safety: SafetyConfig,
    /// Router settings
    pub channel: ChannelConfig,
    /// Aggregation settings
    pub consensus: ConsensusConfig,
    /// Log output
    pub logging: LoggerConfig,
}

impl SubsystemConfig {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
