//! Trust-scoped, replay-protected safety envelopes.
//!
//! `unwrap` applies three checks in order (trust, integrity, freshness) and
//! stops at the first failure, so untrusted or tampered envelopes never
//! reach the replay state.

use crate::core::{Clock, Error, Result, SystemClock};
use crate::safety::replay::{InMemoryReplayStore, ReplayStore};
use crate::trust::TrustAuthority;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Smallest step used to keep one sender's issuance timestamps increasing.
const TIMESTAMP_STEP: f64 = 1e-6;

/// Safety layer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Identities allowed to submit envelopes
    pub trusted_nodes: Vec<String>,
    /// Maximum allowed clock skew/staleness in seconds
    pub replay_window_secs: f64,
    /// Tracked-sender count after which stale replay entries are pruned
    pub replay_capacity: Option<usize>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            trusted_nodes: ["NASA", "NOAA", "USGS", "FAA", "USBR", "CityGov"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            replay_window_secs: 10.0,
            replay_capacity: None,
        }
    }
}

impl SafetyConfig {
    /// Config trusting exactly `nodes`.
    pub fn trusting<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// A signed, timestamped application payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyEnvelope<T> {
    /// Sender identity
    pub node_id: String,
    /// Issuance time, seconds since the UTC epoch
    pub timestamp: f64,
    /// Application payload
    pub payload: T,
    /// Signature over (node_id, timestamp, payload)
    #[serde(with = "crate::core::types::b64")]
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct SignedFields<'a, T: Serialize> {
    node_id: &'a str,
    timestamp: f64,
    payload: &'a T,
}

impl<T: Serialize> SafetyEnvelope<T> {
    fn signed_fields(&self) -> SignedFields<'_, T> {
        SignedFields {
            node_id: &self.node_id,
            timestamp: self.timestamp,
            payload: &self.payload,
        }
    }
}

/// Wraps and unwraps payloads for a trusted-sender list.
pub struct SafetyLayer {
    authority: Arc<TrustAuthority>,
    trusted: RwLock<HashSet<String>>,
    replay: Arc<dyn ReplayStore>,
    clock: Arc<dyn Clock>,
    replay_window: f64,
    issued: Mutex<HashMap<String, f64>>,
}

impl SafetyLayer {
    /// Create a safety layer over an authority.
    pub fn new(authority: Arc<TrustAuthority>, config: SafetyConfig) -> Self {
        let replay: Arc<dyn ReplayStore> = match config.replay_capacity {
            Some(capacity) => Arc::new(InMemoryReplayStore::with_capacity(capacity)),
            None => Arc::new(InMemoryReplayStore::new()),
        };
        Self {
            authority,
            trusted: RwLock::new(config.trusted_nodes.into_iter().collect()),
            replay,
            clock: Arc::new(SystemClock),
            replay_window: config.replay_window_secs,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Use an injected replay store.
    pub fn with_replay_store(mut self, store: Arc<dyn ReplayStore>) -> Self {
        self.replay = store;
        self
    }

    /// Use an injected clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The backing authority.
    pub fn authority(&self) -> &Arc<TrustAuthority> {
        &self.authority
    }

    /// Replay window in seconds.
    pub fn replay_window(&self) -> f64 {
        self.replay_window
    }

    /// Whether `node_id` is on the trusted list. Fails closed.
    pub fn validate_sender(&self, node_id: &str) -> bool {
        self.trusted
            .read()
            .map(|trusted| trusted.contains(node_id))
            .unwrap_or(false)
    }

    /// Add `node_id` to the trusted list.
    pub fn trust(&self, node_id: &str) -> Result<bool> {
        Ok(self.trusted.write()?.insert(node_id.to_string()))
    }

    /// Remove `node_id` from the trusted list.
    pub fn distrust(&self, node_id: &str) -> Result<bool> {
        Ok(self.trusted.write()?.remove(node_id))
    }

    /// Trusted identities, sorted.
    pub fn trusted_nodes(&self) -> Result<Vec<String>> {
        let mut nodes: Vec<String> = self.trusted.read()?.iter().cloned().collect();
        nodes.sort();
        Ok(nodes)
    }

    /// Stamp the current time and sign `payload` as `node_id`.
    pub fn wrap<T: Serialize>(&self, node_id: &str, payload: T) -> Result<SafetyEnvelope<T>> {
        let timestamp = self.next_timestamp(node_id)?;
        self.wrap_at(node_id, payload, timestamp)
    }

    /// Sign `payload` as `node_id` with an explicit timestamp.
    pub fn wrap_at<T: Serialize>(
        &self,
        node_id: &str,
        payload: T,
        timestamp: f64,
    ) -> Result<SafetyEnvelope<T>> {
        let mut envelope = SafetyEnvelope {
            node_id: node_id.to_string(),
            timestamp,
            payload,
            signature: Vec::new(),
        };
        let signature = self.authority.sign(node_id, &envelope.signed_fields())?;
        envelope.signature = signature;
        debug!(node_id, timestamp, "Safety envelope wrapped");
        Ok(envelope)
    }

    /// Verify trust, integrity and freshness, then release the payload.
    pub fn unwrap<T: Serialize>(&self, envelope: SafetyEnvelope<T>) -> Result<T> {
        let node_id = envelope.node_id.as_str();

        if !self.validate_sender(node_id) {
            warn!(node_id, "Rejected envelope from untrusted sender");
            return Err(Error::UntrustedSender(node_id.to_string()));
        }

        if !self
            .authority
            .verify(node_id, &envelope.signed_fields(), &envelope.signature)
        {
            warn!(node_id, "Rejected envelope with invalid signature");
            return Err(Error::IntegrityFailure(format!(
                "signature mismatch for {}",
                node_id
            )));
        }

        let now = self.clock.now_secs();
        if let Err(err) =
            self.replay
                .check_and_advance(node_id, envelope.timestamp, now, self.replay_window)
        {
            warn!(node_id, timestamp = envelope.timestamp, now, "Rejected replayed or stale envelope");
            return Err(err);
        }

        debug!(node_id, timestamp = envelope.timestamp, "Safety envelope accepted");
        Ok(envelope.payload)
    }

    /// Last accepted timestamp for `node_id`.
    pub fn last_seen(&self, node_id: &str) -> Option<f64> {
        self.replay.last_seen(node_id)
    }

    /// Evict replay entries older than the replay window.
    pub fn prune_replay_state(&self) -> usize {
        self.replay.prune(self.clock.now_secs(), self.replay_window)
    }

    fn next_timestamp(&self, node_id: &str) -> Result<f64> {
        let now = self.clock.now_secs();
        let mut issued = self.issued.lock()?;
        let timestamp = match issued.get(node_id) {
            Some(previous) if now <= *previous => previous + TIMESTAMP_STEP,
            _ => now,
        };
        issued.insert(node_id.to_string(), timestamp);
        Ok(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use serde_json::json;

    fn setup(trusted: &[&str]) -> (SafetyLayer, Arc<ManualClock>) {
        let authority = Arc::new(TrustAuthority::default());
        for id in ["NASA", "NOAA", "ROGUE"] {
            authority.register(id).unwrap();
        }
        let clock = Arc::new(ManualClock::new(1_700_000_000.0));
        let layer = SafetyLayer::new(authority, SafetyConfig::trusting(trusted.iter().copied()))
            .with_clock(clock.clone());
        (layer, clock)
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let (layer, _) = setup(&["NASA"]);
        let payload = json!({"city": "Las Vegas", "signal": "ET anomaly"});
        let envelope = layer.wrap("NASA", payload.clone()).unwrap();
        assert_eq!(envelope.node_id, "NASA");
        assert_eq!(layer.unwrap(envelope).unwrap(), payload);
    }

    #[test]
    fn test_second_unwrap_is_replay() {
        let (layer, _) = setup(&["NASA"]);
        let envelope = layer.wrap("NASA", json!({"heat": 0.6})).unwrap();
        assert!(layer.unwrap(envelope.clone()).is_ok());
        let result = layer.unwrap(envelope);
        assert!(matches!(result, Err(Error::ReplayDetected { sender, .. }) if sender == "NASA"));
    }

    #[test]
    fn test_stale_envelope_rejected_even_if_unseen() {
        let (layer, clock) = setup(&["NASA"]);
        let old = clock.now_secs() - layer.replay_window() - 1.0;
        let envelope = layer.wrap_at("NASA", json!({"heat": 0.6}), old).unwrap();
        assert!(matches!(layer.unwrap(envelope), Err(Error::ReplayDetected { .. })));
        assert_eq!(layer.last_seen("NASA"), None);
    }

    #[test]
    fn test_envelope_goes_stale_in_transit() {
        let (layer, clock) = setup(&["NASA"]);
        let envelope = layer.wrap("NASA", 42u32).unwrap();
        clock.advance(11.0);
        assert!(matches!(layer.unwrap(envelope), Err(Error::ReplayDetected { .. })));
    }

    #[test]
    fn test_untrusted_sender_checked_first() {
        let (layer, _) = setup(&["NASA"]);
        // Validly signed and fresh, but not on the trusted list.
        let envelope = layer.wrap("ROGUE", json!({"heat": 0.9})).unwrap();
        let result = layer.unwrap(envelope);
        assert!(matches!(result, Err(Error::UntrustedSender(id)) if id == "ROGUE"));
        assert_eq!(layer.last_seen("ROGUE"), None);
    }

    #[test]
    fn test_tampered_payload_fails_integrity_without_touching_replay_state() {
        let (layer, _) = setup(&["NASA"]);
        let mut envelope = layer.wrap("NASA", json!({"heat": 0.6})).unwrap();
        envelope.payload = json!({"heat": 0.1});
        assert!(matches!(layer.unwrap(envelope), Err(Error::IntegrityFailure(_))));
        assert_eq!(layer.last_seen("NASA"), None);
    }

    #[test]
    fn test_forged_sender_fails_integrity() {
        let (layer, _) = setup(&["NASA", "NOAA"]);
        let mut envelope = layer.wrap("NOAA", json!({"flood": 0.2})).unwrap();
        envelope.node_id = "NASA".to_string();
        assert!(matches!(layer.unwrap(envelope), Err(Error::IntegrityFailure(_))));
    }

    #[test]
    fn test_tampered_timestamp_fails_integrity() {
        let (layer, _) = setup(&["NASA"]);
        let mut envelope = layer.wrap("NASA", json!({"heat": 0.6})).unwrap();
        envelope.timestamp += 0.5;
        assert!(matches!(layer.unwrap(envelope), Err(Error::IntegrityFailure(_))));
    }

    #[test]
    fn test_consecutive_wraps_have_increasing_timestamps() {
        let (layer, _) = setup(&["NASA"]);
        // Clock is frozen; issuance still moves forward.
        let first = layer.wrap("NASA", 1u8).unwrap();
        let second = layer.wrap("NASA", 2u8).unwrap();
        assert!(second.timestamp > first.timestamp);
        assert!(layer.unwrap(first).is_ok());
        assert!(layer.unwrap(second).is_ok());
    }

    #[test]
    fn test_trust_and_distrust() {
        let (layer, _) = setup(&["NASA"]);
        assert!(!layer.validate_sender("NOAA"));
        assert!(layer.trust("NOAA").unwrap());
        assert!(layer.validate_sender("NOAA"));
        assert!(layer.distrust("NASA").unwrap());
        assert_eq!(layer.trusted_nodes().unwrap(), vec!["NOAA"]);
    }

    #[test]
    fn test_wrap_unknown_identity() {
        let (layer, _) = setup(&["GHOST"]);
        assert!(matches!(layer.wrap("GHOST", 1u8), Err(Error::UnknownIdentity(_))));
    }

    #[test]
    fn test_prune_replay_state() {
        let (layer, clock) = setup(&["NASA"]);
        layer.unwrap(layer.wrap("NASA", 1u8).unwrap()).unwrap();
        clock.advance(30.0);
        assert_eq!(layer.prune_replay_state(), 1);
        assert_eq!(layer.last_seen("NASA"), None);
    }

    #[test]
    fn test_serialized_form() {
        let (layer, _) = setup(&["NASA"]);
        let envelope = layer.wrap("NASA", json!({"heat": 0.6})).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["node_id"], "NASA");
        assert!(value["timestamp"].is_f64());
        assert_eq!(value["payload"]["heat"], 0.6);
        assert!(value["signature"].is_string());

        let parsed: SafetyEnvelope<serde_json::Value> = serde_json::from_value(value).unwrap();
        assert_eq!(layer.unwrap(parsed).unwrap(), json!({"heat": 0.6}));
    }

    #[test]
    fn test_json_text_roundtrip_preserves_signature() {
        use rand::Rng;
        let (layer, clock) = setup(&["NASA"]);
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            clock.advance(rng.gen_range(1e-6..1e-3));
            let payload = json!({"heat": rng.gen_range(0.0..1.0), "flood": rng.gen::<f64>()});
            let envelope = layer.wrap("NASA", payload.clone()).unwrap();

            let text = serde_json::to_string(&envelope).unwrap();
            let parsed: SafetyEnvelope<serde_json::Value> = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed.timestamp.to_bits(), envelope.timestamp.to_bits());
            assert_eq!(layer.unwrap(parsed).unwrap(), payload);
        }
    }

    #[test]
    fn test_default_config_trusted_list() {
        let config = SafetyConfig::default();
        assert!(config.trusted_nodes.contains(&"NASA".to_string()));
        assert!(!config.trusted_nodes.contains(&"LocalAgency".to_string()));
        assert_eq!(config.replay_window_secs, 10.0);
    }
}
