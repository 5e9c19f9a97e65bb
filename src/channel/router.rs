//! Secure channel router.
//!
//! Keeps a registry of addressable participants and moves sealed
//! envelopes to their inbound handlers.

use crate::channel::handler::InboundHandler;
use crate::core::{now, Error, Result, Timestamp};
use crate::envelope::EnvelopeCodec;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Channel configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Simulated link delay range in milliseconds (min, max)
    pub simulated_latency_ms: Option<(u64, u64)>,
}

/// Registry entry visible to audits and filters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Participant identity
    pub id: String,
    /// Handler-reported kind
    pub kind: String,
    /// Registration time
    pub registered_at: Timestamp,
}

/// Selects broadcast targets.
#[derive(Clone)]
pub enum ParticipantFilter {
    /// Every registered participant
    All,
    /// Participants named in the list
    Ids(Vec<String>),
    /// Participants of one kind
    Kind(String),
    /// Arbitrary predicate
    Predicate(Arc<dyn Fn(&ParticipantInfo) -> bool + Send + Sync>),
}

impl ParticipantFilter {
    /// Filter on an id list.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParticipantFilter::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Filter on a predicate.
    pub fn predicate(f: impl Fn(&ParticipantInfo) -> bool + Send + Sync + 'static) -> Self {
        ParticipantFilter::Predicate(Arc::new(f))
    }

    /// Whether `info` is selected.
    pub fn matches(&self, info: &ParticipantInfo) -> bool {
        match self {
            ParticipantFilter::All => true,
            ParticipantFilter::Ids(ids) => ids.iter().any(|id| id == &info.id),
            ParticipantFilter::Kind(kind) => kind == &info.kind,
            ParticipantFilter::Predicate(f) => f(info),
        }
    }
}

/// Channel metrics for monitoring.
#[derive(Clone, Debug, Default)]
pub struct ChannelMetrics {
    pub total_sends: u64,
    pub delivered: u64,
    pub failed: u64,
}

struct Registration {
    info: ParticipantInfo,
    handler: Arc<dyn InboundHandler>,
}

/// Router moving envelopes from one origin identity to registered participants.
pub struct SecureChannel {
    /// Identity that seals and signs outgoing envelopes
    origin: String,
    codec: EnvelopeCodec,
    /// Registered participants, in registration order
    participants: RwLock<Vec<Registration>>,
    config: ChannelConfig,
    metrics: Mutex<ChannelMetrics>,
}

impl SecureChannel {
    /// Create a channel sending as `origin`, issuing its keys if needed.
    pub fn new(origin: &str, codec: EnvelopeCodec, config: ChannelConfig) -> Result<Self> {
        codec.authority().ensure_registered(origin)?;
        Ok(Self {
            origin: origin.to_string(),
            codec,
            participants: RwLock::new(Vec::new()),
            config,
            metrics: Mutex::new(ChannelMetrics::default()),
        })
    }

    /// Sending identity.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Register a participant under a unique id.
    ///
    /// Key material is issued for `id` if the authority has none.
    pub fn register_participant(&self, id: &str, handler: Arc<dyn InboundHandler>) -> Result<()> {
        let mut participants = self.participants.write()?;
        if participants.iter().any(|r| r.info.id == id) {
            return Err(Error::DuplicateIdentity(id.to_string()));
        }
        self.codec.authority().ensure_registered(id)?;
        let info = ParticipantInfo {
            id: id.to_string(),
            kind: handler.kind().to_string(),
            registered_at: now(),
        };
        info!(participant = id, kind = %info.kind, "Participant registered");
        participants.push(Registration { info, handler });
        Ok(())
    }

    /// Remove a participant. Returns whether it was registered.
    pub fn unregister_participant(&self, id: &str) -> Result<bool> {
        let mut participants = self.participants.write()?;
        let before = participants.len();
        participants.retain(|r| r.info.id != id);
        Ok(participants.len() != before)
    }

    /// Registered ids in registration order.
    pub fn participant_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .participants
            .read()?
            .iter()
            .map(|r| r.info.id.clone())
            .collect())
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.participants.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Snapshot of the registry, also written to the log.
    pub fn audit(&self) -> Result<Vec<ParticipantInfo>> {
        let snapshot: Vec<ParticipantInfo> = self
            .participants
            .read()?
            .iter()
            .map(|r| r.info.clone())
            .collect();
        for info in &snapshot {
            info!(participant = %info.id, kind = %info.kind, registered_at = %info.registered_at, "Channel audit");
        }
        Ok(snapshot)
    }

    /// Seal `message` for participant `id`, deliver it and return the
    /// handler's response.
    pub async fn send<T: Serialize + ?Sized>(&self, id: &str, message: &T) -> Result<serde_json::Value> {
        let handler = self.handler(id)?;
        self.record(|m| m.total_sends += 1)?;

        let outcome = self.deliver(id, handler.as_ref(), message).await;

        match &outcome {
            Ok(_) => self.record(|m| m.delivered += 1)?,
            Err(err) => {
                warn!(participant = id, category = %err.category(), error = %err, "Delivery failed");
                self.record(|m| m.failed += 1)?;
            }
        }
        outcome
    }

    /// Send `message` to every participant selected by `filter`.
    ///
    /// One participant's failure never stops delivery to the others; each
    /// outcome is reported under its id.
    pub async fn broadcast<T: Serialize + Sync + ?Sized>(
        &self,
        message: &T,
        filter: &ParticipantFilter,
    ) -> Result<BTreeMap<String, Result<serde_json::Value>>> {
        let targets: Vec<String> = self
            .participants
            .read()?
            .iter()
            .filter(|r| filter.matches(&r.info))
            .map(|r| r.info.id.clone())
            .collect();

        let deliveries = targets.iter().map(|id| async move {
            let outcome = self.send(id, message).await;
            (id.clone(), outcome)
        });
        Ok(join_all(deliveries).await.into_iter().collect())
    }

    /// Snapshot of channel metrics.
    pub fn metrics(&self) -> Result<ChannelMetrics> {
        Ok(self.metrics.lock()?.clone())
    }

    async fn deliver<T: Serialize + ?Sized>(
        &self,
        id: &str,
        handler: &dyn InboundHandler,
        message: &T,
    ) -> Result<serde_json::Value> {
        let envelope = self.codec.seal_value(&self.origin, id, message)?;
        self.simulate_latency().await;
        debug!(origin = %self.origin, participant = id, "Delivering envelope");
        handler.receive(&self.origin, envelope).await
    }

    fn handler(&self, id: &str) -> Result<Arc<dyn InboundHandler>> {
        self.participants
            .read()?
            .iter()
            .find(|r| r.info.id == id)
            .map(|r| r.handler.clone())
            .ok_or_else(|| Error::UnknownParticipant(id.to_string()))
    }

    fn record(&self, update: impl FnOnce(&mut ChannelMetrics)) -> Result<()> {
        update(&mut *self.metrics.lock()?);
        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some((min, max)) = self.config.simulated_latency_ms {
            let delay = if max > min {
                rand::thread_rng().gen_range(min..=max)
            } else {
                min
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}
