//! Inbound envelope handlers.
//!
//! A handler is the receiving end of a channel registration: it gets the
//! raw envelope and returns whatever the participant answers.

use crate::core::{Error, Result};
use crate::envelope::{Envelope, EnvelopeCodec};
use crate::safety::{SafetyEnvelope, SafetyLayer};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Receiving side of a channel participant.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle an envelope delivered from `sender`.
    async fn receive(&self, sender: &str, envelope: Envelope) -> Result<serde_json::Value>;

    /// Participant kind, used by audits and broadcast filters.
    fn kind(&self) -> &str {
        "node"
    }
}

/// Opens envelopes addressed to one identity and returns the payload.
///
/// With a safety layer attached the decrypted payload must itself be a
/// [`SafetyEnvelope`], which is re-validated before its payload is released.
pub struct DecryptingHandler {
    id: String,
    kind: String,
    codec: EnvelopeCodec,
    safety: Option<Arc<SafetyLayer>>,
}

impl DecryptingHandler {
    /// Handler opening envelopes addressed to `id`, with no safety layer.
    pub fn new(id: &str, codec: EnvelopeCodec) -> Self {
        Self {
            id: id.to_string(),
            kind: "node".to_string(),
            codec,
            safety: None,
        }
    }

    /// Re-validate recovered payloads through `safety`.
    pub fn with_safety(mut self, safety: Arc<SafetyLayer>) -> Self {
        self.safety = Some(safety);
        self
    }

    /// Set the participant kind (e.g. "satellite", "drone").
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    /// Identity whose key opens delivered envelopes.
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl InboundHandler for DecryptingHandler {
    async fn receive(&self, sender: &str, envelope: Envelope) -> Result<serde_json::Value> {
        let payload: serde_json::Value = self.codec.open_value(&self.id, sender, &envelope)?;
        debug!(recipient = %self.id, sender, "Packet decrypted");

        match &self.safety {
            Some(safety) => {
                let inner: SafetyEnvelope<serde_json::Value> = serde_json::from_value(payload)
                    .map_err(|e| Error::DeserializationError(e.to_string()))?;
                safety.unwrap(inner)
            }
            None => Ok(payload),
        }
    }

    fn kind(&self) -> &str {
        &self.kind
    }
}
