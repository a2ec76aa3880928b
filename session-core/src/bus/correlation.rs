//! Request/reply correlation
//!
//! A request carries `meta.correlationId`. The first envelope on
//! `<topic>:resp`, `<topic>:result` or `<topic>:error` carrying the same id
//! resolves it. Replies are still delivered to ordinary subscribers as well.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use shared_types::{split_reply_topic, Envelope, ReplyKind};
use tokio::sync::oneshot;
use ulid::Ulid;

use super::client::{BusClient, BusError};

pub type ReplyResult = Result<Envelope, BusError>;

struct PendingSlot {
    topic: String,
    reply: oneshot::Sender<ReplyResult>,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    slots: HashMap<String, PendingSlot>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, correlation_id: &str, topic: &str) -> oneshot::Receiver<ReplyResult> {
        let (reply, rx) = oneshot::channel();
        self.slots.insert(
            correlation_id.to_string(),
            PendingSlot {
                topic: topic.to_string(),
                reply,
            },
        );
        rx
    }

    /// Complete the request this envelope answers, if any.
    pub fn resolve(&mut self, envelope: &Envelope) -> bool {
        let Some(correlation_id) = envelope.correlation_id() else {
            return false;
        };
        let Some((request_topic, kind)) = split_reply_topic(&envelope.topic) else {
            return false;
        };
        match self.slots.get(correlation_id) {
            Some(slot) if slot.topic == request_topic => {}
            _ => return false,
        }
        let Some(slot) = self.slots.remove(correlation_id) else {
            return false;
        };

        let result = match kind {
            ReplyKind::Success => Ok(envelope.clone()),
            ReplyKind::Failure => Err(BusError::Remote {
                topic: slot.topic,
                payload: envelope.payload.clone(),
            }),
        };
        // Requester may have timed out already
        let _ = slot.reply.send(result);
        true
    }

    pub fn cancel(&mut self, correlation_id: &str) {
        self.slots.remove(correlation_id);
    }

    /// Drop every slot; waiting requesters observe a closed channel.
    pub fn clear(&mut self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl BusClient {
    /// Publish `payload` on `topic` and wait for the correlated reply.
    ///
    /// A reply on `<topic>:error` resolves to [`BusError::Remote`]. No reply
    /// within `timeout` yields [`BusError::Timeout`].
    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: impl Serialize,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        self.request_envelope(Envelope::with_payload(topic, payload)?, timeout)
            .await
    }

    pub async fn request_envelope(&self, envelope: Envelope, timeout: Duration) -> Result<Envelope, BusError> {
        let correlation_id = Ulid::new().to_string();
        let envelope = envelope.with_correlation_id(correlation_id.clone());
        let topic = envelope.topic.clone();

        // Registered before sending so a fast reply cannot be missed
        let reply = self.register_pending(&correlation_id, &topic);
        if let Err(e) = self.send(envelope) {
            self.cancel_pending(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                self.cancel_pending(&correlation_id);
                tracing::warn!(
                    topic = %topic,
                    correlation_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(BusError::Timeout {
                    topic,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
