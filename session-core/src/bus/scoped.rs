//! Per-application view of the shared bus
//!
//! Every envelope sent through a [`ScopedClient`] carries the app's identity
//! in `meta.identity`, overwriting whatever the caller put there.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared_types::topics::Topic;
use shared_types::{Envelope, META_IDENTITY};

use super::client::{BusClient, BusError, Subscription};

#[derive(Clone)]
pub struct ScopedClient {
    bus: BusClient,
    identity: Arc<str>,
}

impl std::fmt::Debug for ScopedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedClient")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl BusClient {
    /// Handle that stamps `identity` on everything it sends.
    pub fn scoped(&self, identity: impl Into<String>) -> ScopedClient {
        ScopedClient {
            bus: self.clone(),
            identity: Arc::from(identity.into()),
        }
    }
}

impl ScopedClient {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn stamp(&self, mut envelope: Envelope) -> Envelope {
        envelope.set_meta(META_IDENTITY, serde_json::Value::String(self.identity.to_string()));
        envelope
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Serialize) -> Result<String, BusError> {
        self.send(Envelope::with_payload(topic, payload)?)
    }

    pub fn send(&self, envelope: Envelope) -> Result<String, BusError> {
        self.bus.send(self.stamp(envelope))
    }

    pub fn publish_typed<T: Topic>(&self, payload: &T::Payload) -> Result<String, BusError> {
        self.publish(T::NAME, payload)
    }

    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: impl Serialize,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        let envelope = self.stamp(Envelope::with_payload(topic, payload)?);
        self.bus.request_envelope(envelope, timeout).await
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&serde_json::Value, &Envelope) + Send + Sync + 'static,
    {
        self.bus.subscribe(topic, callback)
    }

    pub fn subscribe_typed<T, F>(&self, callback: F) -> Subscription
    where
        T: Topic + 'static,
        F: Fn(T::Payload, &Envelope) + Send + Sync + 'static,
    {
        self.bus.subscribe_typed::<T, F>(callback)
    }
}
