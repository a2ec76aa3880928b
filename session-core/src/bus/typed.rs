//! Typed publish/subscribe over the [`Topic`] table

use std::time::Duration;

use shared_types::topics::Topic;
use shared_types::Envelope;

use super::client::{BusClient, BusError, Subscription};

/// Wrap a typed callback into a raw one. Payloads that fail to decode are
/// logged and skipped.
pub(crate) fn typed_callback<T, F>(callback: F) -> impl Fn(&serde_json::Value, &Envelope) + Send + Sync + 'static
where
    T: Topic + 'static,
    F: Fn(T::Payload, &Envelope) + Send + Sync + 'static,
{
    move |payload: &serde_json::Value, envelope: &Envelope| {
        match serde_json::from_value::<T::Payload>(payload.clone()) {
            Ok(decoded) => callback(decoded, envelope),
            Err(e) => {
                tracing::warn!(
                    topic = T::NAME,
                    id = %envelope.id,
                    error = %e,
                    "Dropping payload that does not match topic type"
                );
            }
        }
    }
}

impl BusClient {
    pub fn publish_typed<T: Topic>(&self, payload: &T::Payload) -> Result<String, BusError> {
        self.publish(T::NAME, payload)
    }

    pub fn subscribe_typed<T, F>(&self, callback: F) -> Subscription
    where
        T: Topic + 'static,
        F: Fn(T::Payload, &Envelope) + Send + Sync + 'static,
    {
        self.subscribe(T::NAME, typed_callback::<T, F>(callback))
    }

    /// Correlated request whose reply payload is decoded as `Resp`.
    pub async fn request_typed<Req, Resp>(
        &self,
        payload: &Req::Payload,
        timeout: Duration,
    ) -> Result<Resp::Payload, BusError>
    where
        Req: Topic,
        Resp: Topic,
    {
        let reply = self.request(Req::NAME, payload, timeout).await?;
        Ok(serde_json::from_value(reply.payload)?)
    }
}
