//! NATS-backed remote transport, compiled under the `nats` feature.

use async_trait::async_trait;
use vigil_protocol::Event;

use crate::{RemoteTransport, TransportError};

/// Relays events to NATS subjects `<prefix>.<topic>`. Authentication is
/// whatever the connection URL carries; nothing is stored here beyond the
/// established client.
pub struct NatsTransport {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsTransport {
    pub async fn connect(
        url: &str,
        subject_prefix: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }
}

#[async_trait]
impl RemoteTransport for NatsTransport {
    async fn put_events(
        &self,
        events: &[Event],
    ) -> Result<Vec<Result<(), TransportError>>, TransportError> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            let subject = format!("{}.{}", self.subject_prefix, event.event_type);
            let outcome = match serde_json::to_vec(event) {
                Ok(bytes) => self
                    .client
                    .publish(subject, bytes.into())
                    .await
                    .map_err(|e| TransportError::Unavailable(e.to_string())),
                Err(e) => Err(TransportError::Rejected(e.to_string())),
            };
            results.push(outcome);
        }
        Ok(results)
    }
}
