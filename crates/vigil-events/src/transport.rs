use async_trait::async_trait;
use vigil_protocol::Event;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("transport rejected event: {0}")]
    Rejected(String),
}

/// Managed remote event bus. Batch put with per-event success/failure, the
/// shape the upstream service exposes. Credentials are injected into
/// implementations at construction; none travel with events.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn put_events(
        &self,
        events: &[Event],
    ) -> Result<Vec<Result<(), TransportError>>, TransportError>;
}

/// Simpler notification channel used when the remote bus fails its retry
/// budget. Idempotence is the receiver's problem; the bus does not attempt
/// exactly-once.
#[async_trait]
pub trait FallbackTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload_json: serde_json::Value)
        -> Result<(), TransportError>;
}
