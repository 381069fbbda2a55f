use async_trait::async_trait;

use crate::error::TransportError;

/// Publish/subscribe primitives the chat session drives.
///
/// Implementations own the physical connection and the subscription list. Inbound traffic is
/// not part of this trait: each backend's `connect` hands back the single
/// `mpsc::UnboundedReceiver<NetworkEvent>` that carries it.
#[async_trait]
pub trait TransportGateway: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Fire-and-forget; delivery semantics are whatever the backend provides.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Close the connection. The delivery channel ends shortly after.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
