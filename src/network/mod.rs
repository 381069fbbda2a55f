pub mod behavior;
pub mod gateway;
pub mod gossip;
pub mod mqtt;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::common::NetworkEvent;
use crate::config::{AppConfig, TransportKind};
use crate::error::TransportError;

pub use gateway::TransportGateway;
pub use gossip::GossipGateway;
pub use mqtt::MqttGateway;

/// Open the backend selected in `config`.
///
/// Returns once the connection is established (or the configured timeout runs out), together
/// with the receiver every inbound delivery arrives on.
pub async fn connect(
    config: &AppConfig,
    client_id: &str,
) -> Result<(Arc<dyn TransportGateway>, mpsc::UnboundedReceiver<NetworkEvent>), TransportError> {
    match config.transport {
        TransportKind::Mqtt => {
            let (gateway, events) =
                MqttGateway::connect(&config.broker, client_id, config.connect_timeout()).await?;
            Ok((Arc::new(gateway), events))
        }
        TransportKind::Gossip => {
            let (gateway, events) =
                GossipGateway::connect(&config.gossip, config.connect_timeout()).await?;
            log::info!("Gossip node {} ready", gateway.local_peer_id());
            Ok((Arc::new(gateway), events))
        }
    }
}

/// Client id in the form `chat-<unix seconds>-<8 hex chars>`.
pub fn new_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("chat-{}-{}", Utc::now().timestamp(), &suffix[..8])
}
