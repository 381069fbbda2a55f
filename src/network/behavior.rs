use std::collections::hash_map::DefaultHasher;
use std::error::Error;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub;
use libp2p::mdns;
use libp2p::swarm::NetworkBehaviour;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::identity;

#[derive(NetworkBehaviour)]
pub struct ChatBehavior {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Gossipsub with content-addressed message ids, and mDNS when `enable_mdns` is set.
///
/// No topic is subscribed here; rooms are joined through the gateway.
pub fn build_behavior(
    local_key: &identity::Keypair,
    enable_mdns: bool,
) -> Result<ChatBehavior, Box<dyn Error + Send + Sync>> {
    // Hai tin nhắn giống hệt nhau (cùng người gửi, phòng, nội dung, thời điểm) là một.
    let message_id_fn = |message: &gossipsub::Message| {
        let mut hasher = DefaultHasher::new();
        message.data.hash(&mut hasher);
        gossipsub::MessageId::from(hasher.finish().to_string())
    };

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(5))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(message_id_fn)
        .build()?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(local_key.clone()),
        gossipsub_config,
    )?;

    let mdns = if enable_mdns {
        Some(mdns::tokio::Behaviour::new(
            mdns::Config::default(),
            local_key.public().to_peer_id(),
        )?)
    } else {
        None
    };

    Ok(ChatBehavior {
        gossipsub,
        mdns: Toggle::from(mdns),
    })
}
