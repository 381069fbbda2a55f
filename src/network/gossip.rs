//! Serverless gateway over a libp2p gossipsub mesh.
//!
//! The swarm lives on its own task; the gateway talks to it through a command channel and
//! gets each answer back on a oneshot.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic};
use libp2p::mdns;
use libp2p::swarm::SwarmEvent;
use libp2p::{Multiaddr, PeerId, Swarm, SwarmBuilder, identity, noise, tcp, yamux};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::common::NetworkEvent;
use crate::config::GossipSettings;
use crate::error::TransportError;

use super::behavior::{ChatBehavior, ChatBehaviorEvent, build_behavior};
use super::gateway::TransportGateway;

const COMMAND_CAPACITY: usize = 32;
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

type Reply = oneshot::Sender<Result<(), TransportError>>;

/// Lệnh gateway gửi xuống swarm.
#[derive(Debug)]
enum SwarmCommand {
    Subscribe { topic: String, reply: Reply },
    Unsubscribe { topic: String, reply: Reply },
    Publish { topic: String, payload: Vec<u8>, reply: Reply },
    Shutdown,
}

pub struct GossipGateway {
    commands: mpsc::Sender<SwarmCommand>,
    local_peer_id: PeerId,
    listen_addr: Multiaddr,
}

impl GossipGateway {
    /// Start the swarm and wait until it listens, at most `connect_timeout`.
    pub async fn connect(
        settings: &GossipSettings,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NetworkEvent>), TransportError> {
        let mut swarm = build_swarm(identity::Keypair::generate_ed25519(), settings.mdns)?;
        let local_peer_id = *swarm.local_peer_id();
        log::info!("Local PeerID: {local_peer_id:?}");

        let listen_addr: Multiaddr = settings.listen_addr.parse().map_err(|err| {
            TransportError::Connect(format!("invalid listen address {}: {err}", settings.listen_addr))
        })?;
        swarm
            .listen_on(listen_addr)
            .map_err(|err| TransportError::Connect(format!("listen failed: {err}")))?;

        for addr in parse_peer_addrs(&settings.peers) {
            log::info!("Dialing peer at {addr}");
            if let Err(err) = swarm.dial(addr.clone()) {
                log::warn!("Failed to dial peer {addr}: {err}");
            }
        }

        let (command_sender, command_receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (ready_sender, ready_receiver) = oneshot::channel();

        let handle = tokio::spawn(run_swarm(swarm, command_receiver, event_sender, ready_sender));

        match timeout(connect_timeout, ready_receiver).await {
            Ok(Ok(listen_addr)) => {
                let gateway = Self {
                    commands: command_sender,
                    local_peer_id,
                    listen_addr,
                };
                Ok((gateway, event_receiver))
            }
            Ok(Err(_)) => Err(TransportError::Connect(
                "swarm stopped before listening".to_string(),
            )),
            Err(_) => {
                handle.abort();
                Err(TransportError::ConnectTimeout(connect_timeout))
            }
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// First address the node listened on.
    pub fn listen_addr(&self) -> &Multiaddr {
        &self.listen_addr
    }

    async fn request(
        &self,
        build: impl FnOnce(Reply) -> SwarmCommand,
    ) -> Result<(), TransportError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| TransportError::Closed)?;
        answer.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl TransportGateway for GossipGateway {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|reply| SwarmCommand::Subscribe { topic, reply })
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|reply| SwarmCommand::Unsubscribe { topic, reply })
            .await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let topic = topic.to_string();
        self.request(|reply| SwarmCommand::Publish {
            topic,
            payload,
            reply,
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.commands
            .send(SwarmCommand::Shutdown)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// TCP (nodelay) + noise + yamux under the chat behaviour.
fn build_swarm(
    local_key: identity::Keypair,
    enable_mdns: bool,
) -> Result<Swarm<ChatBehavior>, TransportError> {
    let swarm = SwarmBuilder::with_existing_identity(local_key)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|err| TransportError::Connect(format!("transport setup failed: {err}")))?
        .with_behaviour(|key| build_behavior(key, enable_mdns))
        .map_err(|err| TransportError::Connect(format!("behaviour setup failed: {err}")))?
        .with_swarm_config(|config| config.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    Ok(swarm)
}

/// Keep the entries that parse as multiaddrs; warn about the rest.
fn parse_peer_addrs(entries: &[String]) -> Vec<Multiaddr> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                log::warn!("Invalid multiaddr `{entry}`: {err}");
                None
            }
        })
        .collect()
}

/// Delivery context for the gossip backend.
///
/// Never waits on the event receiver: commands must keep being answered while the session
/// holds its lock.
async fn run_swarm(
    mut swarm: Swarm<ChatBehavior>,
    mut commands: mpsc::Receiver<SwarmCommand>,
    events: mpsc::UnboundedSender<NetworkEvent>,
    ready: oneshot::Sender<Multiaddr>,
) {
    let mut ready = Some(ready);
    log::info!("Network event loop started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(SwarmCommand::Shutdown) | None => break,
                    Some(command) => handle_command(command, &mut swarm),
                }
            }
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &mut swarm, &events, &mut ready);
            }
        }
    }

    log::info!("Network event loop stopped");
}

fn handle_command(command: SwarmCommand, swarm: &mut Swarm<ChatBehavior>) {
    let gossipsub = &mut swarm.behaviour_mut().gossipsub;
    match command {
        SwarmCommand::Subscribe { topic, reply } => {
            let outcome = gossipsub
                .subscribe(&IdentTopic::new(topic.as_str()))
                .map(|_| ())
                .map_err(|err| TransportError::Subscribe {
                    topic,
                    reason: format!("{err:?}"),
                });
            let _ = reply.send(outcome);
        }
        SwarmCommand::Unsubscribe { topic, reply } => {
            // Leaving a topic we are not in is already the desired end state.
            let _ = gossipsub.unsubscribe(&IdentTopic::new(topic.as_str()));
            let _ = reply.send(Ok(()));
        }
        SwarmCommand::Publish {
            topic,
            payload,
            reply,
        } => {
            let outcome = gossipsub
                .publish(IdentTopic::new(topic.as_str()), payload)
                .map(|_| ())
                .map_err(|err| TransportError::Publish {
                    topic,
                    reason: format!("{err:?}"),
                });
            let _ = reply.send(outcome);
        }
        SwarmCommand::Shutdown => {}
    }
}

fn handle_swarm_event(
    event: SwarmEvent<ChatBehaviorEvent>,
    swarm: &mut Swarm<ChatBehavior>,
    events: &mpsc::UnboundedSender<NetworkEvent>,
    ready: &mut Option<oneshot::Sender<Multiaddr>>,
) {
    match event {
        SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Message {
            message,
            ..
        })) => {
            let delivery = NetworkEvent::Delivery {
                topic: message.topic.to_string(),
                payload: message.data,
            };
            if events.send(delivery).is_err() {
                log::debug!("Delivery receiver dropped; discarding gossip message");
            }
        }
        SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
            for (peer_id, _) in list {
                log::debug!("mDNS discovered {peer_id}");
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }
        }
        SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
            for (peer_id, _) in list {
                log::debug!("mDNS expired {peer_id}");
                swarm
                    .behaviour_mut()
                    .gossipsub
                    .remove_explicit_peer(&peer_id);
            }
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            log::info!("Listening on {address:?}");
            if let Some(ready) = ready.take() {
                let _ = ready.send(address);
            }
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            log::debug!("Connected to {peer_id}");
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            log::debug!("Connection to {peer_id} closed");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_settings() -> GossipSettings {
        GossipSettings {
            listen_addr: "/ip4/127.0.0.1/tcp/0".to_string(),
            peers: Vec::new(),
            mdns: false,
        }
    }

    #[test]
    fn invalid_peer_addresses_are_skipped() {
        let addrs = parse_peer_addrs(&[
            "/ip4/127.0.0.1/tcp/4001".to_string(),
            "not-a-multiaddr".to_string(),
        ]);

        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].to_string(), "/ip4/127.0.0.1/tcp/4001");
    }

    #[tokio::test]
    async fn invalid_listen_address_fails_to_connect() {
        let settings = GossipSettings {
            listen_addr: "nowhere".to_string(),
            ..loopback_settings()
        };

        let result = GossipGateway::connect(&settings, Duration::from_secs(5)).await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn lone_node_subscribes_but_cannot_publish() {
        let (gateway, _events) = GossipGateway::connect(&loopback_settings(), Duration::from_secs(5))
            .await
            .expect("swarm should start listening");

        gateway.subscribe("chat/general").await.unwrap();
        gateway.unsubscribe("chat/general").await.unwrap();
        gateway.subscribe("chat/random").await.unwrap();

        let published = gateway.publish("chat/random", b"{}".to_vec()).await;
        assert!(matches!(published, Err(TransportError::Publish { .. })));

        gateway.disconnect().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn undrained_deliveries_do_not_stall_commands() {
        // given: two loopback nodes in the same topic, A never reads its deliveries
        let (a, _a_events) = GossipGateway::connect(&loopback_settings(), Duration::from_secs(5))
            .await
            .unwrap();
        let b_settings = GossipSettings {
            peers: vec![a.listen_addr().to_string()],
            ..loopback_settings()
        };
        let (b, _b_events) = GossipGateway::connect(&b_settings, Duration::from_secs(5))
            .await
            .unwrap();
        a.subscribe("chat/x").await.unwrap();
        b.subscribe("chat/x").await.unwrap();

        let mut reached = false;
        for attempt in 0..50 {
            let hello = format!("hello {attempt}").into_bytes();
            if b.publish("chat/x", hello).await.is_ok() {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(reached, "B never saw A in chat/x");

        // when
        for n in 0..400 {
            let _ = b.publish("chat/x", format!("flood {n}").into_bytes()).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        // then
        let answered = timeout(Duration::from_secs(3), a.subscribe("chat/y")).await;
        assert!(matches!(answered, Ok(Ok(()))));
    }
}
