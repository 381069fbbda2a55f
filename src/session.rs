//! Room membership and message routing.
//!
//! [`ChatSession`] sits between the command loop and the transport's delivery task. All room
//! state is kept behind one async mutex, so a delivery is always filtered against the room that
//! is current at the moment it is displayed.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::common::{ChatMessage, Identity, NetworkEvent, chat_topic};
use crate::error::{SessionError, TransportError};
use crate::network::TransportGateway;

/// Topic-filter wildcards; a room named after one would subscribe to other rooms too.
const ROOM_WILDCARDS: [char; 2] = ['#', '+'];

/// Receives the messages that pass the display filter.
pub trait MessageSink: Send + Sync {
    fn on_displayable_message(&self, sender: &str, content: &str, sent_at: f64);
}

/// Trạng thái phòng hiện tại của phiên.
#[derive(Debug)]
struct RoomState {
    current_room: Option<String>,
    connected: bool,
}

/// What happened to one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the sink.
    Displayed,
    /// Our own message coming back from the broker.
    SelfEcho,
    /// Addressed to a room we are not in (any more).
    OtherRoom,
    NoActiveRoom,
}

/// Why [`run_delivery_loop`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryLoopExit {
    ChannelClosed,
    ConnectionLost(String),
}

pub struct ChatSession {
    identity: Identity,
    gateway: Arc<dyn TransportGateway>,
    sink: Arc<dyn MessageSink>,
    state: Mutex<RoomState>,
}

impl ChatSession {
    /// A connected session with no room joined yet.
    pub fn new(
        identity: Identity,
        gateway: Arc<dyn TransportGateway>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            identity,
            gateway,
            sink,
            state: Mutex::new(RoomState {
                current_room: None,
                connected: true,
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn current_room(&self) -> Option<String> {
        self.state.lock().await.current_room.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Leave the current room (if any), enter `name` and announce the arrival there.
    ///
    /// Only one topic is ever subscribed: the old one is dropped before the new one is taken.
    /// When the switch fails the previous room is restored, or cleared if even that is not
    /// possible.
    pub async fn join_room(&self, name: &str) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::EmptyRoomName);
        }
        if name.contains(ROOM_WILDCARDS) {
            return Err(SessionError::InvalidRoomName(name.to_string()));
        }

        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(SessionError::Disconnected);
        }

        let previous = state.current_room.clone();
        if let Some(previous) = previous.as_deref() {
            self.gateway
                .unsubscribe(&chat_topic(previous))
                .await
                .map_err(|source| {
                    log::warn!("Leaving room {previous} failed: {source}");
                    SessionError::RoomSwitch {
                        room: name.to_string(),
                        source,
                    }
                })?;
        }

        if let Err(source) = self.gateway.subscribe(&chat_topic(name)).await {
            log::warn!("Joining room {name} failed: {source}");
            state.current_room = match previous {
                Some(previous) => self.restore_subscription(previous).await,
                None => None,
            };
            return Err(SessionError::RoomSwitch {
                room: name.to_string(),
                source,
            });
        }

        state.current_room = Some(name.to_string());
        log::info!("{} joined room {name}", self.identity);

        let announcement = format!("{} has joined the room", self.identity);
        match self.publish_to(name, &announcement).await {
            Ok(_) => Ok(()),
            Err(SessionError::Publish(source)) => Err(SessionError::Announcement {
                room: name.to_string(),
                source,
            }),
            Err(err) => Err(err),
        }
    }

    /// Publish `content` to the current room.
    pub async fn send_message(&self, content: &str) -> Result<ChatMessage, SessionError> {
        let state = self.state.lock().await;
        if !state.connected {
            return Err(SessionError::Disconnected);
        }
        let room = state.current_room.as_deref().ok_or(SessionError::NoActiveRoom)?;
        self.publish_to(room, content).await
    }

    /// Decode one inbound payload and display it if it belongs on screen.
    pub async fn on_inbound_delivery(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Delivery, SessionError> {
        let message =
            ChatMessage::decode(payload).map_err(|err| SessionError::MalformedMessage {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;

        let state = self.state.lock().await;
        let Some(current) = state.current_room.as_deref() else {
            return Ok(Delivery::NoActiveRoom);
        };
        if message.room != current {
            return Ok(Delivery::OtherRoom);
        }
        if message.sender == self.identity.as_str() {
            return Ok(Delivery::SelfEcho);
        }

        self.sink
            .on_displayable_message(&message.sender, &message.content, message.sent_at);
        Ok(Delivery::Displayed)
    }

    /// Close the session for good. Later calls do nothing.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Ok(());
        }
        state.connected = false;
        state.current_room = None;
        log::info!("{} disconnected", self.identity);
        self.gateway.disconnect().await
    }

    async fn publish_to(&self, room: &str, content: &str) -> Result<ChatMessage, SessionError> {
        let message = ChatMessage::new(&self.identity, room, content);
        let payload = message.encode()?;
        self.gateway
            .publish(&chat_topic(room), payload)
            .await
            .map_err(|source| {
                log::warn!("Publishing to {room} failed: {source}");
                SessionError::Publish(source)
            })?;
        Ok(message)
    }

    async fn restore_subscription(&self, previous: String) -> Option<String> {
        match self.gateway.subscribe(&chat_topic(&previous)).await {
            Ok(()) => Some(previous),
            Err(err) => {
                log::warn!("Could not return to room {previous}: {err}");
                None
            }
        }
    }
}

/// Delivery context: feed every inbound event through the session until the transport stops.
pub async fn run_delivery_loop(
    session: Arc<ChatSession>,
    mut events: mpsc::UnboundedReceiver<NetworkEvent>,
) -> DeliveryLoopExit {
    while let Some(event) = events.recv().await {
        match event {
            NetworkEvent::Delivery { topic, payload } => {
                match session.on_inbound_delivery(&topic, &payload).await {
                    Ok(Delivery::Displayed) => {}
                    Ok(dropped) => log::trace!("Dropped message on {topic}: {dropped:?}"),
                    Err(err) => log::warn!("{err}"),
                }
            }
            NetworkEvent::Disconnected { reason } => {
                return DeliveryLoopExit::ConnectionLost(reason);
            }
        }
    }
    DeliveryLoopExit::ChannelClosed
}
