//! Error types for the transport layer and the chat session.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`TransportGateway`](crate::network::TransportGateway).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection handshake did not complete in time.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("unsubscribe from {topic} failed: {reason}")]
    Unsubscribe { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The gateway's event loop has already stopped.
    #[error("transport is closed")]
    Closed,
}

/// Failures surfaced by [`ChatSession`](crate::session::ChatSession).
///
/// Everything here is recoverable; the session stays usable after any of them except
/// [`SessionError::Disconnected`], which reports the terminal state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("display name cannot be empty")]
    EmptyIdentity,

    #[error("room name cannot be empty")]
    EmptyRoomName,

    #[error("room name {0} cannot contain '#' or '+'")]
    InvalidRoomName(String),

    #[error("join a room first")]
    NoActiveRoom,

    #[error("session is disconnected")]
    Disconnected,

    /// The switch was aborted and the previous room kept.
    #[error("could not switch to room {room}: {source}")]
    RoomSwitch {
        room: String,
        #[source]
        source: TransportError,
    },

    /// The switch succeeded but the join announcement was not published.
    #[error("joined {room} but the announcement was not sent: {source}")]
    Announcement {
        room: String,
        #[source]
        source: TransportError,
    },

    #[error("message not sent: {0}")]
    Publish(#[source] TransportError),

    #[error("malformed message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
