//! Multi-room terminal chat over a publish/subscribe transport.
//!
//! Rooms map onto `chat/<room>` topics. The transport is either an MQTT broker or a serverless
//! libp2p gossipsub mesh; [`session::ChatSession`] keeps exactly one room subscribed and filters
//! what reaches the screen.

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod ui;
