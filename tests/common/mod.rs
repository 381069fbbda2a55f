#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_room_chat::common::{ChatMessage, Identity};
use rust_room_chat::error::TransportError;
use rust_room_chat::network::TransportGateway;
use rust_room_chat::session::{ChatSession, MessageSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe(String),
    Unsubscribe(String),
    Publish(String),
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Subscribe,
    Unsubscribe,
    Publish,
}

#[derive(Default)]
struct GatewayState {
    calls: Vec<Call>,
    subscribed: BTreeSet<String>,
    published: Vec<(String, Vec<u8>)>,
    /// (operation, topic) pairs that fail until cleared.
    failing: Vec<(Op, String)>,
    max_subscribed: usize,
}

/// In-memory gateway that records every call and tracks live subscriptions.
#[derive(Default)]
pub struct RecordingGateway {
    state: Mutex<GatewayState>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, op: Op, topic: &str) {
        self.state.lock().unwrap().failing.push((op, topic.to_string()));
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.iter().cloned().collect()
    }

    pub fn max_subscribed(&self) -> usize {
        self.state.lock().unwrap().max_subscribed
    }

    pub fn published(&self) -> Vec<(String, ChatMessage)> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .map(|(topic, payload)| (topic.clone(), ChatMessage::decode(payload).unwrap()))
            .collect()
    }

    fn check(state: &GatewayState, op: Op, topic: &str) -> bool {
        state
            .failing
            .iter()
            .any(|(failing_op, failing_topic)| *failing_op == op && failing_topic == topic)
    }
}

#[async_trait]
impl TransportGateway for RecordingGateway {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Subscribe(topic.to_string()));
        if Self::check(&state, Op::Subscribe, topic) {
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "refused".to_string(),
            });
        }
        state.subscribed.insert(topic.to_string());
        state.max_subscribed = state.max_subscribed.max(state.subscribed.len());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Unsubscribe(topic.to_string()));
        if Self::check(&state, Op::Unsubscribe, topic) {
            return Err(TransportError::Unsubscribe {
                topic: topic.to_string(),
                reason: "refused".to_string(),
            });
        }
        state.subscribed.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Publish(topic.to_string()));
        if Self::check(&state, Op::Publish, topic) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "refused".to_string(),
            });
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Disconnect);
        state.subscribed.clear();
        Ok(())
    }
}

/// Sink that keeps everything it is shown.
#[derive(Default)]
pub struct CollectingSink {
    shown: Mutex<Vec<(String, String)>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }
}

impl MessageSink for CollectingSink {
    fn on_displayable_message(&self, sender: &str, content: &str, _sent_at: f64) {
        self.shown
            .lock()
            .unwrap()
            .push((sender.to_string(), content.to_string()));
    }
}

pub struct Harness {
    pub session: Arc<ChatSession>,
    pub gateway: Arc<RecordingGateway>,
    pub sink: Arc<CollectingSink>,
}

pub fn harness(name: &str) -> Harness {
    let gateway = RecordingGateway::new();
    let sink = CollectingSink::new();
    let session = Arc::new(ChatSession::new(
        Identity::new(name).unwrap(),
        gateway.clone(),
        sink.clone(),
    ));
    Harness {
        session,
        gateway,
        sink,
    }
}

/// Wire payload as another client would publish it.
pub fn payload(sender: &str, room: &str, content: &str) -> Vec<u8> {
    ChatMessage::new(&Identity::new(sender).unwrap(), room, content)
        .encode()
        .unwrap()
}
