use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Tiền tố topic cho mọi phòng chat.
pub const TOPIC_PREFIX: &str = "chat/";

/// Map a room name onto its broker topic.
///
/// Every client that wants to talk to another one must derive topics the same way.
pub fn chat_topic(room: &str) -> String {
    format!("{TOPIC_PREFIX}{room}")
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Tên hiển thị của người dùng, cố định trong suốt phiên.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Result<Self, SessionError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Domain model đại diện một tin nhắn chat.
///
/// The serialized form is a flat JSON object with exactly the keys `username`, `room`,
/// `content` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "username")]
    pub sender: String,
    pub room: String,
    pub content: String,
    #[serde(rename = "timestamp")]
    pub sent_at: f64,
}

impl ChatMessage {
    pub fn new(sender: &Identity, room: &str, content: &str) -> Self {
        Self {
            sender: sender.as_str().to_string(),
            room: room.to_string(),
            content: content.to_string(),
            sent_at: now_secs(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Author's timestamp converted to local time, if it is representable.
    pub fn sent_at_local(&self) -> Option<DateTime<Local>> {
        local_time(self.sent_at)
    }
}

pub(crate) fn local_time(secs: f64) -> Option<DateTime<Local>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).map(|utc| utc.with_timezone(&Local))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    #[test]
    fn chat_topic_prefixes_room() {
        assert_eq!(chat_topic("general"), "chat/general");
        assert_eq!(chat_topic(""), "chat/");
    }

    #[test]
    fn identity_rejects_blank_names() {
        assert!(matches!(Identity::new(""), Err(SessionError::EmptyIdentity)));
        assert!(matches!(Identity::new("   "), Err(SessionError::EmptyIdentity)));
        assert_eq!(alice().as_str(), "alice");
    }

    #[test]
    fn wire_format_uses_original_field_names() {
        let message = ChatMessage {
            sender: "alice".into(),
            room: "general".into(),
            content: "hello".into(),
            sent_at: 1_700_000_000.5,
        };

        let value: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 4);
        assert_eq!(object["username"], "alice");
        assert_eq!(object["room"], "general");
        assert_eq!(object["content"], "hello");
        assert_eq!(object["timestamp"], 1_700_000_000.5);
    }

    #[test]
    fn decode_accepts_integer_timestamps() {
        let payload = br#"{"username":"bob","room":"general","content":"hi","timestamp":1700000000}"#;

        let message = ChatMessage::decode(payload).unwrap();

        assert_eq!(message.sender, "bob");
        assert_eq!(message.sent_at, 1_700_000_000.0);
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let payload = br#"{"username":"bob","content":"hi","timestamp":1}"#;
        assert!(ChatMessage::decode(payload).is_err());
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(ChatMessage::decode(b"not json at all").is_err());
        assert!(ChatMessage::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn new_message_is_stamped_now() {
        let before = now_secs();
        let message = ChatMessage::new(&alice(), "general", "");
        let after = now_secs();

        assert!(message.sent_at >= before && message.sent_at <= after);
        assert_eq!(message.content, "");
        assert!(message.sent_at_local().is_some());
    }

    #[test]
    fn local_time_rejects_nan() {
        assert!(local_time(f64::NAN).is_none());
    }
}
