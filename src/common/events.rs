/// Sự kiện từ tầng mạng gửi lên phiên chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Raw payload received on a subscribed topic.
    Delivery { topic: String, payload: Vec<u8> },
    /// The connection dropped after the handshake. No further events follow.
    Disconnected { reason: String },
}
