pub mod commands;
pub mod events;
pub mod types;

pub use commands::UserCommand;
pub use events::NetworkEvent;
pub use types::{ChatMessage, Identity, chat_topic};
