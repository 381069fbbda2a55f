pub mod app;
pub mod sink;

pub use app::{ChatApp, LineOutcome, ask_identity, prompt};
pub use sink::TerminalSink;
