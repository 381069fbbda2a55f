use std::io::{self, Write};

use crate::common::types::local_time;
use crate::session::MessageSink;

/// Prints displayable messages to stdout.
#[derive(Debug, Default)]
pub struct TerminalSink;

impl MessageSink for TerminalSink {
    fn on_displayable_message(&self, sender: &str, content: &str, sent_at: f64) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{}", format_line(sender, content, sent_at)) {
            log::warn!("Failed to print message: {err}");
        }
        let _ = stdout.flush();
    }
}

/// `\n[HH:MM:SS] sender: content`, in local time.
pub fn format_line(sender: &str, content: &str, sent_at: f64) -> String {
    let clock = local_time(sent_at)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!("\n[{clock}] {sender}: {content}")
}
