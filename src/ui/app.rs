use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, Lines};
use tokio::task::JoinHandle;

use crate::common::{Identity, UserCommand};
use crate::error::SessionError;
use crate::session::{ChatSession, DeliveryLoopExit};

/// Result of handling one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Keep reading; print the feedback line if there is one.
    Continue(Option<String>),
    Quit,
}

/// Terminal command loop on top of a [`ChatSession`].
pub struct ChatApp {
    session: Arc<ChatSession>,
}

impl ChatApp {
    pub fn new(session: Arc<ChatSession>) -> Self {
        Self { session }
    }

    pub async fn handle_line(&self, line: &str) -> LineOutcome {
        match UserCommand::parse(line) {
            UserCommand::Quit => LineOutcome::Quit,
            UserCommand::Join(room) => LineOutcome::Continue(Some(self.join(&room).await)),
            UserCommand::Send(content) => match self.session.send_message(&content).await {
                Ok(_) => LineOutcome::Continue(None),
                Err(SessionError::NoActiveRoom) => {
                    LineOutcome::Continue(Some("Join a room first!".to_string()))
                }
                Err(err) => LineOutcome::Continue(Some(err.to_string())),
            },
        }
    }

    async fn join(&self, room: &str) -> String {
        match self.session.join_room(room).await {
            Ok(()) => format!("Joined room: {room}"),
            Err(SessionError::Announcement { source, .. }) => {
                format!("Joined room: {room} (announcement not sent: {source})")
            }
            Err(err) => err.to_string(),
        }
    }

    /// Read commands until `/quit`, end of input, Ctrl-C or loss of the connection, then
    /// disconnect the session.
    pub async fn run<R>(
        self,
        lines: &mut Lines<R>,
        initial_room: Option<String>,
        mut delivery: JoinHandle<DeliveryLoopExit>,
    ) where
        R: AsyncBufRead + Unpin,
    {
        if let Some(room) = initial_room {
            println!("{}", self.join(&room).await);
        }

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match self.handle_line(&line).await {
                        LineOutcome::Continue(Some(feedback)) => println!("{feedback}"),
                        LineOutcome::Continue(None) => {}
                        LineOutcome::Quit => break,
                    },
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("Failed to read input: {err}");
                        break;
                    }
                },
                exit = &mut delivery => {
                    match exit {
                        Ok(DeliveryLoopExit::ConnectionLost(reason)) => {
                            println!("Connection lost: {reason}");
                        }
                        Ok(DeliveryLoopExit::ChannelClosed) => {
                            log::info!("Delivery channel closed");
                        }
                        Err(err) => log::error!("Delivery task failed: {err}"),
                    }
                    break;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        if let Err(err) = self.session.disconnect().await {
            log::warn!("Disconnect failed: {err}");
        }
        delivery.abort();
        println!("Disconnected from chat");
    }
}

/// Print `label` and read lines until a non-blank one arrives. `None` on end of input.
pub async fn prompt<R>(lines: &mut Lines<R>, label: &str) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        print!("{label}");
        std::io::stdout().flush()?;
        match lines.next_line().await? {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(Some(line.trim().to_string())),
            None => return Ok(None),
        }
    }
}

/// Use `preset` if it is a valid display name, otherwise ask for one. `None` on end of input.
pub async fn ask_identity<R>(
    preset: Option<&str>,
    lines: &mut Lines<R>,
) -> std::io::Result<Option<Identity>>
where
    R: AsyncBufRead + Unpin,
{
    if let Some(name) = preset {
        match Identity::new(name.trim()) {
            Ok(identity) => return Ok(Some(identity)),
            Err(err) => println!("{err}"),
        }
    }

    loop {
        let Some(name) = prompt(lines, "Enter your username: ").await? else {
            return Ok(None);
        };
        match Identity::new(name) {
            Ok(identity) => return Ok(Some(identity)),
            Err(err) => println!("{err}"),
        }
    }
}
