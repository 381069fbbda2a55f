use std::error::Error;
use std::process;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{self, AsyncBufReadExt, BufReader};

use rust_room_chat::config::{self, AppConfig, TransportKind};
use rust_room_chat::network;
use rust_room_chat::session::{ChatSession, run_delivery_loop};
use rust_room_chat::ui::{ChatApp, TerminalSink, ask_identity, prompt};

#[derive(Parser)]
#[command(
    name = "rust_room_chat",
    version,
    about = "Multi-room publish/subscribe terminal chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Transport backend
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,
    /// MQTT broker host
    #[arg(long, value_name = "HOST")]
    broker: Option<String>,
    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,
    /// Seconds to wait for the connection
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,
    /// Gossip peer multiaddr to dial (repeatable)
    #[arg(long = "peer", value_name = "MULTIADDR")]
    peers: Vec<String>,
    /// Skip the username prompt
    #[arg(long)]
    username: Option<String>,
    /// Skip the room prompt
    #[arg(long)]
    room: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(host) = &self.broker {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = secs;
        }
        if !self.peers.is_empty() {
            config.gossip.peers = self.peers.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    cli.apply_overrides(&mut app_config);

    let mut lines = BufReader::new(io::stdin()).lines();

    let Some(identity) = ask_identity(cli.username.as_deref(), &mut lines).await? else {
        return Ok(());
    };

    println!("Connecting to {}...", app_config.endpoint());
    let client_id = network::new_client_id();
    let (gateway, events) = match network::connect(&app_config, &client_id).await {
        Ok(connected) => connected,
        Err(err) => {
            eprintln!("Failed to connect to broker: {err}. Exiting...");
            process::exit(1);
        }
    };
    println!("Connected successfully");
    println!("-----------------------");

    let session = Arc::new(ChatSession::new(identity, gateway, Arc::new(TerminalSink)));
    let delivery = tokio::spawn(run_delivery_loop(Arc::clone(&session), events));

    let room = match cli.room.clone() {
        Some(room) => Some(room),
        None => prompt(&mut lines, "Enter room name to join: ").await?,
    };

    ChatApp::new(session).run(&mut lines, room, delivery).await;
    Ok(())
}
