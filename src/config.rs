use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

/// Which publish/subscribe backend carries the chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// An MQTT broker (e.g. mosquitto).
    #[default]
    Mqtt,
    /// Serverless libp2p gossipsub mesh.
    Gossip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportKind,
    /// Upper bound on the connect handshake.
    pub connect_timeout_secs: u64,
    pub broker: BrokerSettings,
    pub gossip: GossipSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// MQTT QoS level 0, 1 or 2. Anything else is treated as 0.
    pub qos: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipSettings {
    pub listen_addr: String,
    /// Multiaddrs dialled at startup.
    pub peers: Vec<String>,
    /// Discover peers on the local network.
    pub mdns: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            connect_timeout_secs: 10,
            broker: BrokerSettings::default(),
            gossip: GossipSettings::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            qos: 0,
        }
    }
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            peers: Vec::new(),
            mdns: true,
        }
    }
}

impl AppConfig {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Human readable description of where we connect to.
    pub fn endpoint(&self) -> String {
        match self.transport {
            TransportKind::Mqtt => format!("{}:{}", self.broker.host, self.broker.port),
            TransportKind::Gossip => format!("gossipsub mesh via {}", self.gossip.listen_addr),
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match AppConfig::from_json(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}
