use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chat::relay::MAX_CONTENT_CHARS;

/// Chatline realtime messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "chatline-server", version, about = "Chatline realtime messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "CHATLINE_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "CHATLINE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./chatline.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "CHATLINE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "CHATLINE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Message relay limits (loaded from [relay] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    /// Presence broadcast options (loaded from [presence] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceConfig>,

    /// Connection keepalive (loaded from [ws] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws: Option<WsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum message length in characters (default: 1000)
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_content_chars: MAX_CONTENT_CHARS,
        }
    }
}

fn default_max_content_chars() -> usize {
    MAX_CONTENT_CHARS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Also emit user-online-status / user-offline-status (default: false)
    #[serde(default)]
    pub legacy_events: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings (default: 25)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 20)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 25,
            pong_timeout_secs: 20,
        }
    }
}

impl WsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }
}

fn default_ping_interval() -> u64 {
    25
}

fn default_pong_timeout() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./chatline.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            relay: None,
            presence: None,
            ws: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATLINE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        Self::figment(cli).extract()
    }

    fn figment(cli: Config) -> Figment {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATLINE_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    pub fn presence(&self) -> PresenceConfig {
        self.presence.clone().unwrap_or_default()
    }

    pub fn ws(&self) -> WsConfig {
        self.ws.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chatline Server Configuration
# Place this file at ./chatline.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATLINE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Message Relay ----
# [relay]

# Maximum message length in characters (default: 1000)
# max_content_chars = 1000

# ---- Presence ----
# [presence]

# Also broadcast user-online-status / user-offline-status for older clients
# legacy_events = false

# ---- WebSocket Keepalive ----
# [ws]
# ping_interval_secs = 25
# pong_timeout_secs = 20
"#
    .to_string()
}
