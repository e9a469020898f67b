//! Configuration management
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `peercall.{toml,yaml,json}` file in the working directory, then
//! `PEERCALL__SECTION__KEY` environment variables. A bare `PORT` variable
//! overrides the relay port last.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

/// Relay listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Call client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:3500`
    pub server_url: String,
    pub ice_servers: Vec<String>,
    /// Request a camera track in addition to the microphone
    pub video: bool,
    pub invite_timeout_secs: u64,
    pub ringing_timeout_secs: u64,
    pub first_media_timeout_secs: u64,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
}

impl ClientConfig {
    pub fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_secs)
    }

    pub fn ringing_timeout(&self) -> Duration {
        Duration::from_secs(self.ringing_timeout_secs)
    }

    pub fn first_media_timeout(&self) -> Duration {
        Duration::from_secs(self.first_media_timeout_secs)
    }

    pub fn reconnect_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3500".to_string(),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
            ],
            video: true,
            invite_timeout_secs: 30,
            ringing_timeout_secs: 45,
            first_media_timeout_secs: 20,
            reconnect_initial_backoff_ms: 500,
            reconnect_max_backoff_ms: 10_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3500,
            },
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load the layered configuration
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("peercall")
    }

    pub fn load_from(file_stem: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(config::Environment::with_prefix("PEERCALL").separator("__"))
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .build()?
            .try_deserialize()
    }
}
