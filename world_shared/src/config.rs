//! Configuration system.
//!
//! Loads server configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Port the world-state server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 15243;

/// Largest frame payload accepted unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:15243`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Largest accepted frame payload in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Capacity of the queue between connection readers and the world loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Merge and registration behavior.
    #[serde(default)]
    pub world: WorldConfig,
}

/// What to do when a `register` names an owner id that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRegistration {
    /// Leave the existing owner and its entities untouched.
    #[default]
    Keep,
    /// Replace the owner with a fresh one, dropping its entities.
    Reset,
}

/// Tunables for the world-state core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default)]
    pub duplicate_registration: DuplicateRegistration,
    /// Legacy compatibility: treat `hp: 0` as if `hp` were not sent.
    #[serde(default)]
    pub zero_hp_is_absent: bool,
}

fn default_server_addr() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            max_frame_len: default_max_frame_len(),
            channel_capacity: default_channel_capacity(),
            world: WorldConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
