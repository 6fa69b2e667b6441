//! Server configuration loaded from TOML
//!
//! Every field has a default, so a partial file (or no file at all) is a
//! valid configuration. Command-line flags in `main.rs` override the file.

use crate::connection_table::{DEFAULT_CAPACITY, DEFAULT_RECV_CAPACITY};
use crate::error::ConfigError;
use crate::world::MapSpawnList;
use log::info;
use serde::{Deserialize, Serialize};
use shared::LocalNamespace;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_listen_address() -> String {
    format!("0.0.0.0:{}", shared::DEFAULT_PORT)
}

fn default_max_clients() -> usize {
    DEFAULT_CAPACITY
}

fn default_tick_rate() -> u32 {
    shared::DEFAULT_TICK_RATE
}

fn default_recv_buffer_capacity() -> usize {
    DEFAULT_RECV_CAPACITY
}

fn default_max_message_size() -> usize {
    8192
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_trace_path() -> PathBuf {
    PathBuf::from("network.trace")
}

fn default_class_type() -> i32 {
    35
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds, e.g. "0.0.0.0:11900"
    pub listen_address: String,
    /// Connection table capacity
    pub max_clients: usize,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Received bytes a client may have waiting before it is disconnected
    pub recv_buffer_capacity: usize,
    /// Largest accepted message, header included
    pub max_message_size: usize,
    /// Seconds a client may stay connected without sending `Hello` (0 disables)
    pub handshake_timeout_secs: u64,
    /// Horizontal replication radius; unset replicates everything
    pub interest_radius: Option<f32>,
    /// TOML spawn list for the map; unset uses the built-in map
    pub map_file: Option<PathBuf>,
    pub trace_network: bool,
    pub trace_path: PathBuf,
    /// Extra per-message logging
    pub dev_mode: bool,
    /// Class given to masters of clients that never pick one
    pub default_class_type: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_clients: default_max_clients(),
            tick_rate: default_tick_rate(),
            recv_buffer_capacity: default_recv_buffer_capacity(),
            max_message_size: default_max_message_size(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            interest_radius: None,
            map_file: None,
            trace_network: false,
            trace_path: default_trace_path(),
            dev_mode: false,
            default_class_type: default_class_type(),
        }
    }
}

impl ServerConfig {
    /// Reads `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1".into()));
        }
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate {} outside 1..=1000",
                self.tick_rate
            )));
        }
        if self.max_message_size < shared::codec::HEADER_SIZE
            || self.max_message_size > shared::codec::MAX_FRAME_SIZE
        {
            return Err(ConfigError::Invalid(format!(
                "max_message_size {} outside {}..={}",
                self.max_message_size,
                shared::codec::HEADER_SIZE,
                shared::codec::MAX_FRAME_SIZE
            )));
        }
        if self.recv_buffer_capacity < self.max_message_size {
            return Err(ConfigError::Invalid(format!(
                "recv_buffer_capacity {} is smaller than max_message_size {}",
                self.recv_buffer_capacity, self.max_message_size
            )));
        }
        let self_ids = LocalNamespace::SelfMaster.range();
        let slots = (self_ids.end - self_ids.start) as i32;
        if !(0..slots).contains(&self.default_class_type) {
            return Err(ConfigError::Invalid(format!(
                "default_class_type {} outside 0..{}",
                self.default_class_type, slots
            )));
        }
        if let Some(radius) = self.interest_radius {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "interest_radius {} must be positive",
                    radius
                )));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid listen address: {}", self.listen_address))
        })
    }

    /// `None` when the timeout is disabled
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }

    /// The configured spawn list, or the built-in map
    pub fn load_map(&self) -> Result<MapSpawnList, ConfigError> {
        let Some(path) = &self.map_file else {
            return Ok(MapSpawnList::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_rate, 120);
        assert_eq!(config.max_clients, 256);
        assert_eq!(config.recv_buffer_capacity, 32 * 1024 * 4);
        assert_eq!(config.socket_addr().unwrap().port(), 11900);
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("arena-server-does-not-exist.toml");
        assert_eq!(ServerConfig::load(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let path = temp_file(
            "partial.toml",
            r#"
listen_address = "127.0.0.1:4000"
tick_rate = 60
interest_radius = 2500.0
handshake_timeout_secs = 0
"#,
        );
        let config = ServerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.listen_address, "127.0.0.1:4000");
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.interest_radius, Some(2500.0));
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.max_message_size, 8192);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let path = temp_file("broken.toml", "tick_rate = \"fast\"");
        let result = ServerConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            ServerConfig {
                listen_address: "not an address".into(),
                ..ServerConfig::default()
            },
            ServerConfig {
                tick_rate: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                max_clients: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                max_message_size: 2,
                ..ServerConfig::default()
            },
            ServerConfig {
                recv_buffer_capacity: 100,
                ..ServerConfig::default()
            },
            ServerConfig {
                interest_radius: Some(-1.0),
                ..ServerConfig::default()
            },
            ServerConfig {
                default_class_type: 100,
                ..ServerConfig::default()
            },
            ServerConfig {
                default_class_type: -1,
                ..ServerConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_class_type_fits_self_master_range() {
        for class_type in [0, 35, 99] {
            let config = ServerConfig {
                default_class_type: class_type,
                ..ServerConfig::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_map_file_is_loaded() {
        let path = temp_file(
            "map.toml",
            r#"
map_id = 7

[[player_spawns]]
pos = { x = 1.0, y = 2.0, z = 0.0 }
dir = { x = 1.0, y = 0.0, z = 0.0 }

[[npcs]]
doc_id = 42
monster = true
pos = { x = 5.0, y = 5.0, z = 0.0 }
"#,
        );
        let config = ServerConfig {
            map_file: Some(path.clone()),
            ..ServerConfig::default()
        };
        let map = config.load_map();
        std::fs::remove_file(&path).ok();

        let map = map.unwrap();
        assert_eq!(map.map_id, 7);
        assert_eq!(map.player_spawns.len(), 1);
        assert!(map.npcs[0].monster);
        assert_eq!(
            ServerConfig::default().load_map().unwrap(),
            MapSpawnList::default()
        );
    }
}
