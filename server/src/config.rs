//! Server configuration: command-line values plus world definitions from JSON

use serde::Deserialize;
use shared::{DEFAULT_GAME_VERSION, DEFAULT_MAX_FRAME_LENGTH};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_WORLD_NAME: &str = "Town";
const DEFAULT_CAPACITY: usize = 32;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid world file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How a world hands out entity ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// `player_count + 1 + random(111..=999)`, re-rolled on collision
    #[default]
    Random,
    /// Monotonic counter reusing released ids first
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    pub name: String,
    #[serde(default)]
    pub spawn_x: f32,
    #[serde(default)]
    pub spawn_y: f32,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub id_strategy: IdStrategy,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl WorldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawn_x: 0.0,
            spawn_y: 0.0,
            capacity: DEFAULT_CAPACITY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            id_strategy: IdStrategy::Random,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize)]
struct WorldsFile {
    worlds: Vec<WorldConfig>,
}

/// Parses `{ "worlds": [ ... ] }`
pub fn parse_worlds(json: &str) -> Result<Vec<WorldConfig>, ConfigError> {
    let file: WorldsFile = serde_json::from_str(json)?;
    Ok(file.worlds)
}

pub fn load_worlds(path: &Path) -> Result<Vec<WorldConfig>, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_worlds(&json)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tick_rate: u32,
    pub max_clients: usize,
    pub game_version: String,
    pub max_frame_length: usize,
    /// Silence allowed before a connection reaches a world roster
    pub handshake_timeout_ms: u64,
    pub worlds: Vec<WorldConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            tick_rate: 20,
            max_clients: 64,
            game_version: DEFAULT_GAME_VERSION.to_string(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            handshake_timeout_ms: DEFAULT_TIMEOUT_MS,
            worlds: vec![WorldConfig::new(DEFAULT_WORLD_NAME)],
        }
    }
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick rate must be positive".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid("handshake timeout must be positive".into()));
        }
        if self.max_frame_length < 8 {
            return Err(ConfigError::Invalid(format!(
                "max frame length {} cannot hold a message",
                self.max_frame_length
            )));
        }
        if self.worlds.is_empty() {
            return Err(ConfigError::Invalid("at least one world is required".into()));
        }

        let mut names = HashSet::new();
        for world in &self.worlds {
            if !names.insert(world.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate world name {:?}",
                    world.name
                )));
            }
            if world.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "world {:?} has zero capacity",
                    world.name
                )));
            }
            if world.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "world {:?} has zero player timeout",
                    world.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worlds[0].name, DEFAULT_WORLD_NAME);
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_worlds_with_defaults() {
        let worlds = parse_worlds(
            r#"{ "worlds": [
                { "name": "Town", "spawn_x": 12.5, "spawn_y": -4.0, "capacity": 2 },
                { "name": "Dungeon", "timeout_ms": 2500, "id_strategy": "sequential" }
            ] }"#,
        )
        .unwrap();

        assert_eq!(worlds.len(), 2);
        assert_eq!(worlds[0].spawn_x, 12.5);
        assert_eq!(worlds[0].capacity, 2);
        assert_eq!(worlds[0].id_strategy, IdStrategy::Random);
        assert_eq!(worlds[1].capacity, DEFAULT_CAPACITY);
        assert_eq!(worlds[1].timeout(), Duration::from_millis(2500));
        assert_eq!(worlds[1].id_strategy, IdStrategy::Sequential);
    }

    #[test]
    fn test_parse_worlds_rejects_bad_json() {
        assert!(matches!(parse_worlds("{ \"worlds\": 3 }"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_worlds(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ServerConfig::default();
        config.worlds.push(WorldConfig::new(DEFAULT_WORLD_NAME));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServerConfig::default();
        config.worlds[0].capacity = 0;
        assert!(config.validate().is_err());

        let config = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            worlds: Vec::new(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            handshake_timeout_ms: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
