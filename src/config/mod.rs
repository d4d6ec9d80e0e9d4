//! # Configuration
//!
//! Gridmud reads a single TOML file. Every section has defaults, so an empty
//! file (or `gridmud init`) yields a working server.
//!
//! - [`ServerConfig`] - listener address and connect greeting
//! - [`StorageConfig`] - where room and player files live
//! - [`WorldConfig`] - map radii and the bounded session-lock wait
//! - [`LoggingConfig`] - log level, log file and security log file
//! - [`SecurityConfig`] - optional Argon2 cost overrides
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 4000
//!
//! [storage]
//! data_dir = "./data"
//!
//! [world]
//! automap_radius = 5
//! max_map_radius = 100
//! lock_wait_ms = 5000
//!
//! [security.argon2]
//! memory_kib = 19456
//! time_cost = 2
//! parallelism = 1
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use argon2::Params;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::mud::session::GREETING;
use crate::world::WorldSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// First line sent on connect.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_greeting() -> String {
    GREETING.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            greeting: default_greeting(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Radius of the map drawn by `look` when automap is on.
    #[serde(default = "default_automap_radius")]
    pub automap_radius: usize,
    /// Largest radius `map <n>` will draw; 0 or anything larger is clamped to this.
    #[serde(default = "default_max_map_radius")]
    pub max_map_radius: usize,
    /// How long a turn waits for its own session lock before answering busy.
    /// Unset waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait_ms: Option<u64>,
}

fn default_automap_radius() -> usize {
    5
}

fn default_max_map_radius() -> usize {
    100
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            automap_radius: default_automap_radius(),
            max_map_radius: default_max_map_radius(),
            lock_wait_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: Some("gridmud.log".to_string()),
            security_file: Some("gridmud-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Argon2 parameters from `[security.argon2]`, unset fields falling back
    /// to the library defaults. `None` if the section is absent or invalid.
    pub fn argon2_params(&self) -> Option<Params> {
        let a = self.security.as_ref()?.argon2.as_ref()?;
        let builder = Params::DEFAULT;
        let mem = a.memory_kib.unwrap_or(builder.m_cost());
        let time = a.time_cost.unwrap_or(builder.t_cost());
        let para = a.parallelism.unwrap_or(builder.p_cost());
        Params::new(mem, time, para, None).ok()
    }

    pub fn world_settings(&self) -> WorldSettings {
        WorldSettings {
            automap_radius: self.world.automap_radius,
            max_map_radius: self.world.max_map_radius.max(1),
            lock_wait: self.world.lock_wait_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.greeting, GREETING);
        assert_eq!(config.storage.data_dir, "./data");
        assert_eq!(config.world.automap_radius, 5);
        assert_eq!(config.world.max_map_radius, 100);
        assert!(config.world.lock_wait_ms.is_none());
        assert!(config.argon2_params().is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 5555

            [world]
            lock_wait_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.server.address(), "0.0.0.0:5555");
        assert_eq!(config.world.max_map_radius, 100);
        let settings = config.world_settings();
        assert_eq!(settings.lock_wait, Some(Duration::from_millis(250)));
        assert_eq!(settings.automap_radius, 5);
    }

    #[test]
    fn test_argon2_overrides() {
        let config: Config = toml::from_str(
            r#"
            [security.argon2]
            memory_kib = 4096
            time_cost = 1
            "#,
        )
        .unwrap();
        let params = config.argon2_params().unwrap();
        assert_eq!(params.m_cost(), 4096);
        assert_eq!(params.t_cost(), 1);
        assert_eq!(params.p_cost(), Params::DEFAULT.p_cost());

        let bad: Config = toml::from_str("[security.argon2]\nmemory_kib = 1\n").unwrap();
        assert!(bad.argon2_params().is_none());
    }

    #[tokio::test]
    async fn test_default_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.server.port, 4000);
        assert_eq!(loaded.logging.file.as_deref(), Some("gridmud.log"));
        assert!(Config::load("/nonexistent/config.toml").await.is_err());
    }
}
