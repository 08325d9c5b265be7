//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::session::ManagerConfig;
use crate::storage::{DatabaseConfig, default_database_path};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "DEVICEGATE_CONFIG_DIR";

/// Devicegate configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DbConfig,
    pub sessions: SessionsConfig,
    pub pairing: PairingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database file; the platform data directory is used when unset
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub event_queue_capacity: usize,
    pub max_sessions: Option<usize>,
    pub reconnect_on_startup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub print_qr: bool,
    pub code_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: crate::storage::database::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: crate::domain::session::dispatcher::DEFAULT_QUEUE_CAPACITY,
            max_sessions: None,
            reconnect_on_startup: true,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            print_qr: true,
            code_interval_secs: 20,
        }
    }
}

impl DbConfig {
    /// Database file actually used
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_database_path)
    }
}

impl PairingConfig {
    pub fn code_interval(&self) -> Duration {
        Duration::from_secs(self.code_interval_secs)
    }
}

const KEYS: [&str; 9] = [
    "server.host",
    "server.port",
    "database.path",
    "database.max_connections",
    "sessions.event_queue_capacity",
    "sessions.max_sessions",
    "sessions.reconnect_on_startup",
    "pairing.print_qr",
    "pairing.code_interval_secs",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("devicegate")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            // Return default config without creating file
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(anyhow!("server.host must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.sessions.event_queue_capacity == 0 {
            return Err(anyhow!("sessions.event_queue_capacity must be at least 1"));
        }
        if self.sessions.max_sessions == Some(0) {
            return Err(anyhow!("sessions.max_sessions must be at least 1 when set"));
        }
        if self.pairing.code_interval_secs == 0 {
            return Err(anyhow!("pairing.code_interval_secs must be at least 1"));
        }
        Ok(())
    }

    /// Pool settings for the configured database
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::with_path(self.database.resolved_path())
            .max_connections(self.database.max_connections)
    }

    /// Settings for the session manager
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            event_queue_capacity: self.sessions.event_queue_capacity,
            max_sessions: self.sessions.max_sessions,
            print_qr: self.pairing.print_qr,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "server.host" => Ok(self.server.host.clone()),
            "server.port" => Ok(self.server.port.to_string()),

            "database.path" => Ok(self.database.resolved_path().display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),

            "sessions.event_queue_capacity" => Ok(self.sessions.event_queue_capacity.to_string()),
            "sessions.max_sessions" => Ok(self
                .sessions
                .max_sessions
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string())),
            "sessions.reconnect_on_startup" => Ok(self.sessions.reconnect_on_startup.to_string()),

            "pairing.print_qr" => Ok(self.pairing.print_qr.to_string()),
            "pairing.code_interval_secs" => Ok(self.pairing.code_interval_secs.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `devicegate config show` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "server.host" => {
                if value.trim().is_empty() {
                    return Err(anyhow!("server.host must not be empty"));
                }
                self.server.host = value.trim().to_string();
            }
            "server.port" => {
                self.server.port = value
                    .parse()
                    .with_context(|| format!("Invalid port value: {}", value))?;
            }

            "database.path" => {
                self.database.path = match value.trim() {
                    "" | "default" => None,
                    path => Some(PathBuf::from(path)),
                };
            }
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("database.max_connections must be at least 1"));
                }
                self.database.max_connections = max;
            }

            "sessions.event_queue_capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid event_queue_capacity value: {}", value))?;
                if capacity == 0 {
                    return Err(anyhow!("sessions.event_queue_capacity must be at least 1"));
                }
                self.sessions.event_queue_capacity = capacity;
            }
            "sessions.max_sessions" => {
                self.sessions.max_sessions = match value.trim() {
                    "" | "none" | "unlimited" => None,
                    n => {
                        let max: usize = n
                            .parse()
                            .with_context(|| format!("Invalid max_sessions value: {}", value))?;
                        if max == 0 {
                            return Err(anyhow!("sessions.max_sessions must be at least 1"));
                        }
                        Some(max)
                    }
                };
            }
            "sessions.reconnect_on_startup" => {
                self.sessions.reconnect_on_startup = parse_bool(value)?;
            }

            "pairing.print_qr" => {
                self.pairing.print_qr = parse_bool(value)?;
            }
            "pairing.code_interval_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid code_interval_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("pairing.code_interval_secs must be at least 1"));
                }
                self.pairing.code_interval_secs = secs;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `devicegate config show` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(anyhow!("Invalid boolean value: {}", value)),
    }
}
