use std::{fs, io, path::Path, path::PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use skein_bus::SocketOptions;
use tracing::info;

#[derive(Debug)]
pub enum ConfigLoadError {
    NotFound,
    ParseError(String),
    IoError(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::NotFound => write!(f, "Config file not found"),
            ConfigLoadError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigLoadError::IoError(msg) => write!(f, "IO error reading config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

/// Plugin-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// How many times per second a blocking spin pumps its node
    pub spin_rate_hz: u32,

    /// Messages a topic buffers before slow subscribers start losing them
    pub topic_capacity: usize,

    /// Options every new socket starts with
    pub socket: SocketOptions,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            spin_rate_hz: 100,
            topic_capacity: skein_bus::broker::DEFAULT_TOPIC_CAPACITY,
            socket: SocketOptions::default(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "skein")
}

impl PluginConfig {
    /// `config.toml` in the platform config directory, if one can be determined
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Directory for log files and other runtime output
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::default_path().ok_or(ConfigLoadError::NotFound)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigLoadError::NotFound,
            _ => ConfigLoadError::IoError(e.to_string()),
        })?;
        let config =
            toml::from_str(&content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        info!(target: "plugin", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!(target: "plugin", "Saved config to {}", path.display());
        Ok(())
    }

    /// Interval between pumps of a blocking spin
    pub fn spin_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(1) / self.spin_rate_hz.max(1)
    }
}
