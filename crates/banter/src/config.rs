//! CLI configuration, loaded from YAML.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CHAT_URL: &str = "https://claude.ai";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BanterConfig {
    /// Origin of the chat site to drive.
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    /// Launch the browser with a visible window.
    #[serde(default)]
    pub visible: bool,
    /// Browser profile directory that keeps the login between runs.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

fn default_chat_url() -> String {
    DEFAULT_CHAT_URL.to_string()
}

impl Default for BanterConfig {
    fn default() -> Self {
        Self { chat_url: default_chat_url(), visible: false, profile_dir: None }
    }
}

impl BanterConfig {
    /// Load from default locations:
    /// 1. ./banter.yaml
    /// 2. ~/.banter/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<Self, ConfigError> {
        let local_config = PathBuf::from("./banter.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".banter").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(Self::default())
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
