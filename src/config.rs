use std::env;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:7420/rpc";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    NoHomeDir,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub config_path: PathBuf,
    pub bridge_url: String,
    pub log_filter: Option<String>,
}

impl Config {
    /// The config file location derives from the home directory alone. The
    /// environment can pick the bridge endpoint and log filter but never
    /// where credentials are read from.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        let config_path = home.join(".config").join("tg").join("config.json5");

        let bridge_url = env::var("TG_BRIDGE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRIDGE_URL.to_string());
        let bridge_url = bridge_url.trim_end_matches('/').to_string();

        let log_filter = env::var("TG_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .ok()
            .filter(|filter| !filter.trim().is_empty());

        Ok(Self {
            config_path,
            bridge_url,
            log_filter,
        })
    }
}
