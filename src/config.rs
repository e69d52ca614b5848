use serde::Deserialize;
use std::fmt;

#[derive(Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub key_bag_path: String,
    pub noop_interval_seconds: i64,
}

#[derive(Debug)]
pub enum ConfigError {
    FileNotFound(String),
    ParseError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {msg}"),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound(path.to_owned()))?;

    let config: Config =
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if config.noop_interval_seconds <= 0 {
        return Err(ConfigError::InvalidValue(
            "noop_interval_seconds must be positive".to_owned(),
        ));
    }

    Ok(config)
}
