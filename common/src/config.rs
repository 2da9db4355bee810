use std::path::PathBuf;
use std::time::Duration;

use crate::CHANNEL_NAME;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ASSET_URL: &str = "http://127.0.0.1:8080/bundles";
const DEFAULT_ORIGIN: &str = "http://localhost:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Settings shared by the host and worker sides of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub channel: String,
    pub request_timeout: Duration,
    pub channel_capacity: usize,
    /// Base URL the host fetches bundles from.
    pub asset_url: String,
    /// Directory holding one store file per origin. In-memory when unset.
    pub store_path: Option<PathBuf>,
    pub origin: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            channel: CHANNEL_NAME.to_owned(),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            asset_url: DEFAULT_ASSET_URL.to_owned(),
            store_path: None,
            origin: DEFAULT_ORIGIN.to_owned(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BridgeConfig::default();
        let request_timeout = match lookup("BRIDGE_TIMEOUT_MS") {
            Some(value) => Duration::from_millis(parse_positive("BRIDGE_TIMEOUT_MS", value)? as u64),
            None => defaults.request_timeout,
        };
        let channel_capacity = match lookup("BRIDGE_CHANNEL_CAPACITY") {
            Some(value) => parse_positive("BRIDGE_CHANNEL_CAPACITY", value)?,
            None => defaults.channel_capacity,
        };

        Ok(BridgeConfig {
            channel: lookup("BRIDGE_CHANNEL").unwrap_or(defaults.channel),
            request_timeout,
            channel_capacity,
            asset_url: lookup("BRIDGE_ASSET_URL").unwrap_or(defaults.asset_url),
            store_path: lookup("BRIDGE_STORE_PATH").map(PathBuf::from),
            origin: lookup("BRIDGE_ORIGIN").unwrap_or(defaults.origin),
        })
    }
}

fn parse_positive(var: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber { var, value }),
    }
}
