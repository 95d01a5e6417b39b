use std::path::PathBuf;

use crate::sync::DEFAULT_PENDING_LIMIT;

pub const ENV_DATA_DIR: &str = "TODO_SYNC_DATA_DIR";
pub const ENV_REMOTE_URL: &str = "TODO_SYNC_REMOTE_URL";
pub const ENV_REMOTE_TOKEN: &str = "TODO_SYNC_REMOTE_TOKEN";
pub const ENV_REMOTE_TIMEOUT: &str = "TODO_SYNC_REMOTE_TIMEOUT_SECS";
pub const ENV_PENDING_LIMIT: &str = "TODO_SYNC_PENDING_LIMIT";

const APP_DIR_NAME: &str = "todo-sync";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug)]
pub enum ConfigError {
    NoDataDir,
    Invalid { key: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoDataDir => write!(f, "could not determine a data directory"),
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub pending_limit: usize,
}

impl AppConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            remote: None,
            pending_limit: DEFAULT_PENDING_LIMIT,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let data_dir = match get(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join(APP_DIR_NAME),
        };

        let timeout_secs = parse_number(ENV_REMOTE_TIMEOUT, get(ENV_REMOTE_TIMEOUT))?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let remote = get(ENV_REMOTE_URL).map(|base_url| RemoteConfig {
            base_url,
            token: get(ENV_REMOTE_TOKEN),
            timeout_secs,
        });

        let pending_limit = parse_number(ENV_PENDING_LIMIT, get(ENV_PENDING_LIMIT))?
            .map(|limit: u64| limit as usize)
            .unwrap_or(DEFAULT_PENDING_LIMIT);

        Ok(Self {
            data_dir,
            remote,
            pending_limit,
        })
    }
}

fn parse_number(key: &str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
            Ok(n) => Ok(Some(n)),
        },
    }
}
