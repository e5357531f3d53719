use std::path::PathBuf;

use crate::env::{
    env_opt, parse_bool, APP_ENV_ENV, LOG_CHANNEL_ENV, LOG_CONSOLE_ENV, LOG_LEVEL_ENV, LOG_MAX_FILES_ENV,
    LOG_MAX_SIZE_ENV, LOG_PATH_ENV, LOG_SHIP_DSN_ENV, LOG_SYNC_WRITES_ENV,
};
use crate::error::ConfigError;
use crate::file_sink::RotationPolicy;
use crate::level::Level;

pub const DEFAULT_LOG_PATH: &str = "logs/elk.log";
pub const DEFAULT_CHANNEL: &str = "app";

/// Deployment-wide pipeline settings.
///
/// Loaded once at startup and then only read.
///
/// **Fields**
/// - `level`: events below this severity are dropped before normalization.
/// - `path`: active NDJSON file; archives live next to it.
/// - `rotation`: size threshold and archive retention.
/// - `channel`: logical source name stamped on every record.
/// - `console`: mirror records to a colorized console.
/// - `sync_writes`: `fsync` after each record.
/// - `ship_dsn`: optional shipping backend, see [`crate::backend::parse_dsn`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub level: Level,
    pub path: PathBuf,
    pub rotation: RotationPolicy,
    pub channel: String,
    pub console: bool,
    pub sync_writes: bool,
    pub ship_dsn: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            path: PathBuf::from(DEFAULT_LOG_PATH),
            rotation: RotationPolicy::default(),
            channel: DEFAULT_CHANNEL.to_string(),
            console: false,
            sync_writes: false,
            ship_dsn: None,
        }
    }
}

impl PipelineConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_opt)
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// An unrecognized `LOG_LEVEL` falls back to the default threshold with a
    /// warning on stderr; malformed numbers and booleans are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(LOG_LEVEL_ENV) {
            match raw.parse() {
                Ok(level) => config.level = level,
                Err(e) => eprintln!("{}; using `{}`", e, config.level),
            }
        }
        if let Some(path) = lookup(LOG_PATH_ENV) {
            config.path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(LOG_MAX_SIZE_ENV) {
            config.rotation.max_file_size = parse_number(LOG_MAX_SIZE_ENV, &raw)?;
        }
        if let Some(raw) = lookup(LOG_MAX_FILES_ENV) {
            config.rotation.max_files = parse_number(LOG_MAX_FILES_ENV, &raw)?;
        }
        if let Some(channel) = lookup(LOG_CHANNEL_ENV) {
            config.channel = channel;
        }

        config.console = match lookup(LOG_CONSOLE_ENV) {
            Some(raw) => parse_flag(LOG_CONSOLE_ENV, &raw)?,
            None => lookup(APP_ENV_ENV)
                .map(|env| matches!(env.trim().to_ascii_lowercase().as_str(), "development" | "local"))
                .unwrap_or(false),
        };
        if let Some(raw) = lookup(LOG_SYNC_WRITES_ENV) {
            config.sync_writes = parse_flag(LOG_SYNC_WRITES_ENV, &raw)?;
        }
        config.ship_dsn = lookup(LOG_SHIP_DSN_ENV);

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    parse_bool(raw).ok_or_else(|| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        expected: "true or false",
    })
}
