//! Environment variable names used by this crate for configuring the
//! pipeline from a service's deployment environment.
//!
//! These are purely helpers; the pipeline types themselves take a plain
//! [`PipelineConfig`](crate::config::PipelineConfig) and never read the
//! environment on their own.

/// Severity threshold, e.g. `info` or `warning`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Path of the active NDJSON log file.
pub const LOG_PATH_ENV: &str = "LOG_PATH";

/// Rotation threshold in bytes.
pub const LOG_MAX_SIZE_ENV: &str = "LOG_MAX_SIZE";

/// Number of rotated archives to keep.
pub const LOG_MAX_FILES_ENV: &str = "LOG_MAX_FILES";

/// Logical channel name written to every record.
pub const LOG_CHANNEL_ENV: &str = "LOG_CHANNEL";

/// Force the console mirror on (`true`) or off (`false`).
pub const LOG_CONSOLE_ENV: &str = "LOG_CONSOLE";

/// `fsync` after every record when `true`.
pub const LOG_SYNC_WRITES_ENV: &str = "LOG_SYNC_WRITES";

/// Optional shipping backend DSN, e.g. `elasticsearch://elasticsearch:9200/app-logs`.
pub const LOG_SHIP_DSN_ENV: &str = "LOG_SHIP_DSN";

/// Deployment environment; `development` or `local` enables the console
/// mirror unless `LOG_CONSOLE` says otherwise.
pub const APP_ENV_ENV: &str = "APP_ENV";

/// Read an environment variable, treating unset and blank the same.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Interpret common truthy/falsy spellings.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
