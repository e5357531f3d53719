use std::path::PathBuf;

/// Error returned by the context store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("a context scope is already active for request `{active_request_id}`")]
    ScopeActive { active_request_id: String },

    #[error("called from a Tokio task without a context scope; wrap the task in `ContextStore::scope`")]
    NoTaskScope,
}

/// Error raised by a [`LogSink`](crate::sink::LogSink) while writing a record.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("log file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("log backend rejected record with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("log queue is full, record dropped")]
    QueueFull,

    #[error("log queue writer has stopped")]
    QueueClosed,

    #[cfg(feature = "elasticsearch")]
    #[error("log backend request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Non-fatal warning handed back to the caller of
/// [`Pipeline::emit`](crate::pipeline::Pipeline::emit).
///
/// The event was dropped from the primary destination; the caller should
/// carry on with its own work.
#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    #[error("primary log sink failed, event dropped: {0}")]
    Sink(#[from] SinkError),
}

/// Error raised while reading configuration from the environment.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {key} has invalid value `{value}`: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}
