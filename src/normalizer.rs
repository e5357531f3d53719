use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::level::Level;
use crate::record::{CanonicalRecord, ExceptionInfo, Fields, EXCEPTION_KEY};

/// Timestamp layout: microseconds and an explicit offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Turns a raw log call plus a context snapshot into a [`CanonicalRecord`].
///
/// Pruning of empty `context`/`extra` happens here and nowhere else; sinks
/// write whatever they are given.
#[derive(Debug, Clone)]
pub struct Normalizer {
    channel: String,
    extra: Map<String, Value>,
}

impl Normalizer {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            extra: Map::new(),
        }
    }

    /// Static metadata placed under `extra` on every record.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Normalize using the current instant as the timestamp.
    pub fn normalize(
        &self,
        level: Level,
        message: &str,
        fields: Fields,
        context: Map<String, Value>,
    ) -> CanonicalRecord {
        self.normalize_at(Utc::now(), level, message, fields, context)
    }

    /// Normalize with an explicit emission instant.
    pub fn normalize_at(
        &self,
        at: DateTime<Utc>,
        level: Level,
        message: &str,
        fields: Fields,
        context: Map<String, Value>,
    ) -> CanonicalRecord {
        let (values, attached) = fields.into_parts();

        let mut merged = context;
        for (key, value) in values {
            merged.insert(key, value);
        }

        // An attached error wins over anything that arrived as a plain value.
        let exception = match merged.remove(EXCEPTION_KEY) {
            Some(raw) => attached.or_else(|| exception_from_value(raw)),
            None => attached,
        };

        CanonicalRecord {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            level: level.as_str().to_string(),
            level_name: level.as_str().to_string(),
            channel: self.channel.clone(),
            message: message.to_string(),
            context: merged,
            extra: self.extra.clone(),
            exception,
        }
    }
}

fn exception_from_value(raw: Value) -> Option<ExceptionInfo> {
    match raw {
        Value::String(message) => Some(ExceptionInfo::new("Error", message)),
        _ => None,
    }
}
