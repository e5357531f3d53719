use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::panic::Location;

/// Key under which an error travels inside event fields.
pub const EXCEPTION_KEY: &str = "exception";

/// Normalized, pruned representation of one log event.
///
/// This is the wire format written to the NDJSON file and shipped to the
/// indexing backend. `context` and `extra` are skipped entirely when empty,
/// so a serialized record never carries `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub timestamp: String,
    pub level: String,
    pub level_name: String,
    pub channel: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
}

impl CanonicalRecord {
    /// Serialize as a single JSON object followed by `\n`.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Structured description of an error attached to a log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Type name of the error.
    pub class: String,
    pub message: String,
    /// Numeric error code, `0` when the error carries none.
    #[serde(default)]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub trace: String,
}

impl ExceptionInfo {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            code: 0,
            file: None,
            line: None,
            trace: String::new(),
        }
    }

    /// Build a descriptor from a concrete error value.
    ///
    /// The source location is the caller's, and `trace` renders the
    /// `source()` chain followed by a backtrace when one was captured.
    #[track_caller]
    pub fn from_error<E>(err: &E) -> Self
    where
        E: Error + 'static,
    {
        let location = Location::caller();
        Self {
            class: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            code: 0,
            file: Some(location.file().to_string()),
            line: Some(location.line()),
            trace: render_trace(err, Some(&Backtrace::capture())),
        }
    }

    /// Build a descriptor from a type-erased error, as handed out by
    /// `tracing`'s error field recording. The concrete type is unknown here.
    pub fn from_dyn_error(err: &(dyn Error + 'static)) -> Self {
        Self {
            class: "Error".to_string(),
            message: err.to_string(),
            code: 0,
            file: None,
            line: None,
            trace: render_trace(err, None),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }
}

fn render_trace(err: &(dyn Error + 'static), backtrace: Option<&Backtrace>) -> String {
    let mut out = String::new();
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    let mut depth = 0;
    while let Some(e) = current {
        if depth > 0 {
            out.push('\n');
        }
        out.push_str(&format!("#{} {}", depth, e));
        current = e.source();
        depth += 1;
    }
    if let Some(bt) = backtrace {
        if bt.status() == BacktraceStatus::Captured {
            out.push_str(&format!("\n{}", bt));
        }
    }
    out
}

/// Structured fields supplied with a single log call.
///
/// Values are arbitrary JSON. An error can be attached alongside them; the
/// normalizer lifts it out into the record's top-level `exception`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    values: Map<String, Value>,
    exception: Option<ExceptionInfo>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier value under the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Add a field from any serializable value.
    ///
    /// Values that fail to serialize are stored as their `Debug` rendering
    /// rather than failing the log call.
    pub fn with_serialized<T>(mut self, key: impl Into<String>, value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        let value = serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{:?}", value)));
        self.values.insert(key.into(), value);
        self
    }

    /// Attach an error to be reported under the record's `exception` key.
    #[track_caller]
    pub fn with_error<E>(mut self, err: &E) -> Self
    where
        E: Error + 'static,
    {
        self.exception = Some(ExceptionInfo::from_error(err));
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn set_exception(&mut self, exception: ExceptionInfo) {
        self.exception = Some(exception);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.exception.is_none()
    }

    pub fn into_parts(self) -> (Map<String, Value>, Option<ExceptionInfo>) {
        (self.values, self.exception)
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(values: Map<String, Value>) -> Self {
        Self { values, exception: None }
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { values, exception: None }
    }
}
