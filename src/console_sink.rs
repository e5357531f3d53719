use crate::error::SinkError;
use crate::record::CanonicalRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Human-readable mirror of the record stream for development.
///
/// Lines look like `2024-03-09T14:05:07.123456+00:00 INFO app: message {"k":"v"}`
/// with the level colorized. This sink is never rotated.
pub struct ConsoleSink {
    writer: Mutex<Box<dyn Write + Send>>,
    ansi: bool,
}

impl ConsoleSink {
    /// Colorized output on stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()), true)
    }

    pub fn new(writer: Box<dyn Write + Send>, ansi: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            ansi,
        }
    }

    fn render(&self, record: &CanonicalRecord) -> String {
        let level = if self.ansi {
            match record.level.as_str() {
                "DEBUG" => record.level.blue().to_string(),
                "INFO" => record.level.green().to_string(),
                "WARNING" => record.level.yellow().to_string(),
                "ERROR" => record.level.red().to_string(),
                _ => record.level.white().on_red().bold().to_string(),
            }
        } else {
            record.level.clone()
        };

        let mut line = format!(
            "{} {} {}: {}",
            record.timestamp, level, record.channel, record.message
        );
        if !record.context.is_empty() {
            line.push(' ');
            line.push_str(&serde_json::Value::Object(record.context.clone()).to_string());
        }
        if let Some(exception) = &record.exception {
            line.push_str(&format!("\n  {}: {}", exception.class, exception.message));
        }
        line.push('\n');
        line
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let line = self.render(record);
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .write_all(line.as_bytes())
            .map_err(|source| SinkError::Io {
                path: PathBuf::from("<console>"),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::normalizer::Normalizer;
    use crate::record::{ExceptionInfo, Fields};
    use serde_json::Map;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn renders_plain_line_without_ansi() {
        let buf = SharedBuf::default();
        let sink = ConsoleSink::new(Box::new(buf.clone()), false);
        let record = Normalizer::new("nextjs").normalize(
            Level::Error,
            "Failed to add todo",
            Fields::new()
                .with("title", "milk")
                .with_exception(ExceptionInfo::new("MongoError", "timeout")),
            Map::new(),
        );

        sink.send(&record).await.unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains(" ERROR nextjs: Failed to add todo {\"title\":\"milk\"}"));
        assert!(out.contains("\n  MongoError: timeout\n"));
        assert!(!out.contains('\u{1b}'));
    }
}
