use crate::error::SinkError;
use crate::record::CanonicalRecord;
use crate::sink::LogSink;
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the pipeline itself without any
/// file I/O, and as the primary sink of tests that only care about
/// mirrors or filtering.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _record: &CanonicalRecord) -> Result<(), SinkError> {
        Ok(())
    }
}
