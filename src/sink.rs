use crate::error::SinkError;
use crate::record::CanonicalRecord;
use async_trait::async_trait;

/// Asynchronous destination for [`CanonicalRecord`]s produced by the
/// pipeline.
///
/// Implementations transport records to a concrete destination (rotating
/// file, console, an indexing backend). The pipeline awaits `send` inline on
/// the emitting task, so a sink must never hold a lock across anything but
/// its own I/O. Network destinations go behind a
/// [`QueuedSink`](crate::queued_sink::QueuedSink).
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Write a single record.
    ///
    /// **Parameters**
    /// - `record`: fully normalized [`CanonicalRecord`].
    ///
    /// **Returns**
    /// - `Ok(())` once the line has been handed to the destination.
    /// - `Err(..)` if the destination could not be written. The pipeline
    ///   reports this to the caller as a non-fatal warning.
    ///
    /// The whole line must reach the destination in one write so that
    /// concurrent emitters never interleave partial lines.
    async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError>;

    /// Flush any buffered records.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
