use crate::error::SinkError;
use crate::record::CanonicalRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Puts a slow sink behind a bounded queue drained by its own task.
///
/// `send` only enqueues, so a stalled destination (an unreachable indexing
/// cluster, say) never holds up the emitting request. When the queue is full
/// the record is dropped and counted.
pub struct QueuedSink {
    sender: mpsc::Sender<CanonicalRecord>,
    /// Records handed to the queue.
    pub enqueued_records: Arc<AtomicU64>,
    /// Records dropped because the queue was full.
    pub dropped_records: Arc<AtomicU64>,
}

impl QueuedSink {
    /// Wrap `inner` and spawn the task that feeds it.
    ///
    /// Must be called from within a Tokio runtime. The task ends once this
    /// sink is dropped and the queue is drained, flushing `inner` last.
    pub fn new(inner: Arc<dyn LogSink>, buffer: usize) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let (tx, mut rx) = mpsc::channel::<CanonicalRecord>(buffer);

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = inner.send(&record).await {
                    debug!(error = %e, "queued log sink write failed");
                }
            }
            if let Err(e) = inner.flush().await {
                debug!(error = %e, "queued log sink flush failed");
            }
        });

        (Self {
            sender: tx,
            enqueued_records: Arc::new(AtomicU64::new(0)),
            dropped_records: Arc::new(AtomicU64::new(0)),
        }, handle)
    }
}

#[async_trait]
impl LogSink for QueuedSink {
    async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        match self.sender.try_send(record.clone()) {
            Ok(()) => {
                self.enqueued_records.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped_records.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::QueueClosed),
        }
    }
}
