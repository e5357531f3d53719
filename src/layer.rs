use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::record::{CanonicalRecord, ExceptionInfo, Fields, EXCEPTION_KEY};
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets whose events are never fed back into the pipeline: this crate's
/// own diagnostics, and the HTTP stack the shipping mirror runs on. Shipping
/// a record makes the HTTP client log, and those events would be shipped in
/// turn.
const IGNORED_TARGETS: &[&str] = &[
    "elk_log_pipeline",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "rustls",
    "tokio_rustls",
    "want",
];

/// `true` if `target` is one of [`IGNORED_TARGETS`] or a module below one.
fn is_ignored_target(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target
            .strip_prefix(ignored)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// `tracing_subscriber` layer that turns `tracing` events into pipeline
/// records.
///
/// Filtering and normalization (including the request context snapshot)
/// happen on the emitting thread, so each record carries the context of the
/// request that produced it. The normalized record is then queued on a
/// bounded channel and written by one background task, keeping file I/O off
/// the `tracing` call path.
pub struct PipelineLayer {
    pipeline: Arc<Pipeline>,
    sender: mpsc::Sender<CanonicalRecord>,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full.
    pub dropped_events: Arc<AtomicU64>,
}

impl PipelineLayer {
    /// Create a new layer and spawn the task that drains its channel into
    /// `pipeline`'s sinks.
    ///
    /// Must be called from within a Tokio runtime. The task ends once the
    /// layer (and with it the sending half) is dropped and the queue is
    /// drained.
    pub fn new(pipeline: Arc<Pipeline>, buffer: usize) -> (Self, JoinHandle<()>) {
        // Enforce a minimal buffer to avoid degenerate configs.
        let buffer = buffer.max(16);

        let (tx, mut rx) = mpsc::channel::<CanonicalRecord>(buffer);

        let writer = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = writer.write(&record).await {
                    eprintln!("error writing log record: {}", e);
                }
            }
            if let Err(e) = writer.flush().await {
                eprintln!("error flushing log sinks: {}", e);
            }
        });

        (Self {
            pipeline,
            sender: tx,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }, handle)
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        if is_ignored_target(meta.target()) {
            return;
        }
        let level = Level::from_tracing(meta.level());
        if !self.pipeline.enabled(level) {
            return;
        }

        let mut fields = Fields::new();
        let mut message = String::new();
        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let Some(record) = self.pipeline.prepare(level, &message, fields) else {
            return;
        };

        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_e) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("log channel full, dropping log record");
            }
        }
    }
}

use tracing::field::{Field, Visit};

/// Collects `tracing` fields into pipeline [`Fields`].
///
/// The implicit `message` field becomes the record message; error-typed
/// fields become the record's exception.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut String,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        } else {
            self.fields.insert(field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name(), value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name(), value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.fields.set_exception(ExceptionInfo::from_dyn_error(value));
        if field.name() != EXCEPTION_KEY {
            self.fields.insert(field.name(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = format!("{:?}", value);
        } else {
            self.fields.insert(field.name(), format!("{:?}", value));
        }
    }
}
