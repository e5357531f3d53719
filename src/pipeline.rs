//! The explicitly constructed logging pipeline: context store, normalizer
//! and sinks composed per event.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::backend::{make_sink_from_config, parse_dsn, BackendBuildError, DsnError};
use crate::config::PipelineConfig;
use crate::console_sink::ConsoleSink;
use crate::context::ContextStore;
use crate::error::{ContextError, EmitError};
use crate::file_sink::RotatingFileSink;
use crate::level::Level;
use crate::normalizer::Normalizer;
use crate::queued_sink::QueuedSink;
use crate::record::{CanonicalRecord, Fields};
use crate::sink::LogSink;

/// Records queued for the shipping backend before new ones are dropped.
pub const SHIP_QUEUE_BUFFER: usize = 1024;

/// Error returned by [`Pipeline::from_config`].
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("invalid shipping DSN: {0}")]
    Dsn(#[from] DsnError),

    #[error(transparent)]
    Backend(#[from] BackendBuildError),

    #[error("a shipping backend needs a Tokio runtime to run its queue")]
    NoRuntime,
}

/// Request-aware structured logger.
///
/// One instance is built at startup and shared (usually behind an `Arc`)
/// with the request-handling entry point. Every emitted event is merged with
/// the caller's request context, normalized and appended to the primary
/// sink; mirror sinks receive a best-effort copy.
pub struct Pipeline {
    threshold: Level,
    normalizer: Normalizer,
    context: ContextStore,
    primary: Arc<dyn LogSink>,
    mirrors: Vec<Arc<dyn LogSink>>,
}

impl Pipeline {
    /// Pipeline writing to `primary` with an `info` threshold and no mirrors.
    pub fn new(normalizer: Normalizer, primary: Arc<dyn LogSink>) -> Self {
        Self {
            threshold: Level::Info,
            normalizer,
            context: ContextStore::new(),
            primary,
            mirrors: Vec::new(),
        }
    }

    /// Assemble the pipeline described by `config`: a rotating file as the
    /// primary sink, plus the console mirror and shipping backend if enabled.
    ///
    /// The shipping backend is put behind a [`QueuedSink`] so emitters never
    /// wait on the network; with a DSN set this must be called from within a
    /// Tokio runtime.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, BuildError> {
        let file = RotatingFileSink::new(&config.path, config.rotation).with_sync_writes(config.sync_writes);
        let mut pipeline =
            Self::new(Normalizer::new(config.channel.clone()), Arc::new(file)).with_threshold(config.level);

        if config.console {
            pipeline = pipeline.with_mirror(Arc::new(ConsoleSink::stdout()));
        }
        if let Some(dsn) = &config.ship_dsn {
            let backend = parse_dsn(dsn)?;
            let shipper = make_sink_from_config(&backend)?;
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(BuildError::NoRuntime);
            }
            let (queued, _writer) = QueuedSink::new(shipper, SHIP_QUEUE_BUFFER);
            pipeline = pipeline.with_mirror(Arc::new(queued));
        }
        Ok(pipeline)
    }

    pub fn with_threshold(mut self, threshold: Level) -> Self {
        self.threshold = threshold;
        self
    }

    /// Add a best-effort secondary sink. Its failures are never reported.
    pub fn with_mirror(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.mirrors.push(sink);
        self
    }

    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.threshold
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    /// Open the request's context scope on the calling unit of execution.
    pub fn request_start(&self, request_id: &str, metadata: Map<String, Value>) -> Result<(), ContextError> {
        self.context.begin(request_id, metadata)
    }

    /// Close the calling unit's context scope, if any.
    pub fn request_end(&self) {
        self.context.end()
    }

    /// Add fields to the active request context.
    pub fn share_context(&self, fields: Map<String, Value>) -> bool {
        self.context.merge(fields)
    }

    /// Filter and normalize an event against the caller's current context
    /// without writing it.
    ///
    /// Returns `None` when `level` is below the threshold.
    pub fn prepare(&self, level: Level, message: &str, fields: Fields) -> Option<CanonicalRecord> {
        if !self.enabled(level) {
            return None;
        }
        Some(self.normalizer.normalize(level, message, fields, self.context.snapshot()))
    }

    /// Write an already normalized record to every sink.
    pub async fn write(&self, record: &CanonicalRecord) -> Result<(), EmitError> {
        let primary = self.primary.send(record).await;

        for mirror in &self.mirrors {
            if let Err(e) = mirror.send(record).await {
                debug!(error = %e, "log mirror write failed");
            }
        }

        primary.map_err(EmitError::from)
    }

    /// Emit one event.
    ///
    /// The returned error is a warning: the event was lost, nothing else
    /// went wrong, and the caller is expected to continue.
    pub async fn emit(&self, level: Level, message: &str, fields: Fields) -> Result<(), EmitError> {
        match self.prepare(level, message, fields) {
            Some(record) => self.write(&record).await,
            None => Ok(()),
        }
    }

    pub async fn debug(&self, message: &str, fields: Fields) -> Result<(), EmitError> {
        self.emit(Level::Debug, message, fields).await
    }

    pub async fn info(&self, message: &str, fields: Fields) -> Result<(), EmitError> {
        self.emit(Level::Info, message, fields).await
    }

    pub async fn warning(&self, message: &str, fields: Fields) -> Result<(), EmitError> {
        self.emit(Level::Warning, message, fields).await
    }

    pub async fn error(&self, message: &str, fields: Fields) -> Result<(), EmitError> {
        self.emit(Level::Error, message, fields).await
    }

    pub async fn critical(&self, message: &str, fields: Fields) -> Result<(), EmitError> {
        self.emit(Level::Critical, message, fields).await
    }

    /// Flush every sink. Only the primary's failure is reported.
    pub async fn flush(&self) -> Result<(), EmitError> {
        for mirror in &self.mirrors {
            let _ = mirror.flush().await;
        }
        self.primary.flush().await.map_err(EmitError::from)
    }
}
