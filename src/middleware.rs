//! Framework-agnostic request interception.
//!
//! The host extracts what it knows about an inbound request into a
//! [`RequestContext`] and hands its handler to [`RequestInterceptor::handle`].
//! The interceptor brackets the handler with a context scope and the
//! incoming/completed events, and returns the value for the
//! `X-Request-Id` response header.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::context::{ContextStore, RequestContext};
use crate::error::EmitError;
use crate::pipeline::Pipeline;
use crate::record::Fields;

/// Response header echoing the request id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// The part of a host response the interceptor reads.
pub trait ResponseStatus {
    fn status_code(&self) -> u16;
}

impl ResponseStatus for u16 {
    fn status_code(&self) -> u16 {
        *self
    }
}

impl<T, E> ResponseStatus for Result<T, E>
where
    T: ResponseStatus,
    E: ResponseStatus,
{
    fn status_code(&self) -> u16 {
        match self {
            Ok(resp) => resp.status_code(),
            Err(err) => err.status_code(),
        }
    }
}

/// Handler output plus what the host needs to finish the response.
#[derive(Debug, Clone)]
pub struct Intercepted<T> {
    pub response: T,
    pub request_id: String,
    pub response_time_ms: f64,
}

impl<T> Intercepted<T> {
    /// Header name and value to set on the outgoing response.
    pub fn request_id_header(&self) -> (&'static str, &str) {
        (REQUEST_ID_HEADER, &self.request_id)
    }
}

/// Wraps request handlers with request-scoped logging.
#[derive(Clone)]
pub struct RequestInterceptor {
    pipeline: Arc<Pipeline>,
}

impl RequestInterceptor {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run `handler` inside a fresh request scope.
    ///
    /// A request id is generated when `request.request_id` is empty. Logging
    /// failures are reported through `tracing` and never reach the handler's
    /// result.
    pub async fn handle<F, Fut, T>(&self, request: RequestContext, handler: F) -> Intercepted<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: ResponseStatus,
    {
        ContextStore::scope(self.run(request, handler)).await
    }

    async fn run<F, Fut, T>(&self, mut request: RequestContext, handler: F) -> Intercepted<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: ResponseStatus,
    {
        let started = Instant::now();
        if request.request_id.is_empty() {
            request.request_id = RequestContext::generate().request_id;
        }

        if let Err(e) = self
            .pipeline
            .request_start(&request.request_id, request.shared_fields())
        {
            warn!(error = %e, "request context scope not opened");
        }

        let incoming = Fields::new()
            .with("path", request.routing.path.clone())
            .with("query_params", Value::Object(request.routing.query.clone()))
            .with("has_file", request.routing.has_file);
        report(self.pipeline.info("Incoming request", incoming).await);

        let response = handler().await;

        let response_time_ms = round2(started.elapsed().as_secs_f64() * 1000.0);
        let completed = Fields::new()
            .with("status_code", response.status_code())
            .with("response_time_ms", response_time_ms);
        report(self.pipeline.info("Request completed", completed).await);

        let request_id = self
            .pipeline
            .context()
            .current_request_id()
            .unwrap_or(request.request_id);
        self.pipeline.request_end();

        Intercepted {
            response,
            request_id,
            response_time_ms,
        }
    }
}

fn report(result: Result<(), EmitError>) {
    if let Err(e) = result {
        warn!(error = %e, "request log event dropped");
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::normalizer::Normalizer;
    use crate::record::CanonicalRecord;
    use crate::sink::LogSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<CanonicalRecord>>);

    #[async_trait]
    impl LogSink for Capture {
        async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn interceptor() -> (RequestInterceptor, Arc<Capture>) {
        let capture = Arc::new(Capture::default());
        let pipeline = Pipeline::new(Normalizer::new("todo"), capture.clone());
        (RequestInterceptor::new(Arc::new(pipeline)), capture)
    }

    #[tokio::test]
    async fn brackets_handler_with_incoming_and_completed_events() {
        let (interceptor, capture) = interceptor();

        let mut request = RequestContext::default();
        request.routing.method = "GET".into();
        request.routing.route = Some("todos.index".into());
        request.routing.path = "todos".into();
        request.routing.query.insert("page".into(), json!("2"));
        request.routing.has_file = true;

        let pipeline = Arc::clone(interceptor.pipeline());
        let out = interceptor
            .handle(request, || async move {
                pipeline
                    .info("Fetching todos list", Fields::new().with("user_id", 42))
                    .await
                    .unwrap();
                200u16
            })
            .await;

        assert_eq!(out.response, 200);
        assert_eq!(out.request_id.len(), 36);
        assert_eq!(out.request_id_header(), ("X-Request-Id", out.request_id.as_str()));

        let records = capture.0.lock().unwrap();
        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["Incoming request", "Fetching todos list", "Request completed"]);
        for record in records.iter() {
            assert_eq!(record.context["request_id"], out.request_id.as_str());
            assert_eq!(record.context["route"], "todos.index");
        }
        assert_eq!(records[0].context["path"], "todos");
        assert_eq!(records[0].context["query_params"]["page"], "2");
        assert_eq!(records[0].context["has_file"], true);
        assert!(records[1].context.get("has_file").is_none());
        assert_eq!(records[2].context["status_code"], 200);
        assert!(records[2].context["response_time_ms"].is_f64());
    }

    #[tokio::test]
    async fn keeps_host_supplied_request_id_and_closes_scope() {
        let (interceptor, capture) = interceptor();

        let out = interceptor
            .handle(RequestContext::new("req-123"), || async { Err::<u16, u16>(500) })
            .await;

        assert_eq!(out.request_id, "req-123");
        assert!(!interceptor.pipeline().context().is_active());
        let records = capture.0.lock().unwrap();
        assert_eq!(records[0].context["has_file"], false);
        assert_eq!(records[1].context["status_code"], 500);
    }
}
