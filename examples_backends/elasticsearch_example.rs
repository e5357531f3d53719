use std::sync::Arc;

use elk_log_pipeline::{
    backend::{make_sink_from_config, parse_dsn},
    file_sink::{RotatingFileSink, RotationPolicy},
    normalizer::Normalizer,
    queued_sink::QueuedSink,
    sink::LogSink,
    Fields, Pipeline,
};

#[tokio::main]
async fn main() {
    // Example DSN: elasticsearch://localhost:9200/app-logs
    let dsn = std::env::var("LOG_SHIP_DSN")
        .unwrap_or_else(|_| "elasticsearch://localhost:9200/app-logs".to_string());

    let backend_cfg = parse_dsn(&dsn).expect("invalid LOG_SHIP_DSN");
    let shipper: Arc<dyn LogSink> = make_sink_from_config(&backend_cfg)
        .expect("failed to build elasticsearch backend sink");

    // Requests never wait on the cluster; the queue's task does.
    let (queued, shipping) = QueuedSink::new(shipper, 256);

    let file = RotatingFileSink::new("logs/elk.log", RotationPolicy::default());
    let pipeline = Pipeline::new(Normalizer::new("auth-service"), Arc::new(file)).with_mirror(Arc::new(queued));

    pipeline
        .info("User login successful", Fields::new().with("user_id", "user_4821"))
        .await
        .ok();
    pipeline
        .error(
            "Failed to connect to external service",
            Fields::new().with("status_code", 503).with("duration_ms", 4210),
        )
        .await
        .ok();

    // Dropping the pipeline closes the queue; wait for the backlog to ship.
    drop(pipeline);
    shipping.await.ok();
}
