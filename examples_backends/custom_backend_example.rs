use std::sync::Arc;

use async_trait::async_trait;
use elk_log_pipeline::{
    error::SinkError,
    init::init_tracing,
    noop_sink::NoopSink,
    normalizer::Normalizer,
    sink::LogSink,
    CanonicalRecord, Pipeline,
};
use tracing::{error, info};

/// Example of integrating a completely custom destination by implementing
/// the `LogSink` trait directly. Imagine this talks to some log shipper
/// for which this crate does not provide a built-in sink.
struct MyCustomShipperSink;

#[async_trait]
impl LogSink for MyCustomShipperSink {
    async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        // Here you would call your own client library for the target system.
        // For the sake of example we just print the JSON line.
        print!("[my-custom-shipper] {}", record.to_json_line()?);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let pipeline = Pipeline::new(Normalizer::new("custom"), Arc::new(NoopSink))
        .with_mirror(Arc::new(MyCustomShipperSink));

    let writer = init_tracing(Arc::new(pipeline)).expect("install tracing subscriber");

    info!("custom backend example started");
    error!(shipper = "my-custom-shipper", "simulated error sent via custom backend");

    // Give the background writer a moment to drain the queue.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    drop(writer);
}
