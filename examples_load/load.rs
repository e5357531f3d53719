use std::sync::Arc;
use std::time::Instant;

use elk_log_pipeline::file_sink::{RotatingFileSink, RotationPolicy};
use elk_log_pipeline::noop_sink::NoopSink;
use elk_log_pipeline::normalizer::Normalizer;
use elk_log_pipeline::sink::LogSink;
use elk_log_pipeline::{ContextStore, Fields, Level, Pipeline, RequestContext};

async fn run(label: &str, sink: Arc<dyn LogSink>, n: u64) {
    let pipeline = Pipeline::new(Normalizer::new("load"), sink).with_threshold(Level::Debug);

    let start = Instant::now();
    ContextStore::scope(async {
        let request = RequestContext::generate();
        pipeline
            .request_start(&request.request_id, request.shared_fields())
            .expect("fresh scope");
        for i in 0..n {
            let _ = pipeline
                .error("load test error", Fields::new().with("iteration", i))
                .await;
        }
        pipeline.request_end();
    })
    .await;

    let elapsed = start.elapsed();
    println!("{}: wrote {} events in {:?} (~{:.0} ev/s)",
        label,
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let n: u64 = 100_000;

    run("noop sink", Arc::new(NoopSink), n).await;

    let dir = std::env::temp_dir().join("elk-log-pipeline-load");
    let file = RotatingFileSink::new(dir.join("elk.log"), RotationPolicy::default());
    run("rotating file", Arc::new(file), n).await;
}
