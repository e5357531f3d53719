//! Writes a stream of realistic request logs, the way a demo app's
//! log-generation endpoints would, for feeding an ELK stack.
//!
//! Configured through the usual `LOG_*` environment variables.

use std::sync::Arc;

use elk_log_pipeline::config::PipelineConfig;
use elk_log_pipeline::context::{Identity, NetworkInfo};
use elk_log_pipeline::middleware::RequestInterceptor;
use elk_log_pipeline::{Fields, Level, Pipeline, RequestContext};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;

const ACTIONS: [&str; 6] = ["login", "logout", "view_page", "api_call", "database_query", "file_upload"];
const OPERATIONS: [&str; 4] = ["INSERT", "UPDATE", "DELETE", "SELECT"];

/// debug 30%, info 40%, warning 15%, error 10%, critical 5%.
fn random_level(rng: &mut impl Rng) -> Level {
    match rng.gen_range(1..=100) {
        1..=30 => Level::Debug,
        31..=70 => Level::Info,
        71..=85 => Level::Warning,
        86..=95 => Level::Error,
        _ => Level::Critical,
    }
}

fn status_for(level: Level, rng: &mut impl Rng) -> u16 {
    let codes: &[u16] = match level {
        Level::Debug => &[200, 201],
        Level::Info => &[200, 201, 202],
        Level::Warning => &[400, 401, 403, 429],
        Level::Error => &[500, 502, 503],
        Level::Critical => &[500, 503, 504],
    };
    *codes.choose(rng).unwrap_or(&200)
}

fn random_ip(rng: &mut impl Rng) -> String {
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(1..=255),
        rng.gen_range(0..=255),
        rng.gen_range(0..=255),
        rng.gen_range(1..=255)
    )
}

#[tokio::main]
async fn main() {
    let config = PipelineConfig::from_env().expect("invalid LOG_* configuration");
    let pipeline = Arc::new(Pipeline::from_config(&config).expect("build pipeline"));
    let interceptor = RequestInterceptor::new(Arc::clone(&pipeline));

    let count: usize = std::env::args()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(10)
        .min(100);

    for _ in 0..count {
        let (request, level, action, operation, status) = {
            let mut rng = rand::thread_rng();
            let mut request = RequestContext::generate();
            request.identity = Some(Identity {
                user_id: Some(json!(rng.gen_range(1000..=9999))),
                email: None,
            });
            request.network = NetworkInfo {
                ip_address: Some(random_ip(&mut rng)),
                user_agent: Some("log-generator/0.1".to_string()),
            };
            request.routing.method = "POST".to_string();
            request.routing.path = "api/logs/batch".to_string();
            request.routing.url = "http://localhost/api/logs/batch".to_string();
            request.routing.route = Some("logs.batch".to_string());

            let level = random_level(&mut rng);
            let action = *ACTIONS.choose(&mut rng).unwrap_or(&"api_call");
            let operation = *OPERATIONS.choose(&mut rng).unwrap_or(&"SELECT");
            let status = status_for(level, &mut rng);
            (request, level, action, operation, status)
        };

        let pipeline = Arc::clone(&pipeline);
        let out = interceptor
            .handle(request, || async move {
                let mut first = action.chars();
                let message = match first.next() {
                    Some(c) => format!("{}{} operation", c.to_uppercase(), first.as_str()),
                    None => "operation".to_string(),
                };
                let fields = Fields::new()
                    .with("action", action)
                    .with("operation_type", operation)
                    .with("status_code", status);
                if let Err(e) = pipeline.emit(level, &message, fields).await {
                    eprintln!("{}", e);
                }
                status
            })
            .await;

        println!("{} {} -> {}", out.request_id, action, out.response);
    }

    pipeline.flush().await.ok();
}
