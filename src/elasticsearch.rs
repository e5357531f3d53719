use crate::error::SinkError;
use crate::record::CanonicalRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound on one bulk request, connect included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ships records to an Elasticsearch or OpenSearch index via the HTTP
/// bulk API.
#[derive(Clone)]
pub struct BulkSink {
    client: Client,
    /// Base URL of the cluster, e.g. "http://elasticsearch:9200".
    base_url: String,
    /// Target index name.
    index: String,
}

impl BulkSink {
    /// Sink for `index` on the cluster at `base_url`, with
    /// [`DEFAULT_TIMEOUT`] per request.
    pub fn new(base_url: String, index: String) -> Result<Self, SinkError> {
        Self::with_timeout(base_url, index, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: String, index: String, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(BulkSink {
            client,
            base_url,
            index,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/_bulk", self.base_url.trim_end_matches('/'))
    }

    /// Action line followed by the document line, both newline-terminated.
    fn bulk_body(&self, record: &CanonicalRecord) -> Result<String, SinkError> {
        let action = json!({ "index": { "_index": self.index } });
        Ok(format!("{}\n{}", action, record.to_json_line()?))
    }
}

#[async_trait]
impl LogSink for BulkSink {
    async fn send(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let body = self.bulk_body(record)?;
        let resp = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        check_bulk_response(status, body)
    }
}

/// Map a `_bulk` response to a result.
///
/// The bulk API answers 200 even when individual documents are rejected and
/// signals that with a top-level `"errors": true`.
fn check_bulk_response(status: u16, body: String) -> Result<(), SinkError> {
    if !(200..300).contains(&status) {
        return Err(SinkError::Rejected { status, body });
    }
    let has_item_errors = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("errors").and_then(Value::as_bool))
        .unwrap_or(false);
    if has_item_errors {
        return Err(SinkError::Rejected { status, body });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use crate::normalizer::Normalizer;
    use crate::record::Fields;
    use serde_json::{Map, Value};

    #[test]
    fn bulk_body_is_two_ndjson_lines() {
        let sink = BulkSink::new("http://elasticsearch:9200/".into(), "app-logs".into()).unwrap();
        let record = Normalizer::new("app").normalize(Level::Info, "User login successful", Fields::new(), Map::new());

        let body = sink.bulk_body(&record).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert!(body.ends_with('\n'));
        assert_eq!(lines.len(), 2);

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "app-logs");
        let doc: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["message"], "User login successful");
        assert_eq!(sink.endpoint(), "http://elasticsearch:9200/_bulk");
    }

    #[test]
    fn item_level_bulk_errors_are_rejections() {
        let body = r#"{"took":3,"errors":true,"items":[{"index":{"status":400,"error":{"type":"mapper_parsing_exception"}}}]}"#;
        match check_bulk_response(200, body.to_string()) {
            Err(SinkError::Rejected { status, body }) => {
                assert_eq!(status, 200);
                assert!(body.contains("mapper_parsing_exception"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn clean_bulk_response_is_accepted() {
        let body = r#"{"took":3,"errors":false,"items":[{"index":{"status":201}}]}"#;
        assert!(check_bulk_response(200, body.to_string()).is_ok());
        assert!(check_bulk_response(200, String::new()).is_ok());
        assert!(matches!(
            check_bulk_response(503, "unavailable".to_string()),
            Err(SinkError::Rejected { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn stalled_cluster_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = tokio::spawn(async move {
            // Accept and hold the connection without ever answering.
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let sink = BulkSink::with_timeout(format!("http://{}", addr), "app-logs".into(), Duration::from_millis(200)).unwrap();
        let record = Normalizer::new("app").normalize(Level::Info, "stalled", Fields::new(), Map::new());

        let result = tokio::time::timeout(Duration::from_secs(5), sink.send(&record)).await;
        assert!(matches!(result, Ok(Err(SinkError::Http(_)))));
        accepted.abort();
    }
}
