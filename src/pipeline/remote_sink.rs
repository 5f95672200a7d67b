//! Remote metric sink - posts derived gauges to the ingest endpoint

use crate::estimator_core::record::DerivedMetric;
use crate::pipeline::retry::{HttpRequest, RetryClient};
use crate::pipeline::sink::{MetricSink, SinkError};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize)]
struct WireMetric {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    value: f64,
    timestamp: i64,
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct MetricPayload {
    metrics: Vec<WireMetric>,
}

/// Sends each batch as one ingest payload through the retrying client.
/// The acknowledgment body is logged verbatim, not interpreted.
pub struct RemoteMetricSink {
    client: RetryClient,
    endpoint: String,
    api_key: String,
}

impl RemoteMetricSink {
    pub fn new(client: RetryClient, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

/// Ingest payload for one batch: `[{"metrics": [...]}]`, with the source
/// sample count and derived platform folded into each metric's attributes.
fn build_payload(batch: &[DerivedMetric]) -> Result<String, serde_json::Error> {
    let metrics = batch
        .iter()
        .map(|metric| {
            let mut attributes = serde_json::Map::new();
            for (key, value) in &metric.attributes {
                attributes.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
            attributes.insert("TotalCount".to_string(), serde_json::json!(metric.total_count));
            if let Some(platform) = &metric.platform {
                attributes.insert(
                    "platform".to_string(),
                    serde_json::Value::String(platform.clone()),
                );
            }
            WireMetric {
                name: metric.name.clone(),
                kind: "gauge",
                value: metric.value,
                timestamp: metric.timestamp,
                attributes,
            }
        })
        .collect();

    serde_json::to_string(&[MetricPayload { metrics }])
}

#[async_trait]
impl MetricSink for RemoteMetricSink {
    async fn send(&mut self, batch: &[DerivedMetric]) -> Result<(), SinkError> {
        if batch.is_empty() {
            log::info!("No metrics to send");
            return Ok(());
        }

        let request = HttpRequest {
            url: self.endpoint.clone(),
            body: build_payload(batch)?,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Api-Key".to_string(), self.api_key.clone()),
            ],
        };

        log::info!("Sending {} metrics to the ingest endpoint", batch.len());
        let acknowledgment = self.client.execute(&request).await?;
        log::info!("Submitted: {}", acknowledgment);

        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retry::{HttpResponse, RetryPolicy, Transport, TransportError};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct CapturingTransport {
        requests: Arc<Mutex<Vec<HttpRequest>>>,
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(HttpResponse {
                status: 202,
                body: r#"{"requestId":"abc"}"#.to_string(),
            })
        }
    }

    fn test_metric(value: f64) -> DerivedMetric {
        let mut attributes = HashMap::new();
        attributes.insert("appName".to_string(), "myapp-android".to_string());
        attributes.insert("entity.guid".to_string(), "GUID-1".to_string());
        DerivedMetric {
            name: "mobileCrashCountThreshold".to_string(),
            value,
            timestamp: 1_700_000_060,
            total_count: 100.0,
            platform: Some("android".to_string()),
            attributes,
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = build_payload(&[test_metric(57.8)]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();

        let metric = &parsed[0]["metrics"][0];
        assert_eq!(metric["name"], "mobileCrashCountThreshold");
        assert_eq!(metric["type"], "gauge");
        assert_eq!(metric["value"], 57.8);
        assert_eq!(metric["timestamp"], 1_700_000_060);
        assert_eq!(metric["attributes"]["TotalCount"], 100.0);
        assert_eq!(metric["attributes"]["platform"], "android");
        assert_eq!(metric["attributes"]["entity.guid"], "GUID-1");
    }

    #[test]
    fn test_payload_omits_unknown_platform() {
        let mut metric = test_metric(1.0);
        metric.platform = None;
        let payload = build_payload(&[metric]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(parsed[0]["metrics"][0]["attributes"]
            .get("platform")
            .is_none());
    }

    #[tokio::test]
    async fn test_send_posts_one_batch() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = RetryClient::new(
            Box::new(CapturingTransport {
                requests: requests.clone(),
            }),
            RetryPolicy::default(),
        );
        let mut sink = RemoteMetricSink::new(
            client,
            "http://localhost/metric/v1".to_string(),
            "ingest-key".to_string(),
        );

        sink.send(&[test_metric(57.8), test_metric(42.2)]).await.unwrap();

        let captured = requests.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert!(captured[0]
            .headers
            .contains(&("Api-Key".to_string(), "ingest-key".to_string())));
        let parsed: serde_json::Value = serde_json::from_str(&captured[0].body).unwrap();
        assert_eq!(parsed[0]["metrics"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = RetryClient::new(
            Box::new(CapturingTransport {
                requests: requests.clone(),
            }),
            RetryPolicy::default(),
        );
        let mut sink = RemoteMetricSink::new(
            client,
            "http://localhost/metric/v1".to_string(),
            "ingest-key".to_string(),
        );

        sink.send(&[]).await.unwrap();
        assert!(requests.lock().unwrap().is_empty());
    }
}
