//! HTTP client for the external processing endpoint.
//!
//! Three call variants share one retry-capable transport: single-record,
//! batch, and model-serving-style `/invocations`. All of them return
//! `None` on failure after logging and counting it; the orchestrator
//! decides what a dropped batch means.

use crate::config::BridgeConfig;
use crate::metrics::Metrics;
use crate::serialization::json::{record_to_json, value_from_json};
use crate::serialization::{Record, RecordValue};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Statuses worth another attempt; everything else in the 4xx/5xx range
/// fails immediately.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    timeout: Duration,
    retry_count: u32,
    retry_delay: Duration,
    metrics: Arc<Metrics>,
}

impl ApiClient {
    pub fn new(config: &BridgeConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            endpoint: config.api_endpoint.clone(),
            timeout: Duration::from_secs(config.api_timeout_secs),
            retry_count: config.api_retry_count.max(1),
            retry_delay: Duration::from_millis(config.api_retry_delay_ms),
            metrics: Arc::clone(&metrics),
        })
    }

    /// Single GET against `/health` with a short timeout. False on any
    /// failure, never an error.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                warn!(error = %e, url = %url, "Health check failed");
                false
            }
        }
    }

    /// Polls the health endpoint until it reports ready or the timeout
    /// elapses. Used once before the main loop begins; a false return is
    /// a fatal startup failure for the bridge.
    pub async fn wait_for_ready(&self, timeout: Duration, interval: Duration) -> bool {
        info!(
            url = %self.base_url,
            timeout_secs = timeout.as_secs(),
            "Waiting for processing endpoint to become available"
        );

        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.health_check().await {
                info!("Processing endpoint is available");
                return true;
            }
            tokio::time::sleep(interval).await;
        }

        error!(
            timeout_secs = timeout.as_secs(),
            "Processing endpoint did not become available within timeout"
        );
        false
    }

    /// Posts `{"data": record}` to the single-record endpoint (the
    /// configured endpoint with any `/batch` suffix removed).
    pub async fn call_single(&self, record: &Record) -> Option<RecordValue> {
        let url = format!("{}{}", self.base_url, self.endpoint.replace("/batch", ""));
        let payload = serde_json::json!({ "data": record_to_json(record) });

        let response = self.post_with_retry(&url, &payload, 1).await?;
        Some(value_from_json(&response))
    }

    /// Posts `{"data": [records]}` to the batch endpoint.
    ///
    /// The response may be a bare list, a list nested under `result`, or
    /// a single object (treated as a singleton list); all three are
    /// normalized to a list of values.
    pub async fn call_batch(&self, records: &[Record]) -> Option<Vec<RecordValue>> {
        let url = format!("{}{}", self.base_url, self.endpoint);
        let payload = serde_json::json!({
            "data": records.iter().map(record_to_json).collect::<Vec<_>>(),
        });

        let start = Instant::now();
        let response = self.post_with_retry(&url, &payload, records.len()).await?;
        debug!(
            url = %url,
            batch_size = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch API call succeeded"
        );

        Some(normalize_enveloped(response, "result"))
    }

    /// Posts `{"inputs": [records]}` to the model-serving `/invocations`
    /// path, normalizing a `predictions`-keyed response or a bare list.
    pub async fn call_invocations(&self, records: &[Record]) -> Option<Vec<RecordValue>> {
        let url = format!("{}/invocations", self.base_url);
        let payload = serde_json::json!({
            "inputs": records.iter().map(record_to_json).collect::<Vec<_>>(),
        });

        let start = Instant::now();
        let response = self.post_with_retry(&url, &payload, records.len()).await?;
        debug!(
            url = %url,
            batch_size = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Invocations call succeeded"
        );

        Some(normalize_enveloped(response, "predictions"))
    }

    /// POSTs with bounded retry: up to `retry_count` attempts total,
    /// exponential backoff from `retry_delay`, retrying only retryable
    /// statuses and connection-level failures.
    async fn post_with_retry(&self, url: &str, payload: &Value, batch_size: usize) -> Option<Value> {
        let mut delay = self.retry_delay;

        for attempt in 1..=self.retry_count {
            match self
                .client
                .post(url)
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(value) => {
                                self.metrics.record_api_call(true);
                                return Some(value);
                            }
                            Err(e) => {
                                // Malformed body is not retryable.
                                self.metrics.record_api_call(false);
                                error!(error = %e, url, "API returned unparsable body");
                                return None;
                            }
                        }
                    }

                    if RETRYABLE_STATUS.contains(&status.as_u16()) {
                        warn!(attempt, status = status.as_u16(), url, "Retryable API status");
                    } else {
                        self.metrics.record_api_call(false);
                        error!(
                            status = status.as_u16(),
                            url, batch_size, "API call failed with non-retryable status"
                        );
                        return None;
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, url, "API request error");
                }
            }

            if attempt < self.retry_count {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        self.metrics.record_api_call(false);
        error!(
            attempts = self.retry_count,
            url, batch_size, "API call failed after exhausting retries"
        );
        None
    }
}

/// Normalizes the heterogeneous response envelopes the endpoint may
/// produce: a bare list, a list under `key`, or a single value treated
/// as a singleton list.
fn normalize_enveloped(response: Value, key: &str) -> Vec<RecordValue> {
    match response {
        Value::Array(items) => items.iter().map(value_from_json).collect(),
        Value::Object(ref map) if map.contains_key(key) => match &map[key] {
            Value::Array(items) => items.iter().map(value_from_json).collect(),
            other => vec![value_from_json(other)],
        },
        other => vec![value_from_json(&other)],
    }
}
