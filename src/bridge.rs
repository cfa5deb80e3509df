//! Bridge orchestrator.
//!
//! Owns the consume → process → produce → commit loop and the component
//! lifecycle. The commit-ordering invariant lives here: an inbound
//! offset is committed only after the whole batch's output has been
//! flushed to the outbound topic, so at most one uncommitted batch can
//! ever be redelivered.

use crate::api::ApiClient;
use crate::config::BridgeConfig;
use crate::kafka::{BridgeConsumer, BridgeProducer, ConsumedBatch};
use crate::metrics::Metrics;
use crate::serialization::{MessageCodec, Record, RecordValue};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(60);
const READY_INTERVAL: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// How often (in consumed messages) aggregate metrics are logged.
const METRICS_LOG_EVERY: u64 = 100;

/// Cooperative cancellation token.
///
/// Set by the host's shutdown hook (e.g. a ctrl-c handler) and observed
/// between batches; it never preempts an in-flight HTTP call or flush.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Connecting,
    Running,
    Stopping,
    Closed,
}

/// The bridge itself: one logical worker driving the whole pipeline.
pub struct Bridge {
    config: Arc<BridgeConfig>,
    metrics: Arc<Metrics>,
    consumer: BridgeConsumer,
    producer: BridgeProducer,
    api: ApiClient,
    shutdown: ShutdownFlag,
    state: BridgeState,
    /// Selected once from the endpoint path: `/invocations` endpoints
    /// speak the model-serving request shape.
    use_invocations: bool,
    consumed_at_last_log: u64,
}

impl Bridge {
    /// Builds all components. Fails fast on invalid configuration or an
    /// unloadable Avro schema, before any connection is made.
    pub fn new(config: BridgeConfig, shutdown: ShutdownFlag) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let codec = Arc::new(MessageCodec::from_config(&config)?);

        let consumer = BridgeConsumer::new(
            Arc::clone(&config),
            Arc::clone(&codec),
            Arc::clone(&metrics),
            shutdown.clone(),
        );
        let producer = BridgeProducer::new(
            Arc::clone(&config),
            Arc::clone(&codec),
            Arc::clone(&metrics),
        );
        let api = ApiClient::new(&config, Arc::clone(&metrics))?;
        let use_invocations = config.api_endpoint.contains("/invocations");

        Ok(Self {
            config,
            metrics,
            consumer,
            producer,
            api,
            shutdown,
            state: BridgeState::Created,
            use_invocations,
            consumed_at_last_log: 0,
        })
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Connects both Kafka sides and blocks until the processing
    /// endpoint reports ready. Any failure here aborts startup.
    async fn connect(&mut self) -> Result<()> {
        self.state = BridgeState::Connecting;
        info!(config = %self.config, "Starting bridge");

        self.consumer.connect()?;
        self.producer.connect()?;

        if !self.api.wait_for_ready(READY_TIMEOUT, READY_INTERVAL).await {
            return Err(Error::Timeout {
                message: "processing endpoint is not available".to_string(),
            });
        }

        Ok(())
    }

    /// Runs the bridge until stopped or a fatal error occurs.
    ///
    /// Fatal errors are logged and re-raised after cleanup; the process
    /// is expected to exit nonzero and be restarted by its supervisor.
    pub async fn run(&mut self) -> Result<()> {
        let result = match self.connect().await {
            Ok(()) => {
                self.state = BridgeState::Running;
                info!(
                    input_topic = %self.config.input_topic,
                    output_topic = %self.config.output_topic,
                    api_url = %format!("{}{}", self.config.api_base(), self.config.api_endpoint),
                    "Bridge running"
                );
                self.run_loop().await
            }
            Err(e) => Err(e),
        };

        self.state = BridgeState::Stopping;
        self.close();
        self.state = BridgeState::Closed;

        if let Err(e) = &result {
            error!(error = %e, "Bridge terminated with error");
        }
        result
    }

    /// Requests a graceful stop; the current batch is the last.
    pub fn stop(&self) {
        self.shutdown.request_stop();
        self.consumer.stop();
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            let Some(batch) = self.consumer.next_batch().await? else {
                info!("Stop requested, leaving bridge loop");
                return Ok(());
            };

            self.handle_batch(batch).await;
            self.maybe_log_metrics();
        }
    }

    /// Processes one consumed batch end to end.
    ///
    /// A processing failure drops the whole batch without committing its
    /// offsets; redelivery happens via the consumer group on restart.
    async fn handle_batch(&mut self, batch: ConsumedBatch) {
        for (raw, error_text) in &batch.failures {
            self.producer
                .produce_to_dead_letter(&raw.payload, error_text, &raw.topic);
        }

        if batch.records.is_empty() {
            return;
        }

        let inputs: Vec<Record> = batch.records.iter().map(|(r, _)| r.clone()).collect();

        let results = if self.use_invocations {
            self.api.call_invocations(&inputs).await
        } else {
            self.api.call_batch(&inputs).await
        };

        let Some(results) = results else {
            error!(
                batch_size = batch.records.len(),
                "Batch processing failed, no results from API; dropping batch"
            );
            return;
        };

        let results = align_results(results, inputs.len());

        let mut enqueue_failures = 0usize;
        for (result, (input, _raw)) in results.into_iter().zip(batch.records.iter()) {
            let envelope = build_envelope(result, input, &self.config.bridge_name);
            let key = extract_key(input);

            if let Err(e) = self.producer.produce(&envelope, None, key.as_deref(), None) {
                error!(error = %e, "Failed to enqueue result");
                enqueue_failures += 1;
            }
        }

        let remaining = self.producer.flush(FLUSH_TIMEOUT);

        // Commit gate: every output of this batch must be enqueued and
        // acknowledged before the inbound offsets move.
        if remaining == 0 && enqueue_failures == 0 {
            if let Err(e) = self.consumer.commit_batch(&batch) {
                error!(error = %e, "Offset commit failed");
            }
        } else {
            error!(
                remaining,
                enqueue_failures,
                "Delivery not guaranteed for this batch; offsets not committed"
            );
        }
    }

    fn maybe_log_metrics(&mut self) {
        let consumed = self.metrics.messages_consumed();
        if consumed - self.consumed_at_last_log >= METRICS_LOG_EVERY {
            self.consumed_at_last_log = consumed;
            info!(metrics = ?self.metrics.snapshot(), "Bridge metrics");
        }
    }

    fn close(&mut self) {
        debug!("Closing bridge");
        self.consumer.stop();
        self.consumer.close();
        self.producer.close();
        info!(metrics = ?self.metrics.snapshot(), "Final bridge metrics");
    }
}

/// Aligns the result list to the input count: short results are padded
/// with empty records, long ones truncated. Lossy but deterministic.
fn align_results(mut results: Vec<RecordValue>, input_count: usize) -> Vec<RecordValue> {
    if results.len() != input_count {
        warn!(
            input_count,
            output_count = results.len(),
            "Result count mismatch, aligning by index"
        );
        results.resize(input_count, RecordValue::Map(Record::new()));
    }
    results
}

/// Wraps one processing result with its source identifiers and the
/// bridge name.
fn build_envelope(result: RecordValue, source: &Record, bridge_name: &str) -> Record {
    let mut src = Record::new();
    src.insert(
        "objectId".to_string(),
        source.get("objectId").cloned().unwrap_or(RecordValue::Null),
    );
    src.insert(
        "candid".to_string(),
        source.get("candid").cloned().unwrap_or(RecordValue::Null),
    );

    let mut envelope = Record::new();
    envelope.insert("result".to_string(), result);
    envelope.insert("source".to_string(), RecordValue::Map(src));
    envelope.insert("bridge".to_string(), RecordValue::Str(bridge_name.to_string()));
    envelope
}

/// Partition/dedup key for an output message: prefer `objectId`, fall
/// back to a stringified `candid`, else none.
fn extract_key(record: &Record) -> Option<String> {
    if let Some(object_id) = record.get("objectId").and_then(RecordValue::as_str) {
        return Some(object_id.to_string());
    }
    record.get("candid").and_then(RecordValue::to_key_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(object_id: Option<&str>, candid: Option<i64>) -> Record {
        let mut record = Record::new();
        if let Some(id) = object_id {
            record.insert("objectId".to_string(), RecordValue::Str(id.to_string()));
        }
        if let Some(candid) = candid {
            record.insert("candid".to_string(), RecordValue::Int(candid));
        }
        record
    }

    #[test]
    fn test_extract_key_prefers_object_id() {
        let record = alert(Some("ZTF21a"), Some(123));
        assert_eq!(extract_key(&record), Some("ZTF21a".to_string()));
    }

    #[test]
    fn test_extract_key_falls_back_to_candid() {
        let record = alert(None, Some(1234567890123));
        assert_eq!(extract_key(&record), Some("1234567890123".to_string()));
    }

    #[test]
    fn test_extract_key_none_when_no_identifier() {
        let record = alert(None, None);
        assert_eq!(extract_key(&record), None);
    }

    #[test]
    fn test_align_pads_short_results() {
        let results = vec![RecordValue::Int(1)];
        let aligned = align_results(results, 3);
        assert_eq!(aligned.len(), 3);
        assert_eq!(aligned[0], RecordValue::Int(1));
        assert_eq!(aligned[1], RecordValue::Map(Record::new()));
        assert_eq!(aligned[2], RecordValue::Map(Record::new()));
    }

    #[test]
    fn test_align_truncates_long_results() {
        let results = vec![
            RecordValue::Int(1),
            RecordValue::Int(2),
            RecordValue::Int(3),
        ];
        let aligned = align_results(results, 2);
        assert_eq!(aligned, vec![RecordValue::Int(1), RecordValue::Int(2)]);
    }

    #[test]
    fn test_align_keeps_exact_results() {
        let results = vec![RecordValue::Int(1), RecordValue::Int(2)];
        let aligned = align_results(results.clone(), 2);
        assert_eq!(aligned, results);
    }

    #[test]
    fn test_envelope_carries_source_and_bridge() {
        let source = alert(Some("ZTF21a"), Some(123));
        let envelope = build_envelope(RecordValue::Map(source.clone()), &source, "test-bridge");

        assert_eq!(
            envelope.get("bridge"),
            Some(&RecordValue::Str("test-bridge".to_string()))
        );
        let RecordValue::Map(src) = envelope.get("source").unwrap() else {
            panic!("source is not a map");
        };
        assert_eq!(
            src.get("objectId"),
            Some(&RecordValue::Str("ZTF21a".to_string()))
        );
        assert_eq!(src.get("candid"), Some(&RecordValue::Int(123)));
    }

    #[test]
    fn test_envelope_null_identifiers_when_missing() {
        let source = Record::new();
        let envelope = build_envelope(RecordValue::Null, &source, "test-bridge");

        let RecordValue::Map(src) = envelope.get("source").unwrap() else {
            panic!("source is not a map");
        };
        assert_eq!(src.get("objectId"), Some(&RecordValue::Null));
        assert_eq!(src.get("candid"), Some(&RecordValue::Null));
    }

    #[test]
    fn test_shutdown_flag_round_trip() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_stopped());
        flag.request_stop();
        assert!(flag.is_stopped());
        assert!(flag.clone().is_stopped());
    }
}
