//! Kafka producer wrapper with per-message delivery tracking.
//!
//! Publishes are asynchronous: `produce` only enqueues. Delivery
//! confirmations arrive on rdkafka's poll thread through
//! [`DeliveryContext`], which records outcomes in the shared atomic
//! [`Metrics`]. `flush` is the synchronization point the bridge uses
//! before committing consumer offsets.

use crate::config::BridgeConfig;
use crate::metrics::Metrics;
use crate::serialization::{MessageCodec, Record};
use crate::{Error, Result};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::ClientContext;
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Client context whose delivery callback runs on rdkafka's poll
/// thread; it must only touch the atomic metrics.
pub struct DeliveryContext {
    metrics: Arc<Metrics>,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: ()) {
        match result {
            Ok(msg) => {
                self.metrics.record_produced();
                trace!(
                    topic = msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "Message delivered"
                );
            }
            Err((e, msg)) => {
                self.metrics.record_delivery_failure();
                error!(
                    error = %e,
                    topic = msg.topic(),
                    "Message delivery failed"
                );
            }
        }
    }
}

pub struct BridgeProducer {
    config: Arc<BridgeConfig>,
    codec: Arc<MessageCodec>,
    metrics: Arc<Metrics>,
    producer: Option<ThreadedProducer<DeliveryContext>>,
}

impl BridgeProducer {
    pub fn new(config: Arc<BridgeConfig>, codec: Arc<MessageCodec>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            codec,
            metrics,
            producer: None,
        }
    }

    /// Creates the underlying producer connection.
    pub fn connect(&mut self) -> Result<()> {
        let context = DeliveryContext {
            metrics: Arc::clone(&self.metrics),
        };
        let producer: ThreadedProducer<DeliveryContext> = self
            .config
            .producer_client_config()
            .create_with_context(context)?;

        info!(
            bootstrap_servers = %self.config.kafka_bootstrap_servers,
            output_topic = %self.config.output_topic,
            "Producer connected to Kafka"
        );

        self.producer = Some(producer);
        Ok(())
    }

    /// Serializes and enqueues a single record for asynchronous publish.
    ///
    /// Never blocks on acknowledgement; fails only if serialization or
    /// local enqueueing fails.
    pub fn produce(
        &self,
        record: &Record,
        topic: Option<&str>,
        key: Option<&str>,
        headers: Option<&[(String, String)]>,
    ) -> Result<()> {
        let producer = self.connected()?;
        let topic = topic.unwrap_or(&self.config.output_topic);
        let payload = self.codec.serialize(record)?;

        let mut base: BaseRecord<'_, str, Vec<u8>> = BaseRecord::to(topic).payload(&payload);
        if let Some(key) = key {
            base = base.key(key);
        }
        if let Some(headers) = headers {
            let mut owned = OwnedHeaders::new();
            for (name, value) in headers {
                owned = owned.insert(Header {
                    key: name.as_str(),
                    value: Some(value),
                });
            }
            base = base.headers(owned);
        }

        producer.send(base).map_err(|(e, _)| {
            error!(error = %e, topic, "Failed to produce message");
            Error::Kafka(e)
        })?;

        Ok(())
    }

    /// Enqueues a batch of records, deriving each key with `key_fn`.
    ///
    /// A per-record failure is logged and excluded from the returned
    /// count; it does not abort the rest of the batch.
    pub fn produce_batch<F>(&self, records: &[Record], topic: Option<&str>, key_fn: F) -> usize
    where
        F: Fn(&Record) -> Option<String>,
    {
        let mut queued = 0;
        for record in records {
            let key = key_fn(record);
            match self.produce(record, topic, key.as_deref(), None) {
                Ok(()) => queued += 1,
                Err(e) => error!(error = %e, "Failed to queue message in batch"),
            }
        }

        debug!(
            queued,
            total = records.len(),
            topic = topic.unwrap_or(&self.config.output_topic),
            "Batch queued for production"
        );
        queued
    }

    /// Blocks until all queued messages are acknowledged or the timeout
    /// elapses; returns the number still outstanding.
    ///
    /// A nonzero return means delivery is not guaranteed for this batch
    /// and the caller must not commit consumer offsets.
    pub fn flush(&self, timeout: Duration) -> usize {
        let Some(producer) = &self.producer else {
            return 0;
        };

        if let Err(e) = producer.flush(timeout) {
            warn!(error = %e, "Flush did not complete");
        }

        let remaining = producer.in_flight_count();
        if remaining > 0 {
            warn!(remaining, "Flush timeout with pending messages");
        }
        remaining.max(0) as usize
    }

    /// Best-effort publish of an unprocessable raw payload to the
    /// dead-letter topic. No-op when no dead-letter topic is configured;
    /// failures are logged, never raised.
    pub fn produce_to_dead_letter(&self, original: &[u8], error_text: &str, source_topic: &str) {
        let Some(dlq_topic) = &self.config.dead_letter_topic else {
            return;
        };
        let Ok(producer) = self.connected() else {
            error!("Cannot send to dead-letter topic: producer not connected");
            return;
        };

        let envelope = dead_letter_envelope(
            original,
            error_text,
            source_topic,
            &self.config.bridge_name,
        );
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode dead-letter envelope");
                return;
            }
        };

        let base: BaseRecord<'_, str, Vec<u8>> = BaseRecord::to(dlq_topic).payload(&payload);
        match producer.send(base) {
            Ok(()) => info!(
                dlq_topic = %dlq_topic,
                error = error_text,
                "Message sent to dead-letter topic"
            ),
            Err((e, _)) => error!(error = %e, "Failed to send to dead-letter topic"),
        }
    }

    /// Flushes with a generous timeout and releases the connection.
    pub fn close(&mut self) {
        if self.producer.is_some() {
            let remaining = self.flush(Duration::from_secs(30));
            if remaining > 0 {
                warn!(remaining, "Producer closed with undelivered messages");
            } else {
                info!("Producer closed");
            }
            self.producer = None;
        }
    }

    fn connected(&self) -> Result<&ThreadedProducer<DeliveryContext>> {
        self.producer
            .as_ref()
            .ok_or_else(|| Error::Config("producer not connected; call connect() first".to_string()))
    }
}

/// JSON envelope published to the dead-letter topic. The original
/// payload travels as a hex string so arbitrary bytes survive JSON.
pub(crate) fn dead_letter_envelope(
    original: &[u8],
    error_text: &str,
    source_topic: &str,
    bridge_name: &str,
) -> serde_json::Value {
    serde_json::json!({
        "original_value": hex_encode(original),
        "error": error_text,
        "source_topic": source_topic,
        "bridge_name": bridge_name,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
