//! Kafka consumer wrapper with batching and manual offset management.
//!
//! Auto-commit is disabled: the bridge commits offsets itself, strictly
//! after the corresponding output batch has been flushed downstream.
//! This bounds the at-least-once redelivery window to the last
//! uncommitted batch.

use crate::bridge::ShutdownFlag;
use crate::config::BridgeConfig;
use crate::metrics::Metrics;
use crate::serialization::{MessageCodec, Record};
use crate::{Error, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Sub-timeout for a single poll inside a batch assembly cycle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An opaque inbound payload plus its transport metadata.
///
/// Owned copies only; used for offset commits, key derivation and
/// dead-letter forwarding after the borrowed rdkafka message is gone.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Ordered deserialized records paired with their source messages.
pub type Batch = Vec<(Record, RawMessage)>;

/// One consume cycle's output: the good records plus any raw payloads
/// that failed deserialization (skipped, counted, DLQ candidates).
#[derive(Debug, Default)]
pub struct ConsumedBatch {
    pub records: Batch,
    pub failures: Vec<(RawMessage, String)>,
}

impl ConsumedBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.failures.is_empty()
    }
}

pub struct BridgeConsumer {
    config: Arc<BridgeConfig>,
    codec: Arc<MessageCodec>,
    metrics: Arc<Metrics>,
    shutdown: ShutdownFlag,
    consumer: Option<StreamConsumer>,
}

impl BridgeConsumer {
    pub fn new(
        config: Arc<BridgeConfig>,
        codec: Arc<MessageCodec>,
        metrics: Arc<Metrics>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            codec,
            metrics,
            shutdown,
            consumer: None,
        }
    }

    /// Creates the underlying consumer and subscribes to the input topic.
    pub fn connect(&mut self) -> Result<()> {
        let consumer: StreamConsumer = self.config.consumer_client_config().create()?;
        consumer.subscribe(&[&self.config.input_topic])?;

        info!(
            bootstrap_servers = %self.config.kafka_bootstrap_servers,
            topic = %self.config.input_topic,
            group_id = %self.config.consumer_group_id,
            "Consumer connected to Kafka"
        );

        self.consumer = Some(consumer);
        Ok(())
    }

    /// Consumes one batch, bounded by `batch_size` records and
    /// `batch_timeout_ms` of wall-clock assembly time.
    ///
    /// Polls with short sub-timeouts; a poll returning no message is not
    /// an error. A message that fails deserialization is logged, counted
    /// and excluded from the batch, never retried. Transport-level
    /// errors propagate and are fatal to the run.
    pub async fn consume_batch(&self) -> Result<ConsumedBatch> {
        let consumer = self.connected()?;
        let max_size = self.config.batch_size;
        let deadline = Instant::now() + Duration::from_millis(self.config.batch_timeout_ms);

        let mut batch = ConsumedBatch::default();

        while batch.records.len() < max_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let msg = match tokio::time::timeout(remaining.min(POLL_INTERVAL), consumer.recv())
                .await
            {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => return Err(Error::Kafka(e)),
                // No message within the sub-timeout.
                Err(_) => continue,
            };

            let raw = RawMessage {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(<[u8]>::to_vec),
                payload: msg.payload().unwrap_or_default().to_vec(),
            };

            match self.codec.deserialize(&raw.payload) {
                Ok(record) => {
                    self.metrics.record_consumed();
                    batch.records.push((record, raw));
                }
                Err(e) => {
                    self.metrics.record_deserialization_error();
                    error!(
                        error = %e,
                        topic = %raw.topic,
                        partition = raw.partition,
                        offset = raw.offset,
                        "Failed to deserialize message"
                    );
                    batch.failures.push((raw, e.to_string()));
                }
            }
        }

        if !batch.records.is_empty() {
            debug!(
                batch_size = batch.records.len(),
                topic = %self.config.input_topic,
                "Consumed batch"
            );
        }

        Ok(batch)
    }

    /// Consumes until a non-empty batch arrives or a stop is requested.
    ///
    /// Returns `None` once stopped; the caller's loop terminates there.
    pub async fn next_batch(&self) -> Result<Option<ConsumedBatch>> {
        while !self.shutdown.is_stopped() {
            let batch = self.consume_batch().await?;
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    /// Synchronously commits the highest consumed offset of every
    /// partition touched by the batch.
    ///
    /// Skipped messages that failed deserialization are included: their
    /// offsets advance with the batch and they are never redelivered.
    /// Must only be called once the whole batch's output is delivered;
    /// committing earlier would silently skip unprocessed messages.
    pub fn commit_batch(&self, batch: &ConsumedBatch) -> Result<()> {
        let consumer = self.connected()?;

        let offsets = batch_offsets(batch);
        if offsets.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), offset) in &offsets {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))?;
        }
        consumer.commit(&tpl, CommitMode::Sync)?;

        debug!(partitions = offsets.len(), "Committed batch offsets");
        Ok(())
    }

    /// Signals the consume loop to stop before its next poll.
    pub fn stop(&self) {
        self.shutdown.request_stop();
    }

    /// Releases the underlying connection. Safe to call after `stop`.
    pub fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!("Consumer closed");
        }
    }

    fn connected(&self) -> Result<&StreamConsumer> {
        self.consumer
            .as_ref()
            .ok_or_else(|| Error::Config("consumer not connected; call connect() first".to_string()))
    }
}

/// Highest consumed offset per partition across the whole batch,
/// counting both deserialized records and skipped failures.
pub(crate) fn batch_offsets(batch: &ConsumedBatch) -> BTreeMap<(String, i32), i64> {
    let mut offsets: BTreeMap<(String, i32), i64> = BTreeMap::new();
    let raws = batch
        .records
        .iter()
        .map(|(_, raw)| raw)
        .chain(batch.failures.iter().map(|(raw, _)| raw));

    for raw in raws {
        offsets
            .entry((raw.topic.clone(), raw.partition))
            .and_modify(|o| *o = (*o).max(raw.offset))
            .or_insert(raw.offset);
    }
    offsets
}
