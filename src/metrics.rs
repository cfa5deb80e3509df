//! Process-wide bridge metrics.
//!
//! A single [`Metrics`] instance is created at startup and passed as an
//! `Arc` to every component. All counters are atomic because delivery
//! callbacks run on rdkafka's poll thread while the bridge loop runs on
//! the main task.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter set shared by all bridge components.
#[derive(Debug)]
pub struct Metrics {
    messages_consumed: AtomicU64,
    messages_produced: AtomicU64,
    api_calls: AtomicU64,
    api_errors: AtomicU64,
    deserialization_errors: AtomicU64,
    delivery_failures: AtomicU64,
    start_time: DateTime<Utc>,
}

/// Point-in-time copy of the counters, suitable for structured logging.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_consumed: u64,
    pub messages_produced: u64,
    pub api_calls: u64,
    pub api_errors: u64,
    pub deserialization_errors: u64,
    pub delivery_failures: u64,
    pub start_time: DateTime<Utc>,
    pub uptime_secs: i64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_consumed: AtomicU64::new(0),
            messages_produced: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
            api_errors: AtomicU64::new(0),
            deserialization_errors: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            start_time: Utc::now(),
        }
    }

    pub fn record_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_produced(&self) {
        self.messages_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_call(&self, success: bool) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.api_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_deserialization_error(&self) {
        self.deserialization_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_consumed(&self) -> u64 {
        self.messages_consumed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            messages_produced: self.messages_produced.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
            deserialization_errors: self.deserialization_errors.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            start_time: self.start_time,
            uptime_secs: (now - self.start_time).num_seconds(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
