//! Error types and result handling for kafka-bridge.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_bridge::{Error, Result};
//!
//! fn load_schema() -> Result<()> {
//!     // Simulating a schema load failure
//!     Err(Error::Schema("schema file not found".to_string()))
//! }
//!
//! match load_schema() {
//!     Ok(()) => println!("Schema loaded"),
//!     Err(Error::Schema(msg)) => eprintln!("Schema error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-bridge operations.
///
/// This enum represents all possible errors that can occur while
/// bridging messages, from configuration issues to runtime failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from invalid environment variables.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A codec could not load or parse its Avro schema file.
    ///
    /// Raised at construction time and treated as fatal.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single inbound message could not be deserialized.
    ///
    /// Recovered locally: the message is skipped and counted, the
    /// consume loop continues.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Kafka client, consumer or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// HTTP transport error when calling the processing endpoint.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error when encoding messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from schema file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The processing endpoint did not become ready in time.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },
}

/// A convenient Result type alias for kafka-bridge operations.
///
/// This is equivalent to `std::result::Result<T, kafka_bridge::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
