use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Wire format accepted on the inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Avro,
    Json,
    /// Try JSON first, fall back to Avro.
    Auto,
}

/// Wire format emitted on the outbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Avro,
    #[default]
    Json,
}

/// Immutable configuration snapshot for the bridge.
///
/// Built once at startup from the environment (optionally overlaid on a
/// config file) and shared read-only by every component.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    // Kafka connection
    #[serde(default = "default_bootstrap_servers")]
    pub kafka_bootstrap_servers: String,
    #[serde(default = "default_security_protocol")]
    pub kafka_security_protocol: String,
    #[serde(default)]
    pub kafka_sasl_mechanism: Option<String>,
    #[serde(default)]
    pub kafka_sasl_username: Option<String>,
    #[serde(default)]
    pub kafka_sasl_password: Option<String>,

    // Consumer settings
    #[serde(default = "default_input_topic")]
    pub input_topic: String,
    #[serde(default)]
    pub input_format: InputFormat,
    #[serde(default = "default_group_id")]
    pub consumer_group_id: String,
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,

    // Producer settings
    #[serde(default = "default_output_topic")]
    pub output_topic: String,
    #[serde(default)]
    pub output_format: OutputFormat,

    // Avro schema settings
    #[serde(default)]
    pub avro_schema_path: Option<String>,
    #[serde(default)]
    pub output_avro_schema_path: Option<String>,

    // API settings
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    #[serde(default = "default_api_retry_count")]
    pub api_retry_count: u32,
    #[serde(default = "default_api_retry_delay_ms")]
    pub api_retry_delay_ms: u64,

    // Batching settings
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    // Logging settings
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub log_file: Option<String>,

    // Error handling
    #[serde(default)]
    pub dead_letter_topic: Option<String>,
    #[serde(default = "default_skip_cutouts")]
    pub skip_cutouts: bool,

    // Bridge identification
    #[serde(default = "default_bridge_name")]
    pub bridge_name: String,
}

impl BridgeConfig {
    /// Loads configuration from the environment only.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads configuration from a file, overlaid by the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validates the configuration, failing fast before any connection
    /// is attempted.
    pub fn validate(&self) -> Result<()> {
        // Auto input works without a schema on a pure-JSON topic; the
        // Avro fallback just stays unavailable.
        if self.input_format == InputFormat::Avro && self.avro_schema_path.is_none() {
            return Err(Error::Config(
                "AVRO_SCHEMA_PATH is required when INPUT_FORMAT is 'avro'".to_string(),
            ));
        }

        if self.output_format == OutputFormat::Avro && self.output_avro_schema_path.is_none() {
            return Err(Error::Config(
                "OUTPUT_AVRO_SCHEMA_PATH is required when OUTPUT_FORMAT is 'avro'".to_string(),
            ));
        }

        if self.api_url.is_empty() {
            return Err(Error::Config("API_URL is required".to_string()));
        }

        if self.api_endpoint.is_empty() {
            return Err(Error::Config("API_ENDPOINT is required".to_string()));
        }

        if self.batch_size == 0 {
            return Err(Error::Config("BATCH_SIZE must be at least 1".to_string()));
        }

        Ok(())
    }

    /// API base URL without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Base rdkafka client configuration for the consumer.
    ///
    /// Auto-commit is disabled: correctness depends on committing only
    /// after the downstream produce has been flushed.
    pub fn consumer_client_config(&self) -> rdkafka::ClientConfig {
        let mut cfg = rdkafka::ClientConfig::new();
        cfg.set("bootstrap.servers", &self.kafka_bootstrap_servers)
            .set("group.id", &self.consumer_group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("security.protocol", &self.kafka_security_protocol);
        self.apply_sasl(&mut cfg);
        cfg
    }

    /// Base rdkafka client configuration for the producer.
    pub fn producer_client_config(&self) -> rdkafka::ClientConfig {
        let mut cfg = rdkafka::ClientConfig::new();
        cfg.set("bootstrap.servers", &self.kafka_bootstrap_servers)
            .set("security.protocol", &self.kafka_security_protocol)
            .set("acks", "all");
        self.apply_sasl(&mut cfg);
        cfg
    }

    fn apply_sasl(&self, cfg: &mut rdkafka::ClientConfig) {
        if let Some(mechanism) = &self.kafka_sasl_mechanism {
            cfg.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &self.kafka_sasl_username {
            cfg.set("sasl.username", username);
        }
        if let Some(password) = &self.kafka_sasl_password {
            cfg.set("sasl.password", password);
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            kafka_bootstrap_servers: default_bootstrap_servers(),
            kafka_security_protocol: default_security_protocol(),
            kafka_sasl_mechanism: None,
            kafka_sasl_username: None,
            kafka_sasl_password: None,
            input_topic: default_input_topic(),
            input_format: InputFormat::default(),
            consumer_group_id: default_group_id(),
            auto_offset_reset: default_offset_reset(),
            output_topic: default_output_topic(),
            output_format: OutputFormat::default(),
            avro_schema_path: None,
            output_avro_schema_path: None,
            api_url: default_api_url(),
            api_endpoint: default_api_endpoint(),
            api_timeout_secs: default_api_timeout_secs(),
            api_retry_count: default_api_retry_count(),
            api_retry_delay_ms: default_api_retry_delay_ms(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_file: None,
            dead_letter_topic: None,
            skip_cutouts: default_skip_cutouts(),
            bridge_name: default_bridge_name(),
        }
    }
}

impl fmt::Display for BridgeConfig {
    /// Summary with credentials omitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BridgeConfig(bootstrap={}, input_topic={}, input_format={:?}, \
             output_topic={}, output_format={:?}, api={}{}, batch_size={}, bridge={})",
            self.kafka_bootstrap_servers,
            self.input_topic,
            self.input_format,
            self.output_topic,
            self.output_format,
            self.api_base(),
            self.api_endpoint,
            self.batch_size,
            self.bridge_name,
        )
    }
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_security_protocol() -> String {
    "PLAINTEXT".to_string()
}

fn default_input_topic() -> String {
    "alerts".to_string()
}

fn default_group_id() -> String {
    "kafka-bridge".to_string()
}

fn default_offset_reset() -> String {
    "earliest".to_string()
}

fn default_output_topic() -> String {
    "processed".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_api_endpoint() -> String {
    "/process/batch".to_string()
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_api_retry_count() -> u32 {
    3
}

fn default_api_retry_delay_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_skip_cutouts() -> bool {
    true
}

fn default_bridge_name() -> String {
    "kafka-bridge".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_for_json_input() {
        let config = BridgeConfig {
            input_format: InputFormat::Json,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_avro_input_requires_schema_path() {
        let config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let config = BridgeConfig {
            avro_schema_path: Some("/schemas/input.avsc".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_input_works_without_schema_path() {
        let config = BridgeConfig {
            input_format: InputFormat::Auto,
            avro_schema_path: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_avro_output_requires_schema_path() {
        let config = BridgeConfig {
            input_format: InputFormat::Json,
            output_format: OutputFormat::Avro,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_api_url_rejected() {
        let config = BridgeConfig {
            input_format: InputFormat::Json,
            api_url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_base_strips_trailing_slash() {
        let config = BridgeConfig {
            api_url: "http://localhost:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.api_base(), "http://localhost:8000");
    }

    #[test]
    fn test_display_omits_credentials() {
        let config = BridgeConfig {
            kafka_sasl_password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(!config.to_string().contains("secret"));
    }
}
