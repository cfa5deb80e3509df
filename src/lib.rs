pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod metrics;

pub mod kafka;
pub mod serialization;

pub use bridge::{Bridge, ShutdownFlag};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use metrics::Metrics;
