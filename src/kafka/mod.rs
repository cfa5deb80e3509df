pub mod consumer;
pub mod producer;

#[cfg(test)]
mod tests;

pub use consumer::{Batch, BridgeConsumer, ConsumedBatch, RawMessage};
pub use producer::BridgeProducer;
