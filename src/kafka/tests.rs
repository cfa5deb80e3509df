#[cfg(test)]
mod tests {
    use crate::kafka::consumer::{batch_offsets, ConsumedBatch, RawMessage};
    use crate::kafka::producer::dead_letter_envelope;
    use crate::serialization::Record;

    fn raw_message(offset: i64, payload: &[u8]) -> RawMessage {
        raw_on_partition(0, offset, payload)
    }

    fn raw_on_partition(partition: i32, offset: i64, payload: &[u8]) -> RawMessage {
        RawMessage {
            topic: "alerts".to_string(),
            partition,
            offset,
            key: None,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_dead_letter_envelope_shape() {
        let envelope = dead_letter_envelope(
            &[0xde, 0xad, 0xbe, 0xef],
            "Avro decode failed",
            "alerts",
            "test-bridge",
        );

        assert_eq!(envelope["original_value"], "deadbeef");
        assert_eq!(envelope["error"], "Avro decode failed");
        assert_eq!(envelope["source_topic"], "alerts");
        assert_eq!(envelope["bridge_name"], "test-bridge");
    }

    #[test]
    fn test_dead_letter_envelope_empty_payload() {
        let envelope = dead_letter_envelope(&[], "empty", "alerts", "test-bridge");
        assert_eq!(envelope["original_value"], "");
    }

    #[test]
    fn test_batch_offsets_take_per_partition_maximum() {
        let mut batch = ConsumedBatch::default();
        batch.records.push((Record::new(), raw_on_partition(0, 3, b"{}")));
        batch.records.push((Record::new(), raw_on_partition(1, 9, b"{}")));
        batch.records.push((Record::new(), raw_on_partition(0, 5, b"{}")));
        batch.records.push((Record::new(), raw_on_partition(1, 2, b"{}")));

        let offsets = batch_offsets(&batch);
        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[&("alerts".to_string(), 0)], 5);
        assert_eq!(offsets[&("alerts".to_string(), 1)], 9);
    }

    #[test]
    fn test_batch_offsets_include_skipped_failures() {
        let mut batch = ConsumedBatch::default();
        batch.records.push((Record::new(), raw_on_partition(0, 3, b"{}")));
        batch
            .failures
            .push((raw_on_partition(0, 4, b"junk"), "bad bytes".to_string()));

        let offsets = batch_offsets(&batch);
        assert_eq!(offsets[&("alerts".to_string(), 0)], 4);
    }

    #[test]
    fn test_batch_offsets_empty_batch() {
        assert!(batch_offsets(&ConsumedBatch::default()).is_empty());
    }

    #[test]
    fn test_consumed_batch_emptiness() {
        let mut batch = ConsumedBatch::default();
        assert!(batch.is_empty());

        batch
            .failures
            .push((raw_message(7, b"junk"), "bad bytes".to_string()));
        assert!(!batch.is_empty());
    }
}
