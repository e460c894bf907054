//! Batch encoding and gzip compression

use crate::error::TransportError;
use crate::sink::EncodedBatch;
use causeway_process::ProcessedEvent;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::{debug, warn};

/// Gzip bytes
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Gunzip bytes
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Serialize a batch as a JSON array, compressing it when it exceeds `threshold` bytes.
///
/// Compression runs on the blocking pool. If it fails, or does not shrink the
/// body, the batch goes out uncompressed.
pub async fn encode(events: &[ProcessedEvent], threshold: usize) -> Result<EncodedBatch, TransportError> {
    encode_with(events, threshold, gzip).await
}

/// [`encode`] with the compressor supplied by the caller
pub(crate) async fn encode_with(
    events: &[ProcessedEvent],
    threshold: usize,
    compress: fn(&[u8]) -> std::io::Result<Vec<u8>>,
) -> Result<EncodedBatch, TransportError> {
    let json = serde_json::to_vec(events)?;
    let batch = EncodedBatch {
        uncompressed_len: json.len(),
        body: json,
        compressed: false,
        event_count: events.len(),
    };

    if batch.uncompressed_len <= threshold {
        return Ok(batch);
    }

    let raw = batch.body.clone();
    match tokio::task::spawn_blocking(move || compress(&raw)).await {
        Ok(Ok(compressed)) if compressed.len() < batch.uncompressed_len => {
            debug!(
                before = batch.uncompressed_len,
                after = compressed.len(),
                "Compressed batch"
            );
            Ok(EncodedBatch {
                body: compressed,
                compressed: true,
                ..batch
            })
        }
        Ok(Ok(_)) => Ok(batch),
        Ok(Err(e)) => {
            warn!("Compression failed, sending uncompressed: {}", e);
            Ok(batch)
        }
        Err(e) => {
            warn!("Compression task failed, sending uncompressed: {}", e);
            Ok(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_core::correlation::CorrelationContext;
    use causeway_core::{Actor, UniversalEvent};
    use causeway_process::{EventProcessor, ProcessorConfig};
    use std::sync::Arc;

    fn processed(n: usize) -> Vec<ProcessedEvent> {
        let processor = EventProcessor::new(ProcessorConfig::default()).unwrap();
        let context = Arc::new(CorrelationContext::root("web"));
        (0..n)
            .map(|i| {
                let event = UniversalEvent::builder("order.create", "Created order", Actor::user("42"))
                    .metadata_entry("index", i)
                    .correlation(Arc::clone(&context))
                    .build();
                processor.process(&event).unwrap().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = b"hello hello hello hello".repeat(20);
        let compressed = gzip(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(gunzip(&compressed).unwrap(), data);
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        assert!(gunzip(b"not gzip").is_err());
    }

    #[tokio::test]
    async fn test_small_batch_stays_plain() {
        let events = processed(1);
        let batch = encode(&events, 1024 * 1024).await.unwrap();
        assert!(!batch.compressed);
        assert_eq!(batch.event_count, 1);
        let decoded: Vec<serde_json::Value> = serde_json::from_slice(&batch.body).unwrap();
        assert_eq!(decoded[0]["event_type"], "order.create");
    }

    fn failing(_: &[u8]) -> std::io::Result<Vec<u8>> {
        Err(std::io::Error::other("encoder broke"))
    }

    fn panicking(_: &[u8]) -> std::io::Result<Vec<u8>> {
        panic!("encoder panicked")
    }

    #[tokio::test]
    async fn test_compression_failure_sends_plain_json() {
        let events = processed(50);
        let plain = serde_json::to_vec(&events).unwrap();

        for compress in [failing as fn(&[u8]) -> std::io::Result<Vec<u8>>, panicking] {
            let batch = encode_with(&events, 1024, compress).await.unwrap();
            assert!(!batch.compressed);
            assert_eq!(batch.body, plain);
            assert_eq!(batch.uncompressed_len, plain.len());
            assert_eq!(batch.event_count, 50);
        }
    }

    #[tokio::test]
    async fn test_incompressible_body_sent_plain() {
        let events = processed(50);
        let batch = encode_with(&events, 1024, |data| Ok(data.repeat(2))).await.unwrap();
        assert!(!batch.compressed);
        assert_eq!(batch.len(), batch.uncompressed_len);
    }

    #[tokio::test]
    async fn test_large_batch_compressed() {
        let events = processed(50);
        let batch = encode(&events, 1024).await.unwrap();
        assert!(batch.compressed);
        assert!(batch.len() < batch.uncompressed_len);

        let decoded: Vec<serde_json::Value> =
            serde_json::from_slice(&gunzip(&batch.body).unwrap()).unwrap();
        assert_eq!(decoded.len(), 50);
        assert_eq!(decoded[49]["metadata"]["index"], 49);
    }
}
