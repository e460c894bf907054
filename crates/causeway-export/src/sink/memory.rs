//! In-memory sink
//!
//! Captures every accepted batch in process. Responses can be scripted to
//! simulate an unhealthy collector.

use super::{check_status, EncodedBatch, Sink, Transport};
use crate::compression;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A scripted collector answer, consumed one per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryResponse {
    /// Answer with this status; 2xx captures the batch
    Status(u16),
    /// Fail as if the connection broke
    NetworkError(String),
    /// Wait this long, then accept
    Delay(Duration),
    /// Never answer
    Hang,
}

/// A batch the sink accepted
#[derive(Debug, Clone)]
pub struct CapturedBatch {
    /// Decoded events, in order
    pub events: Vec<Value>,
    pub compressed: bool,
    /// Bytes on the wire
    pub wire_bytes: usize,
}

#[derive(Debug, Default)]
struct Shared {
    batches: Mutex<Vec<CapturedBatch>>,
    script: Mutex<VecDeque<MemoryResponse>>,
    requests: AtomicU64,
    connections: AtomicU64,
}

/// In-memory sink. Clones share captured state.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    shared: Arc<Shared>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for the next requests. Once the script runs out every request gets 200.
    pub fn script(&self, responses: impl IntoIterator<Item = MemoryResponse>) {
        self.shared.script.lock().extend(responses);
    }

    /// Accepted batches so far
    pub fn batches(&self) -> Vec<CapturedBatch> {
        self.shared.batches.lock().clone()
    }

    /// All accepted events, flattened across batches
    pub fn events(&self) -> Vec<Value> {
        self.shared
            .batches
            .lock()
            .iter()
            .flat_map(|b| b.events.iter().cloned())
            .collect()
    }

    /// Requests received, including failed ones
    pub fn requests(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }

    /// Connections opened
    pub fn connections(&self) -> u64 {
        self.shared.connections.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.shared.batches.lock().clear();
        self.shared.script.lock().clear();
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.shared.connections.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryTransport {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    fn capture(&self, batch: &EncodedBatch) -> Result<(), TransportError> {
        let json = if batch.compressed {
            compression::gunzip(&batch.body)
                .map_err(|e| TransportError::Network(format!("corrupt gzip body: {}", e)))?
        } else {
            batch.body.clone()
        };
        let events: Vec<Value> = serde_json::from_slice(&json)?;

        self.shared.batches.lock().push(CapturedBatch {
            events,
            compressed: batch.compressed,
            wire_bytes: batch.body.len(),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, batch: &EncodedBatch) -> Result<u16, TransportError> {
        self.shared.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .shared
            .script
            .lock()
            .pop_front()
            .unwrap_or(MemoryResponse::Status(200));

        let status = match response {
            MemoryResponse::Status(status) => status,
            MemoryResponse::NetworkError(message) => return Err(TransportError::Network(message)),
            MemoryResponse::Delay(delay) => {
                tokio::time::sleep(delay).await;
                200
            }
            MemoryResponse::Hang => std::future::pending::<u16>().await,
        };

        let status = check_status(status, || "scripted failure".to_string())?;
        self.capture(batch)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(events: &[Value]) -> EncodedBatch {
        let body = serde_json::to_vec(events).unwrap();
        EncodedBatch {
            uncompressed_len: body.len(),
            body,
            compressed: false,
            event_count: events.len(),
        }
    }

    #[tokio::test]
    async fn test_captures_accepted_batches() {
        let sink = MemorySink::new();
        let transport = sink.connect().unwrap();

        let status = transport
            .send(&batch(&[serde_json::json!({"event_id": "evt_1"})]))
            .await
            .unwrap();
        assert_eq!(status, 200);
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(sink.events()[0]["event_id"], "evt_1");
        assert_eq!(sink.connections(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_not_captured() {
        let sink = MemorySink::new();
        sink.script([
            MemoryResponse::Status(503),
            MemoryResponse::NetworkError("reset".into()),
        ]);
        let transport = sink.connect().unwrap();
        let b = batch(&[serde_json::json!({})]);

        assert_eq!(transport.send(&b).await.unwrap_err().status(), Some(503));
        assert!(transport.send(&b).await.unwrap_err().is_network_error());
        assert_eq!(transport.send(&b).await.unwrap(), 200);
        assert_eq!(sink.requests(), 3);
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_decodes_compressed_batches() {
        let sink = MemorySink::new();
        let transport = sink.connect().unwrap();
        let plain = batch(&[serde_json::json!({"n": 1}), serde_json::json!({"n": 2})]);
        let compressed = EncodedBatch {
            body: compression::gzip(&plain.body).unwrap(),
            compressed: true,
            ..plain.clone()
        };

        transport.send(&compressed).await.unwrap();
        let captured = &sink.batches()[0];
        assert!(captured.compressed);
        assert_eq!(captured.events.len(), 2);
        assert_eq!(captured.events[1]["n"], 2);
    }
}
