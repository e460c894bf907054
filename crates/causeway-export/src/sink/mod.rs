//! Sinks - where encoded batches go
//!
//! A [`Sink`] opens [`Transport`] connections; the engine keeps a bounded
//! pool of them and sends one encoded batch per request.

mod http;
mod memory;

pub use http::HttpSink;
pub use memory::{CapturedBatch, MemoryResponse, MemorySink};

use crate::error::TransportError;
use async_trait::async_trait;

/// A serialized batch ready for the wire
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// JSON array body, gzip-compressed when `compressed` is set
    pub body: Vec<u8>,
    pub compressed: bool,
    /// Size of the JSON body before compression
    pub uncompressed_len: usize,
    pub event_count: usize,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// One reusable outbound connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a batch. `Ok` carries the 2xx status; any other answer is
    /// [`TransportError::Status`].
    async fn send(&self, batch: &EncodedBatch) -> Result<u16, TransportError>;
}

/// Factory for transports
pub trait Sink: Send + Sync + 'static {
    /// Sink name for logs
    fn name(&self) -> &str;

    /// Open a new connection
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Map a collector status code to the transport result
pub(crate) fn check_status(status: u16, body: impl FnOnce() -> String) -> Result<u16, TransportError> {
    if (200..300).contains(&status) {
        Ok(status)
    } else {
        Err(TransportError::Status {
            status,
            body: body(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert_eq!(check_status(202, String::new).unwrap(), 202);
        let err = check_status(503, || "busy".to_string()).unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("busy"));
    }
}
