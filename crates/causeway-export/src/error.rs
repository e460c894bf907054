//! Transport error types

use std::time::Duration;
use thiserror::Error;

/// Errors from a single transmission attempt
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Collector responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Circuit breaker open")]
    CircuitOpen,

    #[error("No delivery connection available within {0:?}")]
    PoolExhausted(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink initialization failed: {0}")]
    Init(String),
}

impl TransportError {
    /// Check if this error should be retried given the configured server statuses
    pub fn is_retryable(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout(_) => true,
            TransportError::Status { status, .. } => retryable_statuses.contains(status),
            _ => false,
        }
    }

    /// Check if this is a network-level error
    pub fn is_network_error(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout(_))
    }

    /// Whether the collector looks unavailable. A 4xx means it answered, except
    /// 429, which means it is shedding load.
    pub fn indicates_outage(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout(_) => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status, if the collector answered
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured duration
            TransportError::Timeout(Duration::ZERO)
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRYABLE: &[u16] = &[500, 502, 503, 504];

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Network("reset".into()).is_retryable(RETRYABLE));
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable(RETRYABLE));
        assert!(TransportError::Status { status: 503, body: String::new() }.is_retryable(RETRYABLE));

        assert!(!TransportError::Status { status: 501, body: String::new() }.is_retryable(RETRYABLE));
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable(RETRYABLE));
        assert!(!TransportError::CircuitOpen.is_retryable(RETRYABLE));
        assert!(!TransportError::PoolExhausted(Duration::from_millis(5)).is_retryable(RETRYABLE));
    }

    #[test]
    fn test_outage_classification() {
        assert!(TransportError::Status { status: 501, body: String::new() }.indicates_outage());
        assert!(TransportError::Status { status: 429, body: String::new() }.indicates_outage());
        assert!(!TransportError::Status { status: 400, body: String::new() }.indicates_outage());
        assert!(TransportError::Network("refused".into()).indicates_outage());
        assert!(TransportError::Network("refused".into()).is_network_error());
        assert_eq!(
            TransportError::Status { status: 404, body: "missing".into() }.status(),
            Some(404)
        );
    }
}
