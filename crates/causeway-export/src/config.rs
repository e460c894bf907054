//! Delivery engine configuration

use crate::retry::RetryPolicy;
use causeway_core::config::DeliverySettings;
use std::time::Duration;
use tracing::warn;

/// Which sink transmits batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    /// HTTP POST to the collector endpoint
    #[default]
    Http,
    /// In-process capture
    Memory,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Http => "http",
            SinkKind::Memory => "memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(SinkKind::Http),
            "memory" => Some(SinkKind::Memory),
            _ => None,
        }
    }
}

/// Delivery engine configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Collector endpoint URL
    pub endpoint: String,

    /// Sink used for transmission
    pub sink: SinkKind,

    /// Bearer token sent to the collector
    pub api_key: Option<String>,

    /// Events per batch
    pub batch_size: usize,

    /// Maximum age of a partial batch
    pub flush_interval: Duration,

    /// Maximum concurrent outbound connections
    pub max_delivery_connections: usize,

    /// How long a transmission waits for a free connection
    pub pool_acquire_timeout: Duration,

    /// Consecutive failures that open the circuit
    pub circuit_breaker_threshold: u32,

    /// Time the circuit stays open before probing
    pub circuit_breaker_timeout: Duration,

    /// Concurrent probes allowed while half-open
    pub half_open_max_probes: u32,

    /// Retry schedule for transient failures
    pub retry: RetryPolicy,

    /// Hard timeout per transmission attempt
    pub request_timeout: Duration,

    /// Batches larger than this many bytes are gzip-compressed
    pub compression_threshold: usize,

    /// Server responses that are retried
    pub retryable_statuses: Vec<u16>,

    /// User-Agent header
    pub user_agent: String,
}

impl DeliveryConfig {
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        let sink = SinkKind::parse(&settings.sink).unwrap_or_else(|| {
            warn!("Unknown sink `{}`, using http", settings.sink);
            SinkKind::Http
        });

        Self {
            endpoint: settings.endpoint.clone(),
            sink,
            api_key: settings.api_key.clone(),
            batch_size: settings.batch_size.max(1),
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            max_delivery_connections: settings.max_delivery_connections.max(1),
            pool_acquire_timeout: Duration::from_millis(settings.pool_acquire_timeout_ms),
            circuit_breaker_threshold: settings.circuit_breaker_threshold.max(1),
            circuit_breaker_timeout: Duration::from_millis(settings.circuit_breaker_timeout_ms),
            half_open_max_probes: settings.half_open_max_probes.max(1),
            retry: RetryPolicy {
                max_retries: settings.retry_attempts,
                initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
                backoff_multiplier: settings.retry_backoff,
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            compression_threshold: settings.compression_threshold,
            retryable_statuses: settings.retryable_statuses.clone(),
            user_agent: format!("causeway/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// In-memory sink with the given batch size, for tests and local runs
    pub fn memory(batch_size: usize) -> Self {
        Self {
            sink: SinkKind::Memory,
            batch_size: batch_size.max(1),
            ..Self::default()
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::from_settings(&DeliverySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = DeliverySettings {
            sink: "MEMORY".to_string(),
            flush_interval_ms: 250,
            retry_attempts: 5,
            retry_backoff: 3.0,
            retryable_statuses: vec![503],
            ..Default::default()
        };
        let config = DeliveryConfig::from_settings(&settings);
        assert_eq!(config.sink, SinkKind::Memory);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_multiplier, 3.0);
        assert_eq!(config.retryable_statuses, vec![503]);
        assert!(config.user_agent.starts_with("causeway/"));
    }

    #[test]
    fn test_defaults_follow_settings() {
        let config = DeliveryConfig::default();
        assert_eq!(config.sink, SinkKind::Http);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.max_delivery_connections, 4);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_zero_sizes_clamped() {
        let settings = DeliverySettings {
            batch_size: 0,
            max_delivery_connections: 0,
            ..Default::default()
        };
        let config = DeliveryConfig::from_settings(&settings);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_delivery_connections, 1);
    }
}
