//! Causeway delivery
//!
//! Ships processed events to a remote collector:
//!
//! - **Batching**: by size or age, whichever comes first
//! - **Circuit breaking**: fail fast while the collector is down
//! - **Connection pooling**: bounded, reusable outbound connections
//! - **Compression**: gzip above a size threshold
//! - **Retries**: exponential backoff for transient failures
//! - **Sinks**: HTTP for production, in-memory for tests and debug capture

pub mod batch;
pub mod circuit_breaker;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod pool;
pub mod retry;
pub mod sink;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{DeliveryConfig, SinkKind};
pub use engine::{DeliveryEngine, DeliveryResult, DeliveryStatus};
pub use error::TransportError;
pub use health::{DeliveryMetrics, HealthStatus};
pub use pool::{ConnectionPool, PoolStatus};
pub use retry::RetryPolicy;
pub use sink::{EncodedBatch, HttpSink, MemoryResponse, MemorySink, Sink, Transport};
