//! Delivery engine
//!
//! Buffers processed events into batches and transmits them through the
//! circuit breaker and connection pool, retrying transient failures.
//! Delivery never returns an error: every outcome is a [`DeliveryResult`].

use crate::batch::Batcher;
use crate::circuit_breaker::CircuitBreaker;
use crate::compression;
use crate::config::{DeliveryConfig, SinkKind};
use crate::error::TransportError;
use crate::health::{DeliveryMetrics, HealthStatus, MetricsRecorder};
use crate::pool::ConnectionPool;
use crate::sink::{HttpSink, MemorySink, Sink};
use causeway_process::ProcessedEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome category of a delivery call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Buffered; will go out with its batch
    Queued,
    /// Collector accepted the batch
    Delivered,
    /// Nothing to send
    Empty,
    /// Rejected without network I/O
    CircuitOpen,
    /// Collector answered with a non-retryable status
    Rejected,
    /// Every allowed attempt failed
    RetriesExhausted,
    /// No connection became free in time
    PoolExhausted,
    /// The batch could not be serialized
    EncodingFailed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Empty => "empty",
            DeliveryStatus::CircuitOpen => "circuit_open",
            DeliveryStatus::Rejected => "rejected",
            DeliveryStatus::RetriesExhausted => "retries_exhausted",
            DeliveryStatus::PoolExhausted => "pool_exhausted",
            DeliveryStatus::EncodingFailed => "encoding_failed",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a delivery call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub status: DeliveryStatus,
    /// Last HTTP status seen from the collector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Transmission attempts made
    pub attempts: u32,
    /// Events covered by this result
    pub events: usize,
}

impl DeliveryResult {
    fn queued() -> Self {
        Self::ok(DeliveryStatus::Queued, None, 0, 1)
    }

    fn empty() -> Self {
        Self::ok(DeliveryStatus::Empty, None, 0, 0)
    }

    fn delivered(http_status: u16, attempts: u32, events: usize) -> Self {
        Self::ok(DeliveryStatus::Delivered, Some(http_status), attempts, events)
    }

    fn ok(status: DeliveryStatus, http_status: Option<u16>, attempts: u32, events: usize) -> Self {
        Self {
            success: true,
            status,
            http_status,
            error: None,
            attempts,
            events,
        }
    }

    fn failed(status: DeliveryStatus, error: &TransportError, attempts: u32, events: usize) -> Self {
        Self {
            success: false,
            status,
            http_status: error.status(),
            error: Some(error.to_string()),
            attempts,
            events,
        }
    }
}

struct EngineInner {
    config: DeliveryConfig,
    breaker: CircuitBreaker,
    pool: ConnectionPool,
    batcher: Mutex<Batcher>,
    metrics: MetricsRecorder,
}

struct Flusher {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

/// Resilient transport of processed events to the collector
pub struct DeliveryEngine {
    inner: Arc<EngineInner>,
    flusher: Mutex<Option<Flusher>>,
}

impl DeliveryEngine {
    /// Create an engine transmitting through `sink`
    pub fn new(config: DeliveryConfig, sink: Arc<dyn Sink>) -> Self {
        info!(
            sink = sink.name(),
            batch_size = config.batch_size,
            max_connections = config.max_delivery_connections,
            "Delivery engine created"
        );

        let inner = EngineInner {
            breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout,
                config.half_open_max_probes,
            ),
            pool: ConnectionPool::new(
                sink,
                config.max_delivery_connections,
                config.pool_acquire_timeout,
            ),
            batcher: Mutex::new(Batcher::new(config.batch_size)),
            metrics: MetricsRecorder::default(),
            config,
        };

        Self {
            inner: Arc::new(inner),
            flusher: Mutex::new(None),
        }
    }

    /// Create an engine with the sink named in the configuration
    pub fn from_config(config: DeliveryConfig) -> Self {
        let sink: Arc<dyn Sink> = match config.sink {
            SinkKind::Http => Arc::new(HttpSink::from_config(&config)),
            SinkKind::Memory => Arc::new(MemorySink::new()),
        };
        Self::new(config, sink)
    }

    /// Create an engine over a fresh in-memory sink, returning a handle to it
    pub fn with_memory_sink(config: DeliveryConfig) -> (Self, MemorySink) {
        let sink = MemorySink::new();
        (Self::new(config, Arc::new(sink.clone())), sink)
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    /// Buffer one event. When this fills the batch, or the oldest buffered event
    /// has waited `flush_interval`, the batch is sent and its result returned;
    /// otherwise the result is [`DeliveryStatus::Queued`].
    ///
    /// A buffer that stops receiving events is only sent on time once
    /// [`start`](Self::start) runs the background flusher.
    pub async fn deliver(&self, event: ProcessedEvent) -> DeliveryResult {
        if self.inner.breaker.is_rejecting() {
            self.inner.metrics.record_circuit_rejection();
            self.inner.metrics.record_dropped(1);
            return DeliveryResult::failed(DeliveryStatus::CircuitOpen, &TransportError::CircuitOpen, 0, 1);
        }

        let ready = {
            let mut batcher = self.inner.batcher.lock();
            match batcher.push(event) {
                Some(batch) => Some(batch),
                None if batcher.is_due(self.inner.config.flush_interval) => Some(batcher.take()),
                None => None,
            }
        };
        match ready {
            Some(batch) => self.inner.transmit(batch).await,
            None => DeliveryResult::queued(),
        }
    }

    /// Send a caller-built batch as one transmission, bypassing the buffer
    pub async fn deliver_batch(&self, events: Vec<ProcessedEvent>) -> DeliveryResult {
        self.inner.transmit(events).await
    }

    /// Send whatever is buffered now
    pub async fn flush(&self) -> DeliveryResult {
        self.inner.flush().await
    }

    /// Start the background flusher that sends partial batches once they reach
    /// `flush_interval`. Must be called within a Tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return;
        }

        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run_flusher(Arc::clone(&self.inner), Arc::clone(&stop)));
        *flusher = Some(Flusher { handle, stop });
        debug!("Delivery flusher started");
    }

    /// Stop the flusher and send what remains
    pub async fn shutdown(&self) -> DeliveryResult {
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            flusher.stop.notify_one();
            if let Err(e) = flusher.handle.await {
                warn!("Delivery flusher ended abnormally: {}", e);
            }
        }

        let result = self.inner.flush().await;
        let metrics = self.inner.metrics.snapshot();
        info!(
            delivered = metrics.events_delivered,
            dropped = metrics.events_dropped,
            "Delivery engine shut down"
        );
        result
    }

    pub fn health_status(&self) -> HealthStatus {
        let (recent_successes, recent_failures) = self.inner.metrics.recent();
        HealthStatus {
            circuit_state: self.inner.breaker.state(),
            pool: self.inner.pool.status(),
            recent_successes,
            recent_failures,
            last_failure_at: self.inner.metrics.last_failure_at(),
            buffered_events: self.inner.batcher.lock().len(),
        }
    }

    pub fn metrics(&self) -> DeliveryMetrics {
        self.inner.metrics.snapshot()
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.get_mut().take() {
            flusher.handle.abort();
        }
    }
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("sink", &self.inner.pool.sink_name())
            .field("circuit_state", &self.inner.breaker.state())
            .finish()
    }
}

async fn run_flusher(inner: Arc<EngineInner>, stop: Arc<Notify>) {
    let max_age = inner.config.flush_interval;
    let period = (max_age / 4).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = ticker.tick() => {
                let due = inner.batcher.lock().is_due(max_age);
                if due {
                    let result = inner.flush().await;
                    if !result.success {
                        debug!(status = %result.status, "Interval flush failed");
                    }
                }
            }
        }
    }
}

impl EngineInner {
    async fn flush(&self) -> DeliveryResult {
        let batch = self.batcher.lock().take();
        self.transmit(batch).await
    }

    /// Send one batch with retries. Terminal failures drop the batch.
    async fn transmit(&self, events: Vec<ProcessedEvent>) -> DeliveryResult {
        let count = events.len();
        if count == 0 {
            return DeliveryResult::empty();
        }

        let batch = match compression::encode(&events, self.config.compression_threshold).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(events = count, "Failed to encode batch: {}", e);
                self.metrics.record_dropped(count);
                return DeliveryResult::failed(DeliveryStatus::EncodingFailed, &e, 0, count);
            }
        };
        drop(events);

        let mut attempts = 0u32;
        loop {
            let Some(admission) = self.breaker.try_acquire() else {
                self.metrics.record_circuit_rejection();
                self.metrics.record_dropped(count);
                warn!(events = count, attempts, "Circuit open, dropping batch");
                return DeliveryResult::failed(
                    DeliveryStatus::CircuitOpen,
                    &TransportError::CircuitOpen,
                    attempts,
                    count,
                );
            };

            let connection = match self.pool.acquire().await {
                Ok(connection) => connection,
                Err(e) => {
                    self.breaker.release(admission);
                    self.metrics.record_dropped(count);
                    warn!(events = count, "Dropping batch: {}", e);
                    return DeliveryResult::failed(DeliveryStatus::PoolExhausted, &e, attempts, count);
                }
            };

            attempts += 1;
            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.config.request_timeout, connection.send(&batch)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(self.config.request_timeout)),
            };
            drop(connection);
            let latency = started.elapsed();

            let error = match outcome {
                Ok(status) => {
                    self.breaker.record_success(admission);
                    self.metrics.record_request(true, latency);
                    self.metrics.record_delivered(count, batch.len());
                    debug!(
                        events = count,
                        bytes = batch.len(),
                        compressed = batch.compressed,
                        attempts,
                        "Delivered batch"
                    );
                    return DeliveryResult::delivered(status, attempts, count);
                }
                Err(e) => e,
            };

            self.metrics.record_request(false, latency);
            if error.indicates_outage() {
                self.breaker.record_failure(admission);
            } else {
                self.breaker.record_neutral(admission);
            }

            if !error.is_retryable(&self.config.retryable_statuses) {
                warn!(events = count, "Collector rejected batch: {}", error);
                self.metrics.record_dropped(count);
                return DeliveryResult::failed(DeliveryStatus::Rejected, &error, attempts, count);
            }

            if !self.config.retry.should_retry(attempts) {
                error!(events = count, attempts, "Delivery failed, dropping batch: {}", error);
                self.metrics.record_dropped(count);
                return DeliveryResult::failed(DeliveryStatus::RetriesExhausted, &error, attempts, count);
            }

            let delay = self.config.retry.delay_for(attempts - 1);
            self.metrics.record_retry();
            warn!(attempt = attempts, ?delay, "Delivery failed, retrying: {}", error);
            tokio::time::sleep(delay).await;
        }
    }
}
