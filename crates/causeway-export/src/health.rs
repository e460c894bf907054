//! Delivery health and metrics

use crate::circuit_breaker::CircuitState;
use crate::pool::PoolStatus;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Request outcomes kept for [`HealthStatus`]
pub const RECENT_WINDOW: usize = 100;

/// Point-in-time health of the delivery engine
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub circuit_state: CircuitState,
    pub pool: PoolStatus,
    /// Successful requests among the most recent ones
    pub recent_successes: usize,
    /// Failed requests among the most recent ones
    pub recent_failures: usize,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub buffered_events: usize,
}

impl HealthStatus {
    /// Closed circuit and no more failures than successes recently
    pub fn is_healthy(&self) -> bool {
        self.circuit_state == CircuitState::Closed && self.recent_failures <= self.recent_successes
    }
}

/// Cumulative delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeliveryMetrics {
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub bytes_sent: u64,
    pub average_latency_ms: f64,
}

impl DeliveryMetrics {
    /// Export as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "successful": self.successful_requests,
                "failed": self.failed_requests,
                "retries": self.retries,
                "circuit_rejections": self.circuit_rejections,
            },
            "events": {
                "delivered": self.events_delivered,
                "dropped": self.events_dropped,
                "batches": self.batches_delivered,
            },
            "bytes_sent": self.bytes_sent,
            "average_latency_ms": self.average_latency_ms,
        })
    }
}

/// Lock-free counters behind [`DeliveryMetrics`], plus the recent outcome window
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    batches_delivered: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    latency_micros: AtomicU64,
    recent: Mutex<RecentOutcomes>,
}

#[derive(Debug, Default)]
struct RecentOutcomes {
    window: VecDeque<bool>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl MetricsRecorder {
    pub fn record_request(&self, success: bool, latency: Duration) {
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);

        let mut recent = self.recent.lock();
        if recent.window.len() == RECENT_WINDOW {
            recent.window.pop_front();
        }
        recent.window.push_back(success);
        if !success {
            recent.last_failure_at = Some(Utc::now());
        }
    }

    pub fn record_delivered(&self, events: usize, bytes: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered
            .fetch_add(events as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, events: usize) {
        self.events_dropped
            .fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// (successes, failures) over the recent window
    pub fn recent(&self) -> (usize, usize) {
        let recent = self.recent.lock();
        let successes = recent.window.iter().filter(|ok| **ok).count();
        (successes, recent.window.len() - successes)
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.recent.lock().last_failure_at
    }

    pub fn snapshot(&self) -> DeliveryMetrics {
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let requests = successful + failed;
        let average_latency_ms = if requests == 0 {
            0.0
        } else {
            self.latency_micros.load(Ordering::Relaxed) as f64 / requests as f64 / 1000.0
        };

        DeliveryMetrics {
            successful_requests: successful,
            failed_requests: failed,
            retries: self.retries.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_latency() {
        let recorder = MetricsRecorder::default();
        recorder.record_request(true, Duration::from_millis(10));
        recorder.record_request(false, Duration::from_millis(30));
        recorder.record_delivered(5, 1200);

        let metrics = recorder.snapshot();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.average_latency_ms, 20.0);
        assert_eq!(metrics.events_delivered, 5);
        assert_eq!(metrics.bytes_sent, 1200);

        let json = metrics.to_json();
        assert_eq!(json["requests"]["successful"], 1);
        assert_eq!(json["events"]["delivered"], 5);
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let recorder = MetricsRecorder::default();
        for _ in 0..RECENT_WINDOW {
            recorder.record_request(false, Duration::ZERO);
        }
        for _ in 0..40 {
            recorder.record_request(true, Duration::ZERO);
        }
        assert_eq!(recorder.recent(), (40, 60));
        assert!(recorder.last_failure_at().is_some());
    }

    #[test]
    fn test_health_predicate() {
        let mut status = HealthStatus {
            circuit_state: CircuitState::Closed,
            pool: PoolStatus { max: 4, in_use: 0, idle: 1 },
            recent_successes: 10,
            recent_failures: 2,
            last_failure_at: None,
            buffered_events: 0,
        };
        assert!(status.is_healthy());

        status.circuit_state = CircuitState::Open;
        assert!(!status.is_healthy());
    }
}
