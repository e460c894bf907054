//! Size- and age-bounded batch buffer

use causeway_process::ProcessedEvent;
use std::time::Duration;
use tokio::time::Instant;

/// Accumulates events until `batch_size` is reached or the oldest event is
/// older than the flush interval.
#[derive(Debug)]
pub struct Batcher {
    buffer: Vec<ProcessedEvent>,
    batch_size: usize,
    oldest: Option<Instant>,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            oldest: None,
        }
    }

    /// Add an event. Returns the full batch once `batch_size` is reached.
    pub fn push(&mut self, event: ProcessedEvent) -> Option<Vec<ProcessedEvent>> {
        if self.buffer.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.buffer.push(event);

        if self.buffer.len() >= self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Drain whatever is buffered
    pub fn take(&mut self) -> Vec<ProcessedEvent> {
        self.oldest = None;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size))
    }

    /// Whether the oldest buffered event has waited at least `max_age`
    pub fn is_due(&self, max_age: Duration) -> bool {
        self.oldest.is_some_and(|at| at.elapsed() >= max_age)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
