//! Bounded pool of reusable sink connections

use crate::error::TransportError;
use crate::sink::{Sink, Transport};
use parking_lot::Mutex;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max: usize,
    pub in_use: usize,
    pub idle: usize,
}

/// At most `max` connections exist or are borrowed at any time. Borrowers
/// beyond the bound wait up to `acquire_timeout`.
pub struct ConnectionPool {
    sink: Arc<dyn Sink>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Transport>>>,
    max: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(sink: Arc<dyn Sink>, max: usize, acquire_timeout: Duration) -> Self {
        let max = max.max(1);
        Self {
            sink,
            permits: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::with_capacity(max)),
            max,
            acquire_timeout,
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Borrow a connection, reusing an idle one when possible
    pub async fn acquire(&self) -> Result<PooledConnection<'_>, TransportError> {
        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => return Err(TransportError::PoolExhausted(self.acquire_timeout)),
        };

        let reused = self.idle.lock().pop();
        let transport = match reused {
            Some(transport) => transport,
            None => {
                debug!(sink = self.sink.name(), "Opening delivery connection");
                self.sink.connect()?
            }
        };

        Ok(PooledConnection {
            transport: Some(transport),
            pool: self,
            _permit: permit,
        })
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            max: self.max,
            in_use: self.max - self.permits.available_permits(),
            idle: self.idle.lock().len(),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("sink", &self.sink.name())
            .field("status", &self.status())
            .finish()
    }
}

/// A borrowed connection; returned to the pool on drop
pub struct PooledConnection<'a> {
    transport: Option<Box<dyn Transport>>,
    pool: &'a ConnectionPool,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("sink", &self.pool.sink.name())
            .field("open", &self.transport.is_some())
            .finish()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        // only taken in drop
        self.transport.as_deref().expect("transport present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            self.pool.idle.lock().push(transport);
        }
    }
}
