//! Causeway event processing
//!
//! Turns a [`UniversalEvent`](causeway_core::UniversalEvent) into a sanitized,
//! size-bounded wire payload:
//!
//! 1. Validation
//! 2. Sampling (probabilistic or deterministic)
//! 3. Field-name redaction (always on)
//! 4. PII pattern detection (when `auto_detect_pii` is set)
//! 5. Size enforcement
//! 6. Processing record

pub mod processor;
pub mod sampling;

pub use processor::{
    EventProcessor, ProcessError, ProcessResult, ProcessedEvent, ProcessingRecord,
    ProcessorConfig, ProcessorStats,
};
pub use sampling::{Sampler, SamplingMode};

/// Version recorded in every processing record
pub const PROCESSOR_VERSION: &str = env!("CARGO_PKG_VERSION");
