//! Event processor - sampling, redaction, and size limits

use crate::sampling::{Sampler, SamplingMode};
use crate::PROCESSOR_VERSION;
use causeway_core::config::{CustomPatternSettings, ProcessorSettings};
use causeway_core::redaction::{PiiDetector, RedactionError, SensitiveFields};
use causeway_core::{UniversalEvent, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Generated top-level fields that are never redacted
const STRUCTURAL_FIELDS: &[&str] = &["event_id", "event_type", "timestamp"];

/// Generated correlation fields that are never redacted. Everything else in the
/// correlation block (session id, caller metadata) goes through both stages.
const CORRELATION_STRUCTURAL_FIELDS: &[&str] = &[
    "correlation_id",
    "primary_correlation_id",
    "parent_correlation_id",
    "chain",
    "depth",
    "started_at",
];

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The redacted payload is larger than `max_payload_size`
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidPattern(#[from] RedactionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessError {
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, ProcessError::PayloadTooLarge { .. })
    }
}

/// Result type for processing operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub sample_rate: f64,
    pub sampling_mode: SamplingMode,
    pub auto_detect_pii: bool,
    pub sensitive_fields: Vec<String>,
    pub custom_patterns: Vec<CustomPatternSettings>,
    pub max_payload_size: usize,
    pub redaction_marker: String,
}

impl ProcessorConfig {
    pub fn from_settings(settings: &ProcessorSettings) -> Self {
        let sampling_mode = SamplingMode::parse(&settings.sampling_mode).unwrap_or_else(|| {
            warn!(
                "Unknown sampling mode `{}`, using probabilistic",
                settings.sampling_mode
            );
            SamplingMode::Probabilistic
        });

        Self {
            sample_rate: settings.sample_rate,
            sampling_mode,
            auto_detect_pii: settings.auto_detect_pii,
            sensitive_fields: settings.sensitive_fields.clone(),
            custom_patterns: settings.custom_patterns.clone(),
            max_payload_size: settings.max_payload_size,
            redaction_marker: settings.redaction_marker.clone(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_settings(&ProcessorSettings::default())
    }
}

/// What the processor did to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub security_applied: bool,
    /// Dotted paths of every field touched by redaction
    pub sanitized_fields: Vec<String>,
    pub processor_version: String,
    pub sampled: bool,
}

/// A sanitized, wire-ready event: the event's fields plus a `processing` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    #[serde(flatten)]
    payload: Map<String, Value>,
    processing: ProcessingRecord,
}

impl ProcessedEvent {
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn processing(&self) -> &ProcessingRecord {
        &self.processing
    }

    pub fn event_id(&self) -> Option<&str> {
        self.payload.get("event_id").and_then(Value::as_str)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.payload.get("event_type").and_then(Value::as_str)
    }

    /// Look up a field by dotted path (`metadata.user.email`, `items.0.sku`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.payload.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Snapshot of processor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub processed: u64,
    pub sampled_out: u64,
    pub rejected_oversize: u64,
    pub rejected_invalid: u64,
    pub fields_redacted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    sampled_out: AtomicU64,
    rejected_oversize: AtomicU64,
    rejected_invalid: AtomicU64,
    fields_redacted: AtomicU64,
}

/// Turns events into sanitized payloads. Safe to share across threads.
#[derive(Debug)]
pub struct EventProcessor {
    config: ProcessorConfig,
    sampler: Sampler,
    sensitive: SensitiveFields,
    detector: PiiDetector,
    counters: Counters,
}

impl EventProcessor {
    /// Build a processor. Fails if a custom pattern does not compile.
    pub fn new(config: ProcessorConfig) -> ProcessResult<Self> {
        let detector = PiiDetector::with_custom(&config.custom_patterns)?;
        let sensitive = SensitiveFields::new(&config.sensitive_fields);
        let sampler = Sampler::new(config.sample_rate, config.sampling_mode);

        debug!(
            sample_rate = sampler.rate(),
            sampling_mode = sampler.mode().as_str(),
            auto_detect_pii = config.auto_detect_pii,
            sensitive_fields = sensitive.len(),
            max_payload_size = config.max_payload_size,
            "Event processor configured"
        );

        Ok(Self {
            config,
            sampler,
            sensitive,
            detector,
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one event.
    ///
    /// Returns `Ok(None)` when the event is sampled out. Errors are limited to
    /// invalid events and payloads over the size limit; both mean the event
    /// should be dropped by the caller.
    pub fn process(&self, event: &UniversalEvent) -> ProcessResult<Option<ProcessedEvent>> {
        if let Err(e) = event.validate() {
            self.counters.rejected_invalid.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = event.event_id(), error = %e, "Rejected invalid event");
            return Err(e.into());
        }

        if !self.sampler.should_keep(event.event_id()) {
            self.counters.sampled_out.fetch_add(1, Ordering::Relaxed);
            trace!(event_id = event.event_id(), "Event sampled out");
            return Ok(None);
        }

        let mut payload = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => {
                return Err(ProcessError::Serialization(serde::ser::Error::custom(
                    "event did not serialize to an object",
                )))
            }
        };

        let mut sanitized_fields = Vec::new();
        for (key, value) in payload.iter_mut() {
            if STRUCTURAL_FIELDS.contains(&key.as_str()) {
                continue;
            }
            if key == "correlation" {
                if let Value::Object(block) = value {
                    for (field, child) in block.iter_mut() {
                        if !CORRELATION_STRUCTURAL_FIELDS.contains(&field.as_str()) {
                            let path = format!("correlation.{}", field);
                            self.sanitize_field(field, child, path, &mut sanitized_fields);
                        }
                    }
                    continue;
                }
            }
            self.sanitize_field(key, value, key.clone(), &mut sanitized_fields);
        }

        let size = serde_json::to_vec(&payload)?.len();
        if size > self.config.max_payload_size {
            self.counters.rejected_oversize.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_id = event.event_id(),
                size,
                limit = self.config.max_payload_size,
                "Rejected oversized event"
            );
            return Err(ProcessError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_size,
            });
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .fields_redacted
            .fetch_add(sanitized_fields.len() as u64, Ordering::Relaxed);
        if !sanitized_fields.is_empty() {
            debug!(
                event_id = event.event_id(),
                redacted = sanitized_fields.len(),
                "Redacted event fields"
            );
        }

        Ok(Some(ProcessedEvent {
            payload,
            processing: ProcessingRecord {
                security_applied: true,
                sanitized_fields,
                processor_version: PROCESSOR_VERSION.to_string(),
                sampled: true,
            },
        }))
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            sampled_out: self.counters.sampled_out.load(Ordering::Relaxed),
            rejected_oversize: self.counters.rejected_oversize.load(Ordering::Relaxed),
            rejected_invalid: self.counters.rejected_invalid.load(Ordering::Relaxed),
            fields_redacted: self.counters.fields_redacted.load(Ordering::Relaxed),
        }
    }

    /// Replace the value of a sensitive key outright, otherwise descend into it
    fn sanitize_field(&self, key: &str, value: &mut Value, path: String, touched: &mut Vec<String>) {
        if self.sensitive.matches(key) {
            *value = Value::String(self.config.redaction_marker.clone());
            touched.push(path);
        } else {
            self.sanitize(value, path, touched);
        }
    }

    /// Redact `value` in place, recording the path of every touched field.
    fn sanitize(&self, value: &mut Value, path: String, touched: &mut Vec<String>) {
        let marker = self.config.redaction_marker.as_str();

        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let child_path = format!("{}.{}", path, key);
                    self.sanitize_field(key, child, child_path, touched);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.sanitize(item, format!("{}.{}", path, index), touched);
                }
            }
            Value::String(text) if self.config.auto_detect_pii => {
                if let Some(result) = self.detector.scrub(text, marker) {
                    *text = result.content;
                    touched.push(path);
                }
            }
            Value::Number(number) if self.config.auto_detect_pii => {
                let text = number.to_string();
                if let Some(result) = self.detector.scrub(&text, marker) {
                    *value = Value::String(result.content);
                    touched.push(path);
                }
            }
            _ => {}
        }
    }
}
