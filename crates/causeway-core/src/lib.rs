//! Causeway Core - Correlation context, universal events, and configuration
//!
//! This crate provides the foundational types shared by every Causeway crate:
//!
//! - **Correlation**: Execution-unit-local causal context and its propagation
//! - **Events**: The immutable universal event model
//! - **Redaction**: Sensitive field names and PII patterns
//! - **Config**: TOML configuration loading and validation

pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod redaction;

// Re-export commonly used types
pub use config::{CausewayConfig, ConfigError, ConfigLoader, ConfigResult};
pub use correlation::{CorrelationContext, CorrelationManager, CorrelationSnapshot};
pub use error::{CorrelationError, ValidationError, Violation};
pub use events::{
    Actor, EventBuilder, EventFactory, EventType, Platform, Subject, UniversalEvent,
};
pub use redaction::{PiiDetector, SensitiveFields, REDACTION_MARKER};

/// Event schema version this crate produces
pub const SCHEMA_VERSION: &str = "1.0";

/// Agent version
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
