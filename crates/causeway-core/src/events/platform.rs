//! Platform block - which service emitted an event

use crate::config::ServiceSettings;
use serde::{Deserialize, Serialize};

/// Service, environment, and agent/schema versions stamped on every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Emitting service name
    pub service: String,

    /// Deployment environment (production, staging, ...)
    pub environment: String,

    /// Version of the emitting service, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,

    /// Causeway agent version
    pub agent_version: String,

    /// Event schema version
    pub schema_version: String,

    /// Hostname of the emitting machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Platform {
    pub fn new(service: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            environment: environment.into(),
            service_version: None,
            agent_version: crate::AGENT_VERSION.to_string(),
            schema_version: crate::SCHEMA_VERSION.to_string(),
            host: current_hostname(),
        }
    }

    pub fn from_settings(settings: &ServiceSettings) -> Self {
        let mut platform = Self::new(settings.name.clone(), settings.environment.clone());
        platform.service_version = settings.version.clone();
        platform
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::from_settings(&ServiceSettings::default())
    }
}

fn current_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
}
