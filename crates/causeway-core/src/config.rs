//! Configuration system for Causeway
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of every section before any component is built

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete Causeway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CausewayConfig {
    /// Emitting service identity and logging
    pub service: ServiceSettings,

    /// Correlation context settings
    pub correlation: CorrelationSettings,

    /// Event processing settings
    pub processor: ProcessorSettings,

    /// Delivery settings
    pub delivery: DeliverySettings,
}

/// Service identity, stamped on every event's platform block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name
    pub name: String,

    /// Deployment environment
    pub environment: String,

    /// Service version
    pub version: Option<String>,

    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "causeway".to_string(),
            environment: "development".to_string(),
            version: None,
            log_level: "info".to_string(),
        }
    }
}

/// Correlation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// First chain entry of every root context
    pub origin_component: String,

    /// Chain entry used when an event is built with no active context
    pub synthesized_component: String,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            origin_component: "web".to_string(),
            synthesized_component: "unknown".to_string(),
        }
    }
}

/// A caller-supplied PII pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPatternSettings {
    /// Name recorded alongside redactions
    pub name: String,

    /// Regular expression
    pub pattern: String,
}

/// Event processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Fraction of events kept, 0.0 to 1.0
    pub sample_rate: f64,

    /// Sampling mode: probabilistic, deterministic
    pub sampling_mode: String,

    /// Scan values for PII patterns (field-name redaction always runs)
    pub auto_detect_pii: bool,

    /// Field names whose values are always redacted (case-insensitive)
    pub sensitive_fields: Vec<String>,

    /// Extra named patterns, only used when `auto_detect_pii` is on
    pub custom_patterns: Vec<CustomPatternSettings>,

    /// Maximum serialized payload size in bytes
    pub max_payload_size: usize,

    /// Replacement for redacted values
    pub redaction_marker: String,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            sampling_mode: "probabilistic".to_string(),
            auto_detect_pii: true,
            sensitive_fields: crate::redaction::DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            custom_patterns: Vec::new(),
            max_payload_size: 64 * 1024,
            redaction_marker: crate::redaction::REDACTION_MARKER.to_string(),
        }
    }
}

/// Delivery engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Collector endpoint URL
    pub endpoint: String,

    /// Sink: http, memory
    pub sink: String,

    /// Bearer token sent to the collector
    pub api_key: Option<String>,

    /// Events per batch
    pub batch_size: usize,

    /// Maximum age of a partial batch in milliseconds
    pub flush_interval_ms: u64,

    /// Maximum concurrent outbound connections
    pub max_delivery_connections: usize,

    /// How long a transmission waits for a free connection
    pub pool_acquire_timeout_ms: u64,

    /// Consecutive failures that open the circuit
    pub circuit_breaker_threshold: u32,

    /// Time the circuit stays open before probing, in milliseconds
    pub circuit_breaker_timeout_ms: u64,

    /// Concurrent probe requests allowed while half-open
    pub half_open_max_probes: u32,

    /// Retries after the first attempt
    pub retry_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub retry_initial_delay_ms: u64,

    /// Backoff multiplier between retries
    pub retry_backoff: f64,

    /// Retry delay cap in milliseconds
    pub retry_max_delay_ms: u64,

    /// Hard timeout per transmission attempt in milliseconds
    pub request_timeout_ms: u64,

    /// Batches larger than this many bytes are gzip-compressed
    pub compression_threshold: usize,

    /// Server responses that are retried
    pub retryable_statuses: Vec<u16>,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318/v1/events".to_string(),
            sink: "http".to_string(),
            api_key: None,
            batch_size: 100,
            flush_interval_ms: 5000,
            max_delivery_connections: 4,
            pool_acquire_timeout_ms: 1000,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 30_000,
            half_open_max_probes: 1,
            retry_attempts: 3,
            retry_initial_delay_ms: 500,
            retry_backoff: 2.0,
            retry_max_delay_ms: 30_000,
            request_timeout_ms: 10_000,
            compression_threshold: 8 * 1024,
            retryable_statuses: vec![500, 502, 503, 504],
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. CAUSEWAY_CONFIG environment variable
    /// 3. ~/.config/causeway/config.toml
    /// 4. /etc/causeway/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<CausewayConfig> {
        let mut config = match self.find_config_file()? {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                self.load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                CausewayConfig::default()
            }
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use. An explicit CLI path that does not exist is an error.
    fn find_config_file(&self) -> ConfigResult<Option<PathBuf>> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::NotFound(path.clone()));
        }

        if let Ok(env_path) = std::env::var("CAUSEWAY_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!("CAUSEWAY_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("causeway").join("config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/causeway/config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<CausewayConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: CausewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut CausewayConfig) {
        if let Ok(val) = std::env::var("CAUSEWAY_LOG_LEVEL") {
            config.service.log_level = val;
        }
        if let Ok(val) = std::env::var("CAUSEWAY_SERVICE_NAME") {
            config.service.name = val;
        }
        if let Ok(val) = std::env::var("CAUSEWAY_ENVIRONMENT") {
            config.service.environment = val;
        }

        if let Ok(val) = std::env::var("CAUSEWAY_SAMPLE_RATE") {
            match val.parse() {
                Ok(rate) => config.processor.sample_rate = rate,
                Err(_) => warn!("Ignoring unparsable CAUSEWAY_SAMPLE_RATE: {}", val),
            }
        }
        if let Ok(val) = std::env::var("CAUSEWAY_AUTO_DETECT_PII") {
            config.processor.auto_detect_pii =
                val.parse().unwrap_or(config.processor.auto_detect_pii);
        }

        if let Ok(val) = std::env::var("CAUSEWAY_ENDPOINT") {
            config.delivery.endpoint = val;
        }
        if let Ok(val) = std::env::var("CAUSEWAY_API_KEY") {
            config.delivery.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("CAUSEWAY_SINK") {
            config.delivery.sink = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &CausewayConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.service.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.service.log_level, valid_levels
            )));
        }

        if config.service.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Service name cannot be empty".to_string(),
            ));
        }

        if config.correlation.origin_component.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Origin component cannot be empty".to_string(),
            ));
        }

        self.validate_processor(&config.processor)?;
        self.validate_delivery(&config.delivery)
    }

    fn validate_processor(&self, processor: &ProcessorSettings) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&processor.sample_rate) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sample rate: {}. Must be between 0.0 and 1.0",
                processor.sample_rate
            )));
        }

        let valid_modes = ["probabilistic", "deterministic"];
        if !valid_modes.contains(&processor.sampling_mode.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sampling mode: {}. Must be one of: {:?}",
                processor.sampling_mode, valid_modes
            )));
        }

        if processor.max_payload_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_payload_size cannot be 0".to_string(),
            ));
        }

        for custom in &processor.custom_patterns {
            if let Err(e) = regex::Regex::new(&custom.pattern) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid custom pattern `{}`: {}",
                    custom.name, e
                )));
            }
        }

        Ok(())
    }

    fn validate_delivery(&self, delivery: &DeliverySettings) -> ConfigResult<()> {
        let valid_sinks = ["http", "memory"];
        if !valid_sinks.contains(&delivery.sink.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid sink: {}. Must be one of: {:?}",
                delivery.sink, valid_sinks
            )));
        }

        if delivery.sink.eq_ignore_ascii_case("http")
            && !(delivery.endpoint.starts_with("http://")
                || delivery.endpoint.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid endpoint: {}. Must be an http(s) URL",
                delivery.endpoint
            )));
        }

        let non_zero = [
            ("batch_size", delivery.batch_size as u64),
            ("max_delivery_connections", delivery.max_delivery_connections as u64),
            ("circuit_breaker_threshold", delivery.circuit_breaker_threshold as u64),
            ("half_open_max_probes", delivery.half_open_max_probes as u64),
            ("request_timeout_ms", delivery.request_timeout_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{} cannot be 0", name)));
            }
        }

        if delivery.retry_backoff < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid retry backoff: {}. Must be at least 1.0",
                delivery.retry_backoff
            )));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &CausewayConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("causeway").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CausewayConfig::default();
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.correlation.origin_component, "web");
        assert_eq!(config.processor.sample_rate, 1.0);
        assert!(config.processor.auto_detect_pii);
        assert!(config
            .processor
            .sensitive_fields
            .iter()
            .any(|f| f == "password"));
        assert_eq!(config.delivery.batch_size, 100);
        assert_eq!(config.delivery.retryable_statuses, vec![500, 502, 503, 504]);
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [service]
            name = "orders"
        "#;
        let config: CausewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.delivery.max_delivery_connections, 4);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [service]
            name = "orders"
            environment = "production"
            version = "1.4.0"
            log_level = "debug"

            [correlation]
            origin_component = "api"

            [processor]
            sample_rate = 0.25
            sampling_mode = "deterministic"
            auto_detect_pii = false
            sensitive_fields = ["password", "pin"]
            max_payload_size = 2048

            [[processor.custom_patterns]]
            name = "order_ref"
            pattern = "ORD-[0-9]{6}"

            [delivery]
            endpoint = "https://collector.internal/v1/events"
            batch_size = 50
            circuit_breaker_threshold = 3
            retryable_statuses = [502, 503]
        "#;

        let config: CausewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service.environment, "production");
        assert_eq!(config.service.version.as_deref(), Some("1.4.0"));
        assert_eq!(config.correlation.origin_component, "api");
        assert_eq!(config.processor.sample_rate, 0.25);
        assert_eq!(config.processor.sampling_mode, "deterministic");
        assert!(!config.processor.auto_detect_pii);
        assert_eq!(config.processor.sensitive_fields, vec!["password", "pin"]);
        assert_eq!(config.processor.custom_patterns[0].name, "order_ref");
        assert_eq!(config.delivery.batch_size, 50);
        assert_eq!(config.delivery.retryable_statuses, vec![502, 503]);
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = CausewayConfig {
            service: ServiceSettings {
                log_level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_sample_rate_range() {
        let mut config = CausewayConfig::default();
        config.processor.sample_rate = 1.5;
        assert!(ConfigLoader::new().validate(&config).is_err());

        config.processor.sample_rate = 0.0;
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_validation_bad_custom_pattern() {
        let mut config = CausewayConfig::default();
        config.processor.custom_patterns.push(CustomPatternSettings {
            name: "broken".to_string(),
            pattern: "([unclosed".to_string(),
        });
        let err = ConfigLoader::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_validation_delivery() {
        let mut config = CausewayConfig::default();
        config.delivery.sink = "carrier-pigeon".to_string();
        assert!(ConfigLoader::new().validate(&config).is_err());

        let mut config = CausewayConfig::default();
        config.delivery.batch_size = 0;
        assert!(ConfigLoader::new().validate(&config).is_err());

        let mut config = CausewayConfig::default();
        config.delivery.retry_backoff = 0.5;
        assert!(ConfigLoader::new().validate(&config).is_err());

        let mut config = CausewayConfig::default();
        config.delivery.endpoint = "ftp://example.com".to_string();
        assert!(ConfigLoader::new().validate(&config).is_err());

        config.delivery.sink = "memory".to_string();
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [service]
            name = "from-file"

            [delivery]
            sink = "memory"
            "#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_cli_path(Some(file.path().to_path_buf()))
            .load()
            .unwrap();
        assert_eq!(config.service.name, "from-file");
        assert_eq!(config.delivery.sink, "memory");
    }

    #[test]
    fn test_missing_cli_path_is_error() {
        let result = ConfigLoader::new()
            .with_cli_path(Some(PathBuf::from("/nonexistent/causeway.toml")))
            .load();
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let loader = ConfigLoader::new();

        let mut config = CausewayConfig::default();
        config.service.name = "saved".to_string();
        config.processor.custom_patterns.push(CustomPatternSettings {
            name: "ticket".to_string(),
            pattern: "TCK-[0-9]+".to_string(),
        });
        loader.save(&config, &path).unwrap();

        let reloaded = loader.load_from_file(&path).unwrap();
        assert_eq!(reloaded.service.name, "saved");
        assert_eq!(reloaded.processor.custom_patterns, config.processor.custom_patterns);
    }
}
