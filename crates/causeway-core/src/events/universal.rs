//! Universal event - the immutable record every adapter emits

use crate::correlation::{CorrelationContext, CorrelationManager, CorrelationSnapshot};
use crate::error::{ValidationError, Violation};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

use super::platform::Platform;

/// Prefix carried by every event id
pub const EVENT_ID_PREFIX: &str = "evt_";

static EVENT_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*\.[a-z][a-z0-9_]*$").unwrap());

/// A self-describing record of something that happened, stamped with the
/// correlation context that was active when it was built.
///
/// Events are created once through [`EventBuilder`] and never mutated. Schema
/// problems do not stop construction; they are reported by [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalEvent {
    event_id: String,
    timestamp: DateTime<Utc>,
    event_type: String,
    action: String,
    actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<Subject>,
    correlation: CorrelationSnapshot,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    platform: Platform,
}

impl UniversalEvent {
    /// Start building an event. Everything except these three fields is optional.
    pub fn builder(
        event_type: impl Into<String>,
        action: impl Into<String>,
        actor: Actor,
    ) -> EventBuilder {
        EventBuilder::new(event_type, action, actor)
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn correlation(&self) -> &CorrelationSnapshot {
        &self.correlation
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Whether the event satisfies every schema rule
    pub fn is_valid(&self) -> bool {
        self.violations().is_empty()
    }

    /// Check schema rules without touching the event
    pub fn validate(&self) -> Result<(), ValidationError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    fn violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        match self.event_id.strip_prefix(EVENT_ID_PREFIX) {
            Some(rest) if !rest.is_empty() => {}
            _ => violations.push(Violation::new(
                "event_id",
                format!("must be non-empty and start with `{}`", EVENT_ID_PREFIX),
            )),
        }

        if !EVENT_TYPE_PATTERN.is_match(&self.event_type) {
            violations.push(Violation::new(
                "event_type",
                format!("`{}` is not of the form domain.verb", self.event_type),
            ));
        }

        if self.action.trim().is_empty() {
            violations.push(Violation::new("action", "must not be empty"));
        }

        if self.actor.actor_type.trim().is_empty() {
            violations.push(Violation::new("actor.type", "must not be empty"));
        }

        if self.actor.id.trim().is_empty() {
            violations.push(Violation::new("actor.id", "must not be empty"));
        }

        if self.correlation.correlation_id.is_empty() {
            violations.push(Violation::new(
                "correlation.correlation_id",
                "must not be empty",
            ));
        }

        if self.correlation.chain.is_empty()
            || self.correlation.depth as usize != self.correlation.chain.len() - 1
        {
            violations.push(Violation::new(
                "correlation.depth",
                "must equal the chain hop count",
            ));
        }

        violations
    }
}

/// Who or what caused an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: String,

    pub id: String,

    /// Additional actor fields (name, role, ip, ...)
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Actor {
    pub fn new(actor_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            actor_type: actor_type.into(),
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// An end user
    pub fn user(id: impl Into<String>) -> Self {
        Self::new("user", id)
    }

    /// A process, job runner, or other automated component
    pub fn system(name: impl Into<String>) -> Self {
        Self::new("system", name)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// What an event acted upon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "type")]
    pub subject_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Subject {
    pub fn new(subject_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            id: Some(id.into()),
            attributes: Map::new(),
        }
    }

    /// A subject with no identity of its own (a collection, a query)
    pub fn anonymous(subject_type: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            id: None,
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Builder for [`UniversalEvent`]. Building never fails.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: String,
    action: String,
    actor: Actor,
    subject: Option<Subject>,
    metadata: Map<String, Value>,
    correlation: Option<Arc<CorrelationContext>>,
    manager: Option<CorrelationManager>,
    platform: Option<Platform>,
    timestamp: Option<DateTime<Utc>>,
}

impl EventBuilder {
    pub fn new(event_type: impl Into<String>, action: impl Into<String>, actor: Actor) -> Self {
        Self {
            event_type: event_type.into(),
            action: action.into(),
            actor,
            subject: None,
            metadata: Map::new(),
            correlation: None,
            manager: None,
            platform: None,
            timestamp: None,
        }
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Replace the metadata map. Non-object values are stored under `value`.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = match metadata {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Use an explicit context instead of the execution unit's current one
    pub fn correlation(mut self, context: Arc<CorrelationContext>) -> Self {
        self.correlation = Some(context);
        self
    }

    /// Manager used to look up (or synthesize) the context at build time
    pub fn manager(mut self, manager: CorrelationManager) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> UniversalEvent {
        let context = match self.correlation {
            Some(context) => context,
            None => self.manager.unwrap_or_default().current_or_synthesized(),
        };

        UniversalEvent {
            event_id: format!("{}{}", EVENT_ID_PREFIX, ulid::Ulid::new()),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            event_type: self.event_type,
            action: self.action,
            actor: self.actor,
            subject: self.subject,
            correlation: context.snapshot(),
            metadata: self.metadata,
            platform: self.platform.unwrap_or_default(),
        }
    }
}

/// Builds events that share one platform block and correlation manager
#[derive(Debug, Clone, Default)]
pub struct EventFactory {
    platform: Platform,
    manager: CorrelationManager,
}

impl EventFactory {
    pub fn new(platform: Platform, manager: CorrelationManager) -> Self {
        Self { platform, manager }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn manager(&self) -> &CorrelationManager {
        &self.manager
    }

    /// Start an event pre-filled with this factory's platform and manager
    pub fn event(
        &self,
        event_type: impl Into<String>,
        action: impl Into<String>,
        actor: Actor,
    ) -> EventBuilder {
        EventBuilder::new(event_type, action, actor)
            .platform(self.platform.clone())
            .manager(self.manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_build_minimal_event() {
        let event = UniversalEvent::builder("data.change", "Updated order", Actor::user("42"))
            .build();

        assert!(event.event_id().starts_with("evt_"));
        assert_eq!(event.event_type(), "data.change");
        assert!(event.subject().is_none());
        assert!(event.metadata().is_empty());
        assert!(event.is_valid());
    }

    #[test]
    fn test_missing_context_is_synthesized() {
        let manager = CorrelationManager::default();
        manager.clear_context();

        let event = UniversalEvent::builder("job.perform", "Ran job", Actor::system("worker"))
            .build();
        assert_eq!(event.correlation().chain, ["unknown"]);
        assert_eq!(event.correlation().metadata["synthesized"], true);
        assert!(event.is_valid());
    }

    #[test]
    fn test_captures_current_context() {
        let manager = CorrelationManager::new("web");
        let ctx = manager.start_request_context("req_1", None, HashMap::new());

        let event = UniversalEvent::builder(EventType::HttpRequest, "GET /orders", Actor::user("7"))
            .manager(manager.clone())
            .build();

        assert_eq!(event.correlation().correlation_id, ctx.correlation_id());
        assert_eq!(event.correlation().request_id.as_deref(), Some("req_1"));
        manager.clear_context();
    }

    #[test]
    fn test_explicit_context_wins() {
        let manager = CorrelationManager::new("web");
        manager.start_request_context("req_current", None, HashMap::new());
        let explicit = Arc::new(CorrelationContext::root("cli").with_request_id("req_explicit"));

        let event = UniversalEvent::builder("data.change", "x", Actor::user("1"))
            .correlation(explicit)
            .build();
        assert_eq!(event.correlation().request_id.as_deref(), Some("req_explicit"));
        assert_eq!(event.correlation().chain, ["cli"]);
        manager.clear_context();
    }

    #[test]
    fn test_snapshot_is_detached() {
        let manager = CorrelationManager::new("web");
        manager.start_request_context("req_1", None, HashMap::new());
        let event = UniversalEvent::builder("data.change", "x", Actor::user("1"))
            .manager(manager.clone())
            .build();

        manager
            .create_child_context("database", "update", HashMap::new())
            .unwrap();
        assert_eq!(event.correlation().chain, ["web"]);
        manager.clear_context();
    }

    #[test]
    fn test_invalid_event_type_is_reported_not_coerced() {
        let event = UniversalEvent::builder("DataChange", "x", Actor::user("1")).build();
        assert!(!event.is_valid());
        let err = event.validate().unwrap_err();
        assert!(err.has_violation("event_type"));
        assert_eq!(event.event_type(), "DataChange");
    }

    #[test]
    fn test_all_violations_reported() {
        let event = UniversalEvent::builder("data.change.extra", "  ", Actor::new("", "")).build();
        let err = event.validate().unwrap_err();
        assert!(err.has_violation("event_type"));
        assert!(err.has_violation("action"));
        assert!(err.has_violation("actor.type"));
        assert!(err.has_violation("actor.id"));
        assert_eq!(err.violations.len(), 4);
    }

    #[test]
    fn test_event_type_forms() {
        for valid in ["data.change", "http.request", "job2.perform_later", "a.b"] {
            let event = UniversalEvent::builder(valid, "x", Actor::user("1")).build();
            assert!(event.is_valid(), "{} should be valid", valid);
        }
        for invalid in ["data", "Data.change", "data.Change", "1data.change", "data._x", ".change"] {
            let event = UniversalEvent::builder(invalid, "x", Actor::user("1")).build();
            assert!(!event.is_valid(), "{} should be invalid", invalid);
        }
    }

    #[test]
    fn test_tampered_event_fails_validation() {
        let event = UniversalEvent::builder("data.change", "x", Actor::user("1")).build();
        let mut value = serde_json::to_value(&event).unwrap();
        value["event_id"] = json!("12345");
        value["correlation"]["depth"] = json!(3);

        let tampered: UniversalEvent = serde_json::from_value(value).unwrap();
        let err = tampered.validate().unwrap_err();
        assert!(err.has_violation("event_id"));
        assert!(err.has_violation("correlation.depth"));
    }

    #[test]
    fn test_serialized_shape() {
        let event = UniversalEvent::builder("data.change", "Updated order", Actor::user("42"))
            .subject(Subject::new("order", "1001").with_attribute("status", "paid"))
            .metadata(json!({"changes": {"status": ["pending", "paid"]}}))
            .build();

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["actor"]["type"], "user");
        assert_eq!(value["actor"]["id"], "42");
        assert_eq!(value["subject"]["type"], "order");
        assert_eq!(value["subject"]["status"], "paid");
        assert_eq!(value["metadata"]["changes"]["status"][1], "paid");
        assert!(value["correlation"]["primary_correlation_id"].is_string());
        assert!(value["platform"]["service"].is_string());
    }

    #[test]
    fn test_factory_prefills_platform() {
        let platform = Platform::new("orders-api", "production");
        let factory = EventFactory::new(platform, CorrelationManager::new("web"));
        let event = factory
            .event("data.change", "x", Actor::user("1"))
            .build();
        assert_eq!(event.platform().service, "orders-api");
        assert_eq!(event.platform().environment, "production");
    }

    #[test]
    fn test_non_object_metadata_is_wrapped() {
        let event = UniversalEvent::builder("data.change", "x", Actor::user("1"))
            .metadata(json!([1, 2, 3]))
            .build();
        assert_eq!(event.metadata()["value"], json!([1, 2, 3]));
    }
}
