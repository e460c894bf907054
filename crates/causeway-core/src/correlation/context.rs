//! Correlation context - an immutable position in the causal graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key recording the operation that created a derived context
pub const OPERATION_KEY: &str = "operation";

/// Metadata key recording the correlation id a context was inherited from
pub const INHERITED_FROM_KEY: &str = "inherited_from";

/// Metadata key marking a context synthesized because none was active
pub const SYNTHESIZED_KEY: &str = "synthesized";

/// Chain entry standing in for a hop a snapshot did not record
pub const UNKNOWN_HOP: &str = "unknown";

/// Where in the causal graph a unit of work sits.
///
/// Contexts are never mutated once shared. Derivation ([`child`](Self::child),
/// [`from_snapshot`](Self::from_snapshot)) always produces a new value, and the
/// fields are only reachable through accessors, so `depth == chain.len() - 1`
/// holds for every value that exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationContext {
    correlation_id: String,
    primary_correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    chain: Vec<String>,
    depth: u32,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, serde_json::Value>,
}

impl CorrelationContext {
    /// Create a root context for `component`. The primary id equals the fresh correlation id.
    pub fn root(component: impl Into<String>) -> Self {
        let correlation_id = new_correlation_id();
        Self {
            primary_correlation_id: correlation_id.clone(),
            correlation_id,
            parent_correlation_id: None,
            flow_id: None,
            parent_flow_id: None,
            session_id: None,
            request_id: None,
            chain: vec![component.into()],
            depth: 0,
            started_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Minimal root used when an event is built with no active context
    pub fn synthesized(component: impl Into<String>) -> Self {
        Self::root(component).with_metadata_entry(SYNTHESIZED_KEY, true)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    /// Merge `metadata` into this context's metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Derive the context for `component` performing `operation` on behalf of this one.
    pub fn child(
        &self,
        component: impl Into<String>,
        operation: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut chain = self.chain.clone();
        chain.push(component.into());

        let mut child_metadata = metadata;
        child_metadata.insert(
            OPERATION_KEY.to_string(),
            serde_json::Value::String(operation.into()),
        );

        Self {
            correlation_id: new_correlation_id(),
            primary_correlation_id: self.primary_correlation_id.clone(),
            parent_correlation_id: Some(self.correlation_id.clone()),
            flow_id: self.flow_id.clone(),
            parent_flow_id: self.flow_id.clone(),
            session_id: self.session_id.clone(),
            request_id: self.request_id.clone(),
            depth: hop_count(&chain),
            chain,
            started_at: Utc::now(),
            metadata: child_metadata,
        }
    }

    /// Rebuild a context on the far side of an execution-unit boundary.
    ///
    /// `component` is appended to the snapshot's chain and the new context
    /// records the snapshot's correlation id under `inherited_from`.
    pub fn from_snapshot(
        snapshot: &CorrelationSnapshot,
        component: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut chain = if snapshot.chain.is_empty() {
            // hops are unknown but the snapshot's depth is still honoured
            vec![UNKNOWN_HOP.to_string(); snapshot.depth as usize + 1]
        } else {
            snapshot.chain.clone()
        };
        chain.push(component.into());

        let mut inherited_metadata = metadata;
        inherited_metadata.insert(
            INHERITED_FROM_KEY.to_string(),
            serde_json::Value::String(snapshot.correlation_id.clone()),
        );

        let primary_correlation_id = if snapshot.primary_correlation_id.is_empty() {
            snapshot.correlation_id.clone()
        } else {
            snapshot.primary_correlation_id.clone()
        };

        Self {
            correlation_id: new_correlation_id(),
            primary_correlation_id,
            parent_correlation_id: Some(snapshot.correlation_id.clone()),
            flow_id: snapshot.flow_id.clone(),
            parent_flow_id: snapshot.flow_id.clone(),
            session_id: snapshot.session_id.clone(),
            request_id: snapshot.request_id.clone(),
            depth: hop_count(&chain),
            chain,
            started_at: Utc::now(),
            metadata: inherited_metadata,
        }
    }

    /// Plain, serializable copy of this context for crossing a boundary
    pub fn snapshot(&self) -> CorrelationSnapshot {
        CorrelationSnapshot {
            correlation_id: self.correlation_id.clone(),
            primary_correlation_id: self.primary_correlation_id.clone(),
            parent_correlation_id: self.parent_correlation_id.clone(),
            flow_id: self.flow_id.clone(),
            parent_flow_id: self.parent_flow_id.clone(),
            session_id: self.session_id.clone(),
            request_id: self.request_id.clone(),
            chain: self.chain.clone(),
            depth: self.depth,
            started_at: self.started_at,
            metadata: self.metadata.clone(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn primary_correlation_id(&self) -> &str {
        &self.primary_correlation_id
    }

    /// Flat identifier for consumers that only understand a single correlation id
    pub fn legacy_correlation_id(&self) -> &str {
        &self.primary_correlation_id
    }

    pub fn parent_correlation_id(&self) -> Option<&str> {
        self.parent_correlation_id.as_deref()
    }

    pub fn flow_id(&self) -> Option<&str> {
        self.flow_id.as_deref()
    }

    pub fn parent_flow_id(&self) -> Option<&str> {
        self.parent_flow_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// The component this context was created for (last chain entry)
    pub fn component(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn is_synthesized(&self) -> bool {
        self.metadata
            .get(SYNTHESIZED_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Serializable copy of a [`CorrelationContext`], safe to hand to another thread,
/// task, or queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSnapshot {
    pub correlation_id: String,

    #[serde(default)]
    pub primary_correlation_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_flow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub chain: Vec<String>,

    #[serde(default)]
    pub depth: u32,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<&CorrelationContext> for CorrelationSnapshot {
    fn from(context: &CorrelationContext) -> Self {
        context.snapshot()
    }
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn hop_count(chain: &[String]) -> u32 {
    chain.len().saturating_sub(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_context() {
        let root = CorrelationContext::root("web").with_request_id("req_1");
        assert_eq!(root.primary_correlation_id(), root.correlation_id());
        assert_eq!(root.chain(), ["web"]);
        assert_eq!(root.depth(), 0);
        assert!(root.is_root());
        assert!(root.parent_correlation_id().is_none());
        assert_eq!(root.legacy_correlation_id(), root.correlation_id());
    }

    #[test]
    fn test_child_appends_component() {
        let root = CorrelationContext::root("web").with_flow_id("order_fulfillment:42");
        let child = root.child("database", "update", HashMap::new());

        assert_ne!(child.correlation_id(), root.correlation_id());
        assert_eq!(child.primary_correlation_id(), root.primary_correlation_id());
        assert_eq!(child.chain(), ["web", "database"]);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.parent_flow_id(), Some("order_fulfillment:42"));
        assert_eq!(child.parent_correlation_id(), Some(root.correlation_id()));
        assert_eq!(child.metadata()[OPERATION_KEY], "update");

        // Parent is untouched
        assert_eq!(root.chain(), ["web"]);
    }

    #[test]
    fn test_snapshot_survives_json() {
        let root = CorrelationContext::root("web")
            .with_session_id("sess_1")
            .with_metadata_entry("tenant", "acme");
        let json = serde_json::to_string(&root.snapshot()).unwrap();
        let snapshot: CorrelationSnapshot = serde_json::from_str(&json).unwrap();

        let inherited = CorrelationContext::from_snapshot(&snapshot, "job", HashMap::new());
        assert_eq!(inherited.primary_correlation_id(), root.primary_correlation_id());
        assert_eq!(inherited.chain(), ["web", "job"]);
        assert_eq!(inherited.depth(), 1);
        assert_eq!(inherited.session_id(), Some("sess_1"));
        assert_eq!(inherited.metadata()[INHERITED_FROM_KEY], root.correlation_id());
    }

    #[test]
    fn test_snapshot_without_primary_falls_back() {
        let snapshot: CorrelationSnapshot = serde_json::from_value(serde_json::json!({
            "correlation_id": "abc",
            "chain": ["web"],
            "started_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let inherited = CorrelationContext::from_snapshot(&snapshot, "job", HashMap::new());
        assert_eq!(inherited.primary_correlation_id(), "abc");
        assert_eq!(inherited.depth(), 1);
    }

    #[test]
    fn test_snapshot_without_chain_keeps_depth() {
        let snapshot: CorrelationSnapshot = serde_json::from_value(serde_json::json!({
            "correlation_id": "abc",
            "primary_correlation_id": "root",
            "depth": 2,
            "started_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let inherited = CorrelationContext::from_snapshot(&snapshot, "job", HashMap::new());
        assert_eq!(inherited.depth(), 3);
        assert_eq!(inherited.chain(), ["unknown", "unknown", "unknown", "job"]);
        assert_eq!(inherited.chain().len(), inherited.depth() as usize + 1);
        assert_eq!(inherited.primary_correlation_id(), "root");
    }

    #[test]
    fn test_synthesized() {
        let ctx = CorrelationContext::synthesized("unknown");
        assert!(ctx.is_synthesized());
        assert!(ctx.is_root());
        assert!(!CorrelationContext::root("web").is_synthesized());
    }
}
