//! Universal event model

mod platform;
mod universal;

pub use platform::Platform;
pub use universal::{Actor, EventBuilder, EventFactory, Subject, UniversalEvent, EVENT_ID_PREFIX};

/// Well-known event types emitted by the bundled adapters.
///
/// Any `domain.verb` string is accepted by the builder; these are only the
/// names the framework adapters agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // HTTP
    HttpRequest,
    HttpResponse,
    // Persistence
    DataCreate,
    DataChange,
    DataDestroy,
    // Jobs
    JobEnqueue,
    JobPerform,
    JobComplete,
    JobFail,
    // Business flows
    FlowStart,
    FlowStep,
    FlowComplete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::HttpRequest => "http.request",
            EventType::HttpResponse => "http.response",
            EventType::DataCreate => "data.create",
            EventType::DataChange => "data.change",
            EventType::DataDestroy => "data.destroy",
            EventType::JobEnqueue => "job.enqueue",
            EventType::JobPerform => "job.perform",
            EventType::JobComplete => "job.complete",
            EventType::JobFail => "job.fail",
            EventType::FlowStart => "flow.start",
            EventType::FlowStep => "flow.step",
            EventType::FlowComplete => "flow.complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http.request" => Some(EventType::HttpRequest),
            "http.response" => Some(EventType::HttpResponse),
            "data.create" => Some(EventType::DataCreate),
            "data.change" => Some(EventType::DataChange),
            "data.destroy" => Some(EventType::DataDestroy),
            "job.enqueue" => Some(EventType::JobEnqueue),
            "job.perform" => Some(EventType::JobPerform),
            "job.complete" => Some(EventType::JobComplete),
            "job.fail" => Some(EventType::JobFail),
            "flow.start" => Some(EventType::FlowStart),
            "flow.step" => Some(EventType::FlowStep),
            "flow.complete" => Some(EventType::FlowComplete),
            _ => None,
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationManager;
    use std::collections::HashMap;

    #[test]
    fn test_event_type_round_trip() {
        for ty in [EventType::HttpRequest, EventType::DataChange, EventType::JobFail] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse("nope.nope"), None);
    }

    /// Request hits the web tier, writes to the database, and hands off to a job
    /// running on another thread. All three events belong to one causal story.
    #[test]
    fn test_request_database_job_story() {
        let manager = CorrelationManager::new("web");
        let factory = EventFactory::new(Platform::new("shop", "test"), manager.clone());

        manager.start_request_context("req_1", Some("sess_1".to_string()), HashMap::new());
        let web_event = factory
            .event(EventType::HttpRequest, "POST /orders", Actor::user("42"))
            .build();

        manager
            .create_child_context("database", "update", HashMap::new())
            .unwrap();
        let db_event = factory
            .event(EventType::DataChange, "Updated order 1001", Actor::user("42"))
            .subject(Subject::new("order", "1001"))
            .build();

        let snapshot = manager.extract_correlation_data().unwrap();
        let job_factory = factory.clone();
        let job_event = std::thread::spawn(move || {
            let manager = job_factory.manager().clone();
            assert!(manager.current_context().is_none());
            manager.inherit_context(&snapshot, "job", HashMap::new());
            job_factory
                .event(EventType::JobPerform, "Sent confirmation", Actor::system("mailer"))
                .build()
        })
        .join()
        .unwrap();
        manager.clear_context();

        let events = [&web_event, &db_event, &job_event];
        let primary = &web_event.correlation().primary_correlation_id;
        for event in events {
            assert_eq!(&event.correlation().primary_correlation_id, primary);
            assert!(event.is_valid());
        }

        assert_eq!(web_event.correlation().chain, ["web"]);
        assert_eq!(db_event.correlation().chain, ["web", "database"]);
        assert_eq!(job_event.correlation().chain, ["web", "database", "job"]);
        assert_eq!(
            events.map(|e| e.correlation().depth),
            [0, 1, 2]
        );

        let mut ids: Vec<_> = events
            .iter()
            .map(|e| e.correlation().correlation_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        assert_eq!(
            job_event.correlation().metadata["inherited_from"],
            db_event.correlation().correlation_id.as_str()
        );
    }
}
