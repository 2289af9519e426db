//! Outbox Service: the only way a domain event enters the system.

use crate::error::{OutboxError, OutboxResult};
use crate::metrics::Metrics;
use crate::models::{EventType, OutboxEvent};
use crate::repository::EventRepository;
use serde_json::Value;
use std::sync::Arc;

/// Validates and durably records domain events.
pub struct OutboxService<R: EventRepository> {
    repo: Arc<R>,
    metrics: Option<Arc<Metrics>>,
}

impl<R: EventRepository> OutboxService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publish `payload` as an event of `event_type`. Rejects unknown event
    /// type tags before anything reaches storage; serializes `payload` to
    /// canonical JSON and inserts the row in a single statement.
    ///
    /// Any side-effect hook (e.g. the Slack connector) runs after this
    /// returns and must not roll back the publish on failure.
    pub async fn publish(&self, event_type: &str, payload: &Value) -> OutboxResult<OutboxEvent> {
        let event_type = EventType::parse(event_type)
            .ok_or_else(|| OutboxError::Validation(format!("unknown event type: {event_type}")))?;

        let payload = serde_json::to_string(payload)?;
        let event = self.repo.insert(event_type, payload).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_published(event_type.as_str());
        }

        Ok(event)
    }

    pub async fn get(&self, event_id: uuid::Uuid) -> OutboxResult<OutboxEvent> {
        self.repo
            .get(event_id)
            .await?
            .ok_or_else(|| OutboxError::event_not_found(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn publish_rejects_unknown_event_type() {
        let svc = OutboxService::new(Arc::new(InMemoryStore::new()));
        let err = svc.publish("not_a_type", &json!({})).await.unwrap_err();
        assert!(matches!(err, OutboxError::Validation(_)));
    }

    #[tokio::test]
    async fn publish_inserts_and_round_trips_payload() {
        let svc = OutboxService::new(Arc::new(InMemoryStore::new()));
        let payload = json!({"request_id": "abc-123"});
        let event = svc.publish("request_submitted", &payload).await.unwrap();

        assert_eq!(event.event_type, EventType::RequestSubmitted);
        let fetched = svc.get(event.id).await.unwrap();
        assert_eq!(fetched.payload, event.payload);
        let round_tripped: Value = serde_json::from_str(&fetched.payload).unwrap();
        assert_eq!(round_tripped, payload);
    }

    #[tokio::test]
    async fn get_missing_event_is_not_found() {
        let svc = OutboxService::new(Arc::new(InMemoryStore::new()));
        let err = svc.get(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(_)));
    }
}
