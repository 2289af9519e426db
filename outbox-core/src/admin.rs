//! Operator-facing admin operations: dead letter inspection and replay.

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{OutboxError, OutboxResult};
use crate::models::{DeadLetter, DeliveryAttempt};
use crate::repository::{DeliveryRepository, EventRepository, SubscriptionRepository};
use std::sync::Arc;
use uuid::Uuid;

pub struct AdminService<E, S, D>
where
    E: EventRepository,
    S: SubscriptionRepository,
    D: DeliveryRepository,
{
    events: Arc<E>,
    subscriptions: Arc<S>,
    deliveries: Arc<D>,
    config: DispatcherConfig,
}

impl<E, S, D> AdminService<E, S, D>
where
    E: EventRepository,
    S: SubscriptionRepository,
    D: DeliveryRepository,
{
    pub fn new(events: Arc<E>, subscriptions: Arc<S>, deliveries: Arc<D>, config: DispatcherConfig) -> Self {
        Self {
            events,
            subscriptions,
            deliveries,
            config,
        }
    }

    pub async fn get_dead_letter(&self, id: Uuid) -> OutboxResult<DeadLetter> {
        self.deliveries
            .get_dead_letter(id)
            .await?
            .ok_or_else(|| OutboxError::NotFound(format!("dead letter {id}")))
    }

    pub async fn list_attempts(&self, event_id: Uuid) -> OutboxResult<Vec<DeliveryAttempt>> {
        self.deliveries.list_attempts_for_event(event_id).await
    }

    /// Clear the dead letter for `dead_letter_id` and redeliver immediately.
    /// `attempt_number` is NOT reset -- the next delivery continues counting
    /// from where the pair left off, so a second exhaustion re-quarantines
    /// at the same budget rather than granting a fresh retry allowance.
    pub async fn replay(&self, dead_letter_id: Uuid) -> OutboxResult<()> {
        let Some((event_id, subscription_id)) = self.deliveries.clear_dead_letter(dead_letter_id).await? else {
            return Err(OutboxError::NotFound(format!("dead letter {dead_letter_id}")));
        };

        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or_else(|| OutboxError::event_not_found(event_id))?;
        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| OutboxError::subscription_not_found(subscription_id))?;

        let latest = self.deliveries.latest_attempt(event.id, subscription.id).await?;
        let next_attempt_number = latest.map(|a| a.attempt_number + 1).unwrap_or(1);

        let dispatcher = Dispatcher::new(
            self.events.clone(),
            self.subscriptions.clone(),
            self.deliveries.clone(),
            self.config.clone(),
        );
        dispatcher.deliver(&event, &subscription, next_attempt_number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::models::{DeliveryStatus, EventType};
    use crate::repository::{AttemptOutcome, SubscriptionDraft, SubscriptionRepository};
    use crate::testutil::InMemoryStore;

    #[tokio::test]
    async fn replay_missing_dead_letter_is_not_found() {
        let events = Arc::new(InMemoryStore::new());
        let subs = Arc::new(InMemoryStore::new());
        let deliveries = Arc::new(InMemoryStore::new());
        let admin = AdminService::new(events, subs, deliveries, DispatcherConfig::default());

        let err = admin.replay(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn replay_redelivers_and_continues_attempt_numbering() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let events = Arc::new(InMemoryStore::new());
        let subs = Arc::new(InMemoryStore::new());
        let deliveries = Arc::new(InMemoryStore::new());

        let event = events
            .insert(EventType::RequestSubmitted, r#"{"a":1}"#.to_string())
            .await
            .unwrap();
        let sub = subs
            .create(SubscriptionDraft {
                url: format!("{}/hook", server.uri()),
                secret: "a-long-enough-secret-value".into(),
                events: vec!["request_submitted".into()],
                enabled: true,
            })
            .await
            .unwrap();

        deliveries
            .record_attempt(AttemptOutcome {
                event_id: event.id,
                subscription_id: sub.id,
                attempt_number: 5,
                status: DeliveryStatus::DeadLettered,
                http_status_code: Some(503),
                response_body: None,
                error_message: Some("server error".into()),
                next_retry_at: None,
                dead_letter_total_attempts: Some(5),
            })
            .await
            .unwrap();

        let dl_id = deliveries.find_dead_letter(event.id, sub.id).await.unwrap();

        let admin = AdminService::new(events, subs, deliveries.clone(), DispatcherConfig::default());
        admin.replay(dl_id).await.unwrap();

        assert!(!deliveries.is_dead_lettered(event.id, sub.id).await.unwrap());
        assert!(deliveries.has_delivered(event.id, sub.id).await.unwrap());

        let attempts = deliveries.list_attempts_for_event(event.id).await.unwrap();
        let redelivered = attempts.iter().find(|a| a.status == DeliveryStatus::Delivered).unwrap();
        assert_eq!(redelivered.attempt_number, 6, "replay continues the attempt counter rather than resetting it");
    }
}
