//! In-memory fakes for the repository traits, used only by `#[cfg(test)]`
//! code across the crate and by `tests/`. No database required.

use crate::error::OutboxResult;
use crate::models::{DeadLetter, DeliveryAttempt, DeliveryStatus, EventType, OutboxEvent, Subscription};
use crate::repository::{
    AttemptOutcome, DeliveryRepository, EventRepository, SubscriptionDraft, SubscriptionPatch,
    SubscriptionRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    events: Vec<OutboxEvent>,
    subscriptions: Vec<Subscription>,
    attempts: Vec<DeliveryAttempt>,
    dead_letters: Vec<DeadLetter>,
}

/// A single struct implementing all three repository traits over
/// process-local `Mutex`-guarded vectors, mirroring [`crate::repository::PgOutboxStore`]'s
/// shape without a database underneath.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only lookup: find the dead letter id for a pair, since the
    /// production trait only ever addresses dead letters by their own id.
    pub async fn find_dead_letter(&self, event_id: Uuid, subscription_id: Uuid) -> Option<Uuid> {
        self.tables
            .lock()
            .unwrap()
            .dead_letters
            .iter()
            .find(|d| d.event_id == event_id && d.subscription_id == subscription_id)
            .map(|d| d.id)
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn insert(&self, event_type: EventType, payload: String) -> OutboxResult<OutboxEvent> {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            event_type,
            payload,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().events.push(event.clone());
        Ok(event)
    }

    async fn fetch_batch(&self) -> OutboxResult<Vec<OutboxEvent>> {
        let mut events = self.tables.lock().unwrap().events.clone();
        events.sort_by_key(|e| e.created_at);
        events.truncate(crate::repository::DISPATCH_BATCH_SIZE as usize);
        Ok(events)
    }

    async fn get(&self, event_id: Uuid) -> OutboxResult<Option<OutboxEvent>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn create(&self, draft: SubscriptionDraft) -> OutboxResult<Subscription> {
        let now = Utc::now();
        let sub = Subscription::new(
            Uuid::new_v4(),
            draft.url,
            draft.secret,
            draft.enabled,
            &draft.events,
            now,
            now,
        );
        self.tables.lock().unwrap().subscriptions.push(sub.clone());
        Ok(sub)
    }

    async fn get(&self, id: Uuid) -> OutboxResult<Option<Subscription>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn list(&self) -> OutboxResult<Vec<Subscription>> {
        let mut subs = self.tables.lock().unwrap().subscriptions.clone();
        subs.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(subs)
    }

    async fn update(&self, id: Uuid, patch: SubscriptionPatch) -> OutboxResult<Option<Subscription>> {
        let mut tables = self.tables.lock().unwrap();
        let Some(existing) = tables.subscriptions.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };

        if let Some(url) = patch.url {
            existing.url = url;
        }
        if let Some(secret) = patch.secret {
            existing.secret = secret;
        }
        if let Some(events) = patch.events {
            *existing = Subscription::new(
                existing.id,
                existing.url.clone(),
                existing.secret.clone(),
                patch.enabled.unwrap_or(existing.enabled),
                &events,
                existing.created_at,
                Utc::now(),
            );
            return Ok(Some(existing.clone()));
        }
        if let Some(enabled) = patch.enabled {
            existing.enabled = enabled;
        }
        existing.updated_at = Utc::now();
        Ok(Some(existing.clone()))
    }

    async fn delete(&self, id: Uuid) -> OutboxResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|s| s.id != id);
        Ok(tables.subscriptions.len() != before)
    }

    async fn list_enabled(&self) -> OutboxResult<Vec<Subscription>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryStore {
    async fn count_attempts(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<i64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| a.event_id == event_id && a.subscription_id == subscription_id)
            .count() as i64)
    }

    async fn has_delivered(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<bool> {
        Ok(self.tables.lock().unwrap().attempts.iter().any(|a| {
            a.event_id == event_id && a.subscription_id == subscription_id && a.status == DeliveryStatus::Delivered
        }))
    }

    async fn is_dead_lettered(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<bool> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .dead_letters
            .iter()
            .any(|d| d.event_id == event_id && d.subscription_id == subscription_id))
    }

    async fn latest_attempt(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
    ) -> OutboxResult<Option<DeliveryAttempt>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| a.event_id == event_id && a.subscription_id == subscription_id)
            .max_by_key(|a| a.attempt_number)
            .cloned())
    }

    async fn record_attempt(&self, outcome: AttemptOutcome) -> OutboxResult<Option<DeliveryAttempt>> {
        let mut tables = self.tables.lock().unwrap();

        let clash = tables.attempts.iter().any(|a| {
            a.event_id == outcome.event_id
                && a.subscription_id == outcome.subscription_id
                && a.attempt_number == outcome.attempt_number
        });
        if clash {
            return Ok(None);
        }

        let attempt = DeliveryAttempt {
            id: Uuid::new_v4(),
            event_id: outcome.event_id,
            subscription_id: outcome.subscription_id,
            attempt_number: outcome.attempt_number,
            status: outcome.status,
            http_status_code: outcome.http_status_code,
            response_body: outcome.response_body,
            error_message: outcome.error_message.clone(),
            next_retry_at: outcome.next_retry_at,
            created_at: Utc::now(),
        };
        tables.attempts.push(attempt.clone());

        if let Some(total_attempts) = outcome.dead_letter_total_attempts {
            let already = tables
                .dead_letters
                .iter()
                .any(|d| d.event_id == outcome.event_id && d.subscription_id == outcome.subscription_id);
            if !already {
                tables.dead_letters.push(DeadLetter {
                    id: Uuid::new_v4(),
                    event_id: outcome.event_id,
                    subscription_id: outcome.subscription_id,
                    last_error: outcome.error_message,
                    total_attempts,
                    created_at: Utc::now(),
                });
            }
        }

        Ok(Some(attempt))
    }

    async fn list_attempts_for_event(&self, event_id: Uuid) -> OutboxResult<Vec<DeliveryAttempt>> {
        let mut attempts: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.created_at);
        Ok(attempts)
    }

    async fn get_dead_letter(&self, id: Uuid) -> OutboxResult<Option<DeadLetter>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .dead_letters
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn clear_dead_letter(&self, dead_letter_id: Uuid) -> OutboxResult<Option<(Uuid, Uuid)>> {
        let mut tables = self.tables.lock().unwrap();
        let Some(pos) = tables.dead_letters.iter().position(|d| d.id == dead_letter_id) else {
            return Ok(None);
        };
        let dl = tables.dead_letters.remove(pos);

        for attempt in tables.attempts.iter_mut() {
            if attempt.event_id == dl.event_id
                && attempt.subscription_id == dl.subscription_id
                && attempt.status == DeliveryStatus::DeadLettered
            {
                attempt.status = DeliveryStatus::Failed;
            }
        }

        Ok(Some((dl.event_id, dl.subscription_id)))
    }
}
