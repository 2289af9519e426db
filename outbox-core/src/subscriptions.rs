//! Subscription Service: CRUD over webhook subscribers, with the validation
//! invariants enforced at every write (§3: secret length, non-empty valid
//! event set).

use crate::error::{OutboxError, OutboxResult};
use crate::models::{EventType, Subscription};
use crate::repository::{SubscriptionDraft, SubscriptionPatch, SubscriptionRepository};
use std::sync::Arc;
use uuid::Uuid;

/// Minimum secret length accepted at registration (§3).
pub const MIN_SECRET_LEN: usize = 16;

pub struct SubscriptionService<R: SubscriptionRepository> {
    repo: Arc<R>,
}

impl<R: SubscriptionRepository> SubscriptionService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn create(&self, url: String, secret: String, events: Vec<String>, enabled: bool) -> OutboxResult<Subscription> {
        validate_secret(&secret)?;
        validate_events(&events)?;

        self.repo
            .create(SubscriptionDraft {
                url,
                secret,
                events,
                enabled,
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> OutboxResult<Subscription> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| OutboxError::subscription_not_found(id))
    }

    pub async fn list(&self) -> OutboxResult<Vec<Subscription>> {
        self.repo.list().await
    }

    pub async fn update(
        &self,
        id: Uuid,
        url: Option<String>,
        secret: Option<String>,
        events: Option<Vec<String>>,
        enabled: Option<bool>,
    ) -> OutboxResult<Subscription> {
        if let Some(secret) = &secret {
            validate_secret(secret)?;
        }
        if let Some(events) = &events {
            validate_events(events)?;
        }

        self.repo
            .update(id, SubscriptionPatch { url, secret, events, enabled })
            .await?
            .ok_or_else(|| OutboxError::subscription_not_found(id))
    }

    pub async fn delete(&self, id: Uuid) -> OutboxResult<()> {
        if self.repo.delete(id).await? {
            Ok(())
        } else {
            Err(OutboxError::subscription_not_found(id))
        }
    }
}

fn validate_secret(secret: &str) -> OutboxResult<()> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(OutboxError::Validation(format!(
            "secret must be at least {MIN_SECRET_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_events(events: &[String]) -> OutboxResult<()> {
    if events.is_empty() {
        return Err(OutboxError::Validation("events must not be empty".into()));
    }
    for tag in events {
        if EventType::parse(tag).is_none() {
            return Err(OutboxError::Validation(format!("unknown event type: {tag}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::InMemoryStore;

    fn events() -> Vec<String> {
        vec!["request_submitted".to_string(), "request_approved".to_string()]
    }

    #[tokio::test]
    async fn create_rejects_short_secret() {
        let svc = SubscriptionService::new(Arc::new(InMemoryStore::new()));
        let err = svc
            .create("https://example.com".into(), "short".into(), events(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::Validation(_)));
    }

    #[tokio::test]
    async fn create_rejects_empty_events() {
        let svc = SubscriptionService::new(Arc::new(InMemoryStore::new()));
        let err = svc
            .create("https://example.com".into(), "a-long-enough-secret".into(), vec![], true)
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::Validation(_)));
    }

    #[tokio::test]
    async fn create_rejects_unknown_event_tag() {
        let svc = SubscriptionService::new(Arc::new(InMemoryStore::new()));
        let err = svc
            .create(
                "https://example.com".into(),
                "a-long-enough-secret".into(),
                vec!["not_a_real_event".into()],
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::Validation(_)));
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let svc = SubscriptionService::new(Arc::new(InMemoryStore::new()));
        let sub = svc
            .create("https://example.com".into(), "a-long-enough-secret".into(), events(), true)
            .await
            .unwrap();
        let fetched = svc.get(sub.id).await.unwrap();
        assert_eq!(fetched.id, sub.id);
        assert_eq!(fetched.events(), events());
    }

    #[tokio::test]
    async fn delete_missing_subscription_is_not_found() {
        let svc = SubscriptionService::new(Arc::new(InMemoryStore::new()));
        let err = svc.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(_)));
    }
}
