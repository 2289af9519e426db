//! Persistence access.
//!
//! Three repository traits, one per ownership boundary in the data model:
//! [`EventRepository`] (Outbox Service), [`SubscriptionRepository`]
//! (Subscription Service), and [`DeliveryRepository`] (Dispatcher, which
//! exclusively owns `DeliveryAttempt` and `DeadLetter` mutation). Traits
//! exist so the dispatcher's gate and retry logic can be exercised against
//! an in-memory fake in tests without a database -- see `tests/`.

use crate::error::{OutboxError, OutboxResult};
use crate::models::{DeadLetter, DeliveryAttempt, DeliveryStatus, EventType, OutboxEvent, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Bounds per-cycle dispatcher work (§4.3 step 1).
pub const DISPATCH_BATCH_SIZE: i64 = 50;

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert a new outbox event and return the populated row.
    async fn insert(&self, event_type: EventType, payload: String) -> OutboxResult<OutboxEvent>;

    /// Fetch up to `DISPATCH_BATCH_SIZE` events ordered by `created_at` ascending.
    async fn fetch_batch(&self) -> OutboxResult<Vec<OutboxEvent>>;

    async fn get(&self, event_id: Uuid) -> OutboxResult<Option<OutboxEvent>>;
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionDraft {
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create(&self, draft: SubscriptionDraft) -> OutboxResult<Subscription>;
    async fn get(&self, id: Uuid) -> OutboxResult<Option<Subscription>>;
    /// Ordered by `created_at` descending (§4.8).
    async fn list(&self) -> OutboxResult<Vec<Subscription>>;
    async fn update(&self, id: Uuid, patch: SubscriptionPatch) -> OutboxResult<Option<Subscription>>;
    async fn delete(&self, id: Uuid) -> OutboxResult<bool>;
    /// All enabled subscriptions; callers filter by event type tag
    /// (avoids a substring-matching query against the CSV column).
    async fn list_enabled(&self) -> OutboxResult<Vec<Subscription>>;
}

/// Everything the dispatcher needs to decide a new attempt's outcome, in
/// one shape so it can be committed atomically (§4.4 step 8).
pub struct AttemptOutcome {
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub attempt_number: i32,
    pub status: DeliveryStatus,
    pub http_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set when this attempt exhausts the retry budget; causes a
    /// `DeadLetter` row to be inserted in the same transaction.
    pub dead_letter_total_attempts: Option<i32>,
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn count_attempts(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<i64>;

    async fn has_delivered(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<bool>;

    async fn is_dead_lettered(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<bool>;

    /// Most recent attempt for the pair, if any, ordered by `attempt_number`.
    async fn latest_attempt(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
    ) -> OutboxResult<Option<DeliveryAttempt>>;

    /// Commit a new attempt row (and an optional dead letter row) in one
    /// transaction. Returns `None` if the unique `(event_id,
    /// subscription_id, attempt_number)` constraint was violated -- this
    /// means another worker already recorded this attempt number
    /// concurrently; the caller treats that as "lost race, skip this pair
    /// this cycle" per §5.
    async fn record_attempt(&self, outcome: AttemptOutcome) -> OutboxResult<Option<DeliveryAttempt>>;

    async fn list_attempts_for_event(&self, event_id: Uuid) -> OutboxResult<Vec<DeliveryAttempt>>;

    async fn get_dead_letter(&self, id: Uuid) -> OutboxResult<Option<DeadLetter>>;

    /// Remove the dead letter and downgrade any `dead_lettered` attempts
    /// for the pair back to `failed`, releasing invariants 3/4. Returns
    /// the `(event_id, subscription_id)` pair so the caller can immediately
    /// redeliver, or `None` if the dead letter was already gone.
    async fn clear_dead_letter(&self, dead_letter_id: Uuid) -> OutboxResult<Option<(Uuid, Uuid)>>;
}

/// SQLx/Postgres-backed implementation shared by all three traits, mirroring
/// the single-struct-many-methods shape of a pooled repository.
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventRepository for PgOutboxStore {
    async fn insert(&self, event_type: EventType, payload: String) -> OutboxResult<OutboxEvent> {
        let event = sqlx::query_as::<_, OutboxEvent>(
            r#"
            INSERT INTO outbox_events (id, event_type, payload, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING id, event_type, payload, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_type)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(event_id = %event.id, event_type = %event_type, "event_published");
        Ok(event)
    }

    async fn fetch_batch(&self) -> OutboxResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, event_type, payload, created_at
            FROM outbox_events
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(DISPATCH_BATCH_SIZE)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn get(&self, event_id: Uuid) -> OutboxResult<Option<OutboxEvent>> {
        let event = sqlx::query_as::<_, OutboxEvent>(
            "SELECT id, event_type, payload, created_at FROM outbox_events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }
}

#[async_trait]
impl SubscriptionRepository for PgOutboxStore {
    async fn create(&self, draft: SubscriptionDraft) -> OutboxResult<Subscription> {
        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO webhook_subscriptions (id, url, secret, enabled, events, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id, url, secret, enabled, events, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.url)
        .bind(&draft.secret)
        .bind(draft.enabled)
        .bind(draft.events.join(","))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(subscription_id = %sub.id, "subscription_created");
        Ok(sub)
    }

    async fn get(&self, id: Uuid) -> OutboxResult<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(
            "SELECT id, url, secret, enabled, events, created_at, updated_at FROM webhook_subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }

    async fn list(&self) -> OutboxResult<Vec<Subscription>> {
        let subs = sqlx::query_as::<_, Subscription>(
            "SELECT id, url, secret, enabled, events, created_at, updated_at FROM webhook_subscriptions ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    async fn update(&self, id: Uuid, patch: SubscriptionPatch) -> OutboxResult<Option<Subscription>> {
        let Some(existing) = self.get(id).await? else {
            return Ok(None);
        };

        let url = patch.url.unwrap_or(existing.url);
        let secret = patch.secret.unwrap_or(existing.secret);
        let events = patch
            .events
            .map(|e| e.join(","))
            .unwrap_or_else(|| existing.events_csv().to_string());
        let enabled = patch.enabled.unwrap_or(existing.enabled);

        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE webhook_subscriptions
            SET url = $2, secret = $3, events = $4, enabled = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING id, url, secret, enabled, events, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(secret)
        .bind(events)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(subscription_id = %sub.id, "subscription_updated");
        Ok(Some(sub))
    }

    async fn delete(&self, id: Uuid) -> OutboxResult<bool> {
        let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(subscription_id = %id, "subscription_deleted");
        }
        Ok(deleted)
    }

    async fn list_enabled(&self) -> OutboxResult<Vec<Subscription>> {
        let subs = sqlx::query_as::<_, Subscription>(
            "SELECT id, url, secret, enabled, events, created_at, updated_at FROM webhook_subscriptions WHERE enabled = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }
}

#[async_trait]
impl DeliveryRepository for PgOutboxStore {
    async fn count_attempts(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM delivery_attempts WHERE event_id = $1 AND subscription_id = $2",
        )
        .bind(event_id)
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("n")?)
    }

    async fn has_delivered(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM delivery_attempts
                WHERE event_id = $1 AND subscription_id = $2 AND status = 'delivered'
            ) AS present
            "#,
        )
        .bind(event_id)
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<bool, _>("present")?)
    }

    async fn is_dead_lettered(&self, event_id: Uuid, subscription_id: Uuid) -> OutboxResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM dead_letters WHERE event_id = $1 AND subscription_id = $2
            ) AS present
            "#,
        )
        .bind(event_id)
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<bool, _>("present")?)
    }

    async fn latest_attempt(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
    ) -> OutboxResult<Option<DeliveryAttempt>> {
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT id, event_id, subscription_id, attempt_number, status, http_status_code,
                   response_body, error_message, next_retry_at, created_at
            FROM delivery_attempts
            WHERE event_id = $1 AND subscription_id = $2
            ORDER BY attempt_number DESC
            LIMIT 1
            "#,
        )
        .bind(event_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn record_attempt(&self, outcome: AttemptOutcome) -> OutboxResult<Option<DeliveryAttempt>> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            INSERT INTO delivery_attempts
                (id, event_id, subscription_id, attempt_number, status,
                 http_status_code, response_body, error_message, next_retry_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING id, event_id, subscription_id, attempt_number, status, http_status_code,
                      response_body, error_message, next_retry_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(outcome.event_id)
        .bind(outcome.subscription_id)
        .bind(outcome.attempt_number)
        .bind(outcome.status)
        .bind(outcome.http_status_code)
        .bind(&outcome.response_body)
        .bind(&outcome.error_message)
        .bind(outcome.next_retry_at)
        .fetch_one(&mut *tx)
        .await;

        let attempt = match insert {
            Ok(attempt) => attempt,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                tracing::warn!(
                    event_id = %outcome.event_id,
                    subscription_id = %outcome.subscription_id,
                    attempt_number = outcome.attempt_number,
                    "lost race recording delivery attempt, skipping this cycle"
                );
                return Ok(None);
            }
            Err(e) => return Err(OutboxError::from(e)),
        };

        if let Some(total_attempts) = outcome.dead_letter_total_attempts {
            sqlx::query(
                r#"
                INSERT INTO dead_letters (id, event_id, subscription_id, last_error, total_attempts, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (event_id, subscription_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(outcome.event_id)
            .bind(outcome.subscription_id)
            .bind(&outcome.error_message)
            .bind(total_attempts)
            .execute(&mut *tx)
            .await?;

            tracing::warn!(
                event_id = %outcome.event_id,
                subscription_id = %outcome.subscription_id,
                "event_dead_lettered"
            );
        }

        tx.commit().await?;
        Ok(Some(attempt))
    }

    async fn list_attempts_for_event(&self, event_id: Uuid) -> OutboxResult<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT id, event_id, subscription_id, attempt_number, status, http_status_code,
                   response_body, error_message, next_retry_at, created_at
            FROM delivery_attempts
            WHERE event_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn get_dead_letter(&self, id: Uuid) -> OutboxResult<Option<DeadLetter>> {
        let dl = sqlx::query_as::<_, DeadLetter>(
            "SELECT id, event_id, subscription_id, last_error, total_attempts, created_at FROM dead_letters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dl)
    }

    async fn clear_dead_letter(&self, dead_letter_id: Uuid) -> OutboxResult<Option<(Uuid, Uuid)>> {
        let mut tx = self.pool.begin().await?;

        let dl = sqlx::query_as::<_, DeadLetter>(
            "SELECT id, event_id, subscription_id, last_error, total_attempts, created_at FROM dead_letters WHERE id = $1 FOR UPDATE",
        )
        .bind(dead_letter_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(dl) = dl else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        sqlx::query("DELETE FROM dead_letters WHERE id = $1")
            .bind(dead_letter_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE delivery_attempts
            SET status = 'failed'
            WHERE event_id = $1 AND subscription_id = $2 AND status = 'dead_lettered'
            "#,
        )
        .bind(dl.event_id)
        .bind(dl.subscription_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some((dl.event_id, dl.subscription_id)))
    }
}
