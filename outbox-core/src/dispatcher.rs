//! The dispatcher: polls the outbox, evaluates the per-pair dispatch gate,
//! and performs HTTP deliveries with signed payloads and backoff retry.
//!
//! Owns `DeliveryAttempt` and `DeadLetter` exclusively -- nothing else in
//! the crate writes to those tables.

use crate::metrics::Metrics;
use crate::models::{DeliveryAttempt, DeliveryStatus, OutboxEvent, Subscription, truncate};
use crate::repository::{AttemptOutcome, DeliveryRepository, EventRepository, SubscriptionRepository};
use crate::signer;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Maximum length stored for a truncated HTTP response body (§3).
const RESPONSE_BODY_MAX_LEN: usize = 1000;
/// Maximum length stored for a truncated error message (§3).
const ERROR_MESSAGE_MAX_LEN: usize = 500;
/// Upper bound on computed backoff delay, regardless of attempt number.
const MAX_BACKOFF_SECONDS: i64 = 300;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Attempts allowed before a transient failure is quarantined (§4.5).
    pub max_attempts: i32,
    /// Base of the exponential backoff: `backoff_base_seconds ^ attempt_number`.
    pub backoff_base_seconds: f64,
    /// Delay between polling cycles when a cycle finds nothing to do.
    pub poll_interval: Duration,
    /// Per-delivery HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_seconds: 2.0,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of evaluating the dispatch gate for an `(event, subscription)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateDecision {
    Attempt { attempt_number: i32 },
    Skip,
}

/// Evaluate the ordered dispatch-gate predicates (§4.3). Checked in this
/// exact order; the first matching predicate decides:
///
/// 1. already delivered -> skip
/// 2. already dead-lettered -> skip
/// 3. no prior attempts -> attempt #1
/// 4. latest attempt pending and due -> attempt (next number)
/// 5. latest attempt pending but not yet due -> skip
/// 6. latest attempt failed with no retry scheduled -> skip
fn evaluate_gate(
    delivered: bool,
    dead_lettered: bool,
    latest: Option<&DeliveryAttempt>,
    now: DateTime<Utc>,
) -> GateDecision {
    if delivered {
        return GateDecision::Skip;
    }
    if dead_lettered {
        return GateDecision::Skip;
    }

    match latest {
        None => GateDecision::Attempt { attempt_number: 1 },
        Some(attempt) => match attempt.status {
            DeliveryStatus::Pending => match attempt.next_retry_at {
                Some(due) if now >= due => GateDecision::Attempt {
                    attempt_number: attempt.attempt_number + 1,
                },
                Some(_) => GateDecision::Skip,
                None => GateDecision::Attempt {
                    attempt_number: attempt.attempt_number + 1,
                },
            },
            DeliveryStatus::Failed | DeliveryStatus::Delivered | DeliveryStatus::DeadLettered => {
                GateDecision::Skip
            }
        },
    }
}

/// `backoff_base_seconds ^ attempt_number`, capped at [`MAX_BACKOFF_SECONDS`].
fn compute_backoff(attempt_number: i32, backoff_base_seconds: f64) -> Duration {
    let seconds = backoff_base_seconds.powi(attempt_number);
    let seconds = seconds.min(MAX_BACKOFF_SECONDS as f64).max(0.0);
    Duration::from_secs_f64(seconds)
}

/// Every non-2xx outcome -- non-2xx response, timeout, or transport error --
/// is treated identically (§4.4 step 5): recorded as `failed`, then either
/// rescheduled or dead-lettered purely based on `attempt_number` vs
/// `max_attempts`. There is no separate "permanent failure" classification.
enum DeliveryOutcome {
    Delivered {
        status_code: u16,
        body: Option<String>,
    },
    Failed {
        status_code: Option<u16>,
        response_body: Option<String>,
        error_message: String,
    },
}

pub struct Dispatcher<E, S, D>
where
    E: EventRepository,
    S: SubscriptionRepository,
    D: DeliveryRepository,
{
    events: Arc<E>,
    subscriptions: Arc<S>,
    deliveries: Arc<D>,
    http: reqwest::Client,
    config: DispatcherConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<E, S, D> Dispatcher<E, S, D>
where
    E: EventRepository,
    S: SubscriptionRepository,
    D: DeliveryRepository,
{
    pub fn new(events: Arc<E>, subscriptions: Arc<S>, deliveries: Arc<D>, config: DispatcherConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client builds with a static config");

        Self {
            events,
            subscriptions,
            deliveries,
            http,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the poll loop forever. A single pair's delivery failure never
    /// aborts the cycle; only the surrounding repository call failing is
    /// propagated upward (caller decides whether that's fatal).
    pub async fn start(&self) -> anyhow::Result<()> {
        loop {
            if let Err(err) = self.run_cycle().await {
                tracing::error!(error = %err, "dispatch cycle failed");
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One pass over the outbox: fetch a batch of events, fan out to every
    /// matching enabled subscription, evaluate the gate, deliver where due.
    pub async fn run_cycle(&self) -> crate::error::OutboxResult<()> {
        let events = self.events.fetch_batch().await?;
        if events.is_empty() {
            return Ok(());
        }

        let enabled = self.subscriptions.list_enabled().await?;

        for event in &events {
            let matching = enabled.iter().filter(|s| s.listens_for(event.event_type));
            for subscription in matching {
                if let Err(err) = self.dispatch_pair(event, subscription).await {
                    tracing::error!(
                        event_id = %event.id,
                        subscription_id = %subscription.id,
                        error = %err,
                        "delivery attempt failed to record, continuing cycle"
                    );
                }
            }
        }

        Ok(())
    }

    async fn dispatch_pair(&self, event: &OutboxEvent, subscription: &Subscription) -> crate::error::OutboxResult<()> {
        let now = Utc::now();
        let delivered = self.deliveries.has_delivered(event.id, subscription.id).await?;
        let dead_lettered = self.deliveries.is_dead_lettered(event.id, subscription.id).await?;
        let latest = self.deliveries.latest_attempt(event.id, subscription.id).await?;

        let decision = evaluate_gate(delivered, dead_lettered, latest.as_ref(), now);
        let GateDecision::Attempt { attempt_number } = decision else {
            return Ok(());
        };

        self.deliver(event, subscription, attempt_number).await
    }

    /// Perform one HTTP delivery attempt and commit its outcome (§4.4).
    pub(crate) async fn deliver(
        &self,
        event: &OutboxEvent,
        subscription: &Subscription,
        attempt_number: i32,
    ) -> crate::error::OutboxResult<()> {
        let started = std::time::Instant::now();
        let (signature, timestamp) = signer::sign(&event.payload, &subscription.secret, None);

        let data: serde_json::Value = serde_json::from_str(&event.payload).unwrap_or(serde_json::Value::Null);
        let envelope = json!({
            "event_id": event.id,
            "event_type": event.event_type.as_str(),
            "timestamp": timestamp,
            "data": data,
        });

        let result = self
            .http
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Timestamp", timestamp.to_string())
            .header("X-Webhook-Event-Id", event.id.to_string())
            .header("X-Webhook-Event", event.event_type.as_str())
            .json(&envelope)
            .send()
            .await;

        let outcome = match result {
            Ok(resp) if resp.status().is_success() => {
                let status_code = resp.status().as_u16();
                let body = resp.text().await.ok();
                DeliveryOutcome::Delivered { status_code, body }
            }
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let body = resp.text().await.ok();
                DeliveryOutcome::Failed {
                    status_code: Some(status_code),
                    response_body: body.map(|b| truncate(&b, RESPONSE_BODY_MAX_LEN)),
                    error_message: format!("HTTP {status_code}"),
                }
            }
            Err(err) if err.is_timeout() => DeliveryOutcome::Failed {
                status_code: None,
                response_body: None,
                error_message: "Request timed out".to_string(),
            },
            Err(err) => DeliveryOutcome::Failed {
                status_code: None,
                response_body: None,
                error_message: truncate(&err.to_string(), ERROR_MESSAGE_MAX_LEN),
            },
        };

        let duration = started.elapsed().as_secs_f64();

        let attempt_outcome = match outcome {
            DeliveryOutcome::Delivered { status_code, body } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_delivery("delivered", duration);
                }
                AttemptOutcome {
                    event_id: event.id,
                    subscription_id: subscription.id,
                    attempt_number,
                    status: DeliveryStatus::Delivered,
                    http_status_code: Some(status_code as i32),
                    response_body: body.map(|b| truncate(&b, RESPONSE_BODY_MAX_LEN)),
                    error_message: None,
                    next_retry_at: None,
                    dead_letter_total_attempts: None,
                }
            }
            // Every non-2xx outcome is handled identically (§4.4 steps 6/7):
            // dead-letter once the retry budget is exhausted, otherwise
            // reschedule. There is no separate permanent-failure path.
            DeliveryOutcome::Failed {
                status_code,
                response_body,
                error_message,
            } => {
                if attempt_number >= self.config.max_attempts {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_delivery("dead_lettered", duration);
                    }
                    AttemptOutcome {
                        event_id: event.id,
                        subscription_id: subscription.id,
                        attempt_number,
                        status: DeliveryStatus::DeadLettered,
                        http_status_code: status_code.map(|c| c as i32),
                        response_body,
                        error_message: Some(error_message),
                        next_retry_at: None,
                        dead_letter_total_attempts: Some(attempt_number),
                    }
                } else {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_delivery("failed_retryable", duration);
                    }
                    let backoff = compute_backoff(attempt_number, self.config.backoff_base_seconds);
                    AttemptOutcome {
                        event_id: event.id,
                        subscription_id: subscription.id,
                        attempt_number,
                        status: DeliveryStatus::Pending,
                        http_status_code: status_code.map(|c| c as i32),
                        response_body,
                        error_message: Some(error_message),
                        next_retry_at: Some(Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default()),
                        dead_letter_total_attempts: None,
                    }
                }
            }
        };

        match self.deliveries.record_attempt(attempt_outcome).await? {
            Some(attempt) => {
                tracing::info!(
                    event_id = %event.id,
                    subscription_id = %subscription.id,
                    attempt_number = attempt.attempt_number,
                    status = %attempt.status,
                    "delivery_attempt_recorded"
                );
            }
            None => {
                tracing::debug!(
                    event_id = %event.id,
                    subscription_id = %subscription.id,
                    attempt_number,
                    "attempt already recorded by another worker"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::repository::{SubscriptionDraft, SubscriptionRepository};
    use crate::testutil::InMemoryStore;

    fn attempt(status: DeliveryStatus, attempt_number: i32, next_retry_at: Option<DateTime<Utc>>) -> DeliveryAttempt {
        DeliveryAttempt {
            id: uuid::Uuid::new_v4(),
            event_id: uuid::Uuid::new_v4(),
            subscription_id: uuid::Uuid::new_v4(),
            attempt_number,
            status,
            http_status_code: None,
            response_body: None,
            error_message: None,
            next_retry_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn gate_delivered_pair_is_skipped() {
        let decision = evaluate_gate(true, false, None, Utc::now());
        assert_eq!(decision, GateDecision::Skip);
    }

    #[test]
    fn gate_dead_lettered_pair_is_skipped() {
        let decision = evaluate_gate(false, true, None, Utc::now());
        assert_eq!(decision, GateDecision::Skip);
    }

    #[test]
    fn gate_no_attempts_yet_attempts_first() {
        let decision = evaluate_gate(false, false, None, Utc::now());
        assert_eq!(decision, GateDecision::Attempt { attempt_number: 1 });
    }

    #[test]
    fn gate_pending_and_due_attempts_next_number() {
        let a = attempt(DeliveryStatus::Pending, 2, Some(Utc::now() - chrono::Duration::seconds(1)));
        let decision = evaluate_gate(false, false, Some(&a), Utc::now());
        assert_eq!(decision, GateDecision::Attempt { attempt_number: 3 });
    }

    #[test]
    fn gate_pending_not_due_is_skipped() {
        let a = attempt(DeliveryStatus::Pending, 2, Some(Utc::now() + chrono::Duration::seconds(60)));
        let decision = evaluate_gate(false, false, Some(&a), Utc::now());
        assert_eq!(decision, GateDecision::Skip);
    }

    #[test]
    fn gate_failed_without_retry_is_skipped_forever() {
        let a = attempt(DeliveryStatus::Failed, 1, None);
        let decision = evaluate_gate(false, false, Some(&a), Utc::now());
        assert_eq!(decision, GateDecision::Skip);
    }

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        assert_eq!(compute_backoff(1, 2.0), Duration::from_secs(2));
        assert_eq!(compute_backoff(2, 2.0), Duration::from_secs(4));
        assert_eq!(compute_backoff(3, 2.0), Duration::from_secs(8));
        assert_eq!(compute_backoff(20, 2.0), Duration::from_secs(MAX_BACKOFF_SECONDS as u64));
    }

    #[tokio::test]
    async fn cycle_skips_subscriptions_not_listening_for_the_event_type() {
        let events = Arc::new(InMemoryStore::new());
        let subs = Arc::new(InMemoryStore::new());
        let deliveries = Arc::new(InMemoryStore::new());

        let event = events
            .insert(EventType::RequestApproved, r#"{"a":1}"#.to_string())
            .await
            .unwrap();
        let sub = subs
            .create(SubscriptionDraft {
                url: "https://example.com/hook".into(),
                secret: "a-long-enough-secret-value".into(),
                events: vec!["request_submitted".into()],
                enabled: true,
            })
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(events.clone(), subs.clone(), deliveries.clone(), DispatcherConfig::default());
        dispatcher.run_cycle().await.unwrap();

        assert!(!deliveries.has_delivered(event.id, sub.id).await.unwrap());
        assert_eq!(deliveries.count_attempts(event.id, sub.id).await.unwrap(), 0);
    }
}
