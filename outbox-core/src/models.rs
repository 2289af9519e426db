//! Persistent entities for the transactional outbox / webhook dispatcher.
//!
//! Four tables, leaves first: [`Subscription`] and [`OutboxEvent`] are
//! written by callers outside the dispatcher; [`DeliveryAttempt`] and
//! [`DeadLetter`] are owned exclusively by the dispatcher (see
//! [`crate::dispatcher`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Closed set of event types a producer may publish.
///
/// Stored as a native Postgres enum (`event_type_enum`); unrecognized tags
/// are rejected at the outbox boundary, never reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_type_enum", rename_all = "snake_case")]
pub enum EventType {
    RequestSubmitted,
    RequestApproved,
    RequestRejected,
    RequestUpdated,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::RequestSubmitted,
        EventType::RequestApproved,
        EventType::RequestRejected,
        EventType::RequestUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequestSubmitted => "request_submitted",
            EventType::RequestApproved => "request_approved",
            EventType::RequestRejected => "request_rejected",
            EventType::RequestUpdated => "request_updated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status_enum", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP subscriber registered to receive webhook deliveries.
///
/// `events` is persisted as a comma-separated string (matching the source
/// system's storage choice) and rematerialized into a `Vec<String>` on
/// read; callers never see the wire representation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub url: String,
    pub secret: String,
    pub enabled: bool,
    #[sqlx(rename = "events")]
    events_raw: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        id: Uuid,
        url: String,
        secret: String,
        enabled: bool,
        events: &[String],
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            url,
            secret,
            enabled,
            events_raw: events.join(","),
            created_at,
            updated_at,
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn events_csv(&self) -> &str {
        &self.events_raw
    }

    pub fn listens_for(&self, event_type: EventType) -> bool {
        self.events().iter().any(|e| e == event_type.as_str())
    }
}

/// A durable record of a domain event awaiting fanout. Never mutated or
/// deleted by the core; retention is an external policy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: EventType,
    /// Canonical JSON bytes of the published payload, stored as text. This
    /// exact string is what the signer authenticates (see
    /// [`crate::signer`]) -- not the delivery envelope wrapped around it.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// One HTTP delivery try, recorded before the attempt is known to have
/// succeeded or failed. See invariants in [`crate::dispatcher`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub attempt_number: i32,
    pub status: DeliveryStatus,
    pub http_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A quarantine marker for an `(event, subscription)` pair whose retry
/// budget is exhausted. Deleted on replay.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: Uuid,
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub last_error: Option<String>,
    pub total_attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// Truncate a byte string to a maximum length, matching the source's
/// `text[:n]` truncation semantics (response bodies ≤1000 bytes, error
/// messages ≤500 bytes).
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_str() {
        for et in EventType::ALL {
            assert_eq!(EventType::parse(et.as_str()), Some(et));
        }
        assert_eq!(EventType::parse("not_a_real_type"), None);
    }

    #[test]
    fn subscription_events_split_and_trim() {
        let sub = Subscription::new(
            Uuid::new_v4(),
            "https://example.com/hook".into(),
            "a-very-long-secret-value".into(),
            true,
            &["request_submitted".into(), "request_approved".into()],
            Utc::now(),
            Utc::now(),
        );
        assert_eq!(
            sub.events(),
            vec!["request_submitted".to_string(), "request_approved".to_string()]
        );
        assert!(sub.listens_for(EventType::RequestSubmitted));
        assert!(!sub.listens_for(EventType::RequestRejected));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "hello world";
        assert_eq!(truncate(s, 5), "hello");
        assert_eq!(truncate(s, 100), s);
    }
}
