//! Error types for the outbox delivery engine.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
///
/// Variants map to the taxonomy in the design: `Validation` and `NotFound`
/// are surfaced synchronously to callers (ingress turns them into HTTP
/// status codes), everything else is retained as delivery-attempt state by
/// the dispatcher rather than propagated to a publisher.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Referenced row is absent (subscription, event, dead letter)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input violates a domain rule (unknown event type, short secret, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}

impl OutboxError {
    pub fn event_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("outbox event {id}"))
    }

    pub fn subscription_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("subscription {id}"))
    }
}
