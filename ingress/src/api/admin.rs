use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use outbox_core::admin::AdminService;
use outbox_core::dispatcher::DispatcherConfig;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/:event_id/attempts", get(list_attempts))
        .route("/dead-letters/:dead_letter_id/replay", post(replay))
}

#[derive(Debug, Serialize)]
pub struct DeliveryAttemptResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub attempt_number: i32,
    pub status: String,
    pub http_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<outbox_core::models::DeliveryAttempt> for DeliveryAttemptResponse {
    fn from(a: outbox_core::models::DeliveryAttempt) -> Self {
        Self {
            id: a.id,
            event_id: a.event_id,
            subscription_id: a.subscription_id,
            attempt_number: a.attempt_number,
            status: a.status.as_str().to_string(),
            http_status_code: a.http_status_code,
            response_body: a.response_body,
            error_message: a.error_message,
            next_retry_at: a.next_retry_at,
            created_at: a.created_at,
        }
    }
}

fn admin_service(state: &AppState) -> AdminService<
    outbox_core::repository::PgOutboxStore,
    outbox_core::repository::PgOutboxStore,
    outbox_core::repository::PgOutboxStore,
> {
    AdminService::new(
        state.store.clone(),
        state.store.clone(),
        state.store.clone(),
        DispatcherConfig {
            max_attempts: state.config.delivery.max_attempts,
            backoff_base_seconds: state.config.delivery.backoff_base_seconds,
            poll_interval: state.config.delivery.poll_interval,
            request_timeout: state.config.delivery.request_timeout,
        },
    )
}

async fn list_attempts(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryAttemptResponse>>> {
    let attempts = admin_service(&state).list_attempts(event_id).await?;
    Ok(Json(attempts.into_iter().map(Into::into).collect()))
}

async fn replay(State(state): State<AppState>, Path(dead_letter_id): Path<Uuid>) -> Result<(StatusCode, Json<Value>)> {
    admin_service(&state).replay(dead_letter_id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "replayed", "dead_letter_id": dead_letter_id })),
    ))
}
