use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use outbox_core::outbox::OutboxService;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::connectors::slack;
use crate::error::Result;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(create_event))
}

#[derive(Debug, Deserialize)]
pub struct EventCreateRequest {
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl From<outbox_core::models::OutboxEvent> for EventResponse {
    fn from(event: outbox_core::models::OutboxEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.as_str().to_string(),
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

async fn create_event(
    State(state): State<AppState>,
    Json(body): Json<EventCreateRequest>,
) -> Result<(StatusCode, Json<EventResponse>)> {
    let service = OutboxService::new(state.store.clone()).with_metrics(state.metrics.clone());
    let event = service.publish(&body.event_type, &body.payload).await?;

    if event.event_type == outbox_core::models::EventType::RequestSubmitted {
        let event_for_hook = event.clone();
        let slack_config = state.config.slack.clone();
        let http = state.http.clone();
        tokio::spawn(async move {
            slack::send_slack_notification(&event_for_hook, &slack_config, &http).await;
        });
    }

    Ok((StatusCode::CREATED, Json(event.into())))
}
