use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use outbox_core::subscriptions::SubscriptionService;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all).post(create))
        .route("/:subscription_id", get(get_one).put(update).delete(delete))
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionCreateRequest {
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionUpdateRequest {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<outbox_core::models::Subscription> for SubscriptionResponse {
    fn from(sub: outbox_core::models::Subscription) -> Self {
        Self {
            id: sub.id,
            url: sub.url.clone(),
            events: sub.events(),
            enabled: sub.enabled,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

async fn create(
    State(state): State<AppState>,
    Json(body): Json<SubscriptionCreateRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>)> {
    let service = SubscriptionService::new(state.store.clone());
    let sub = service.create(body.url, body.secret, body.events, body.enabled).await?;
    Ok((StatusCode::CREATED, Json(sub.into())))
}

async fn list_all(State(state): State<AppState>) -> Result<Json<Vec<SubscriptionResponse>>> {
    let service = SubscriptionService::new(state.store.clone());
    let subs = service.list().await?;
    Ok(Json(subs.into_iter().map(Into::into).collect()))
}

async fn get_one(State(state): State<AppState>, Path(subscription_id): Path<Uuid>) -> Result<Json<SubscriptionResponse>> {
    let service = SubscriptionService::new(state.store.clone());
    let sub = service.get(subscription_id).await?;
    Ok(Json(sub.into()))
}

async fn update(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
    Json(body): Json<SubscriptionUpdateRequest>,
) -> Result<Json<SubscriptionResponse>> {
    let service = SubscriptionService::new(state.store.clone());
    let sub = service
        .update(subscription_id, body.url, body.secret, body.events, body.enabled)
        .await?;
    Ok(Json(sub.into()))
}

async fn delete(State(state): State<AppState>, Path(subscription_id): Path<Uuid>) -> Result<StatusCode> {
    let service = SubscriptionService::new(state.store.clone());
    service.delete(subscription_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

