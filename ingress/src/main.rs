mod api;
mod config;
mod connectors;
mod db;
mod error;
mod metrics;

use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use outbox_core::dispatcher::{Dispatcher, DispatcherConfig};
use outbox_core::repository::PgOutboxStore;
use prometheus::Registry;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "ingress={level},outbox_core={level},tower_http={level}",
                    level = config.log_level.to_lowercase()
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("configuration loaded");

    let db = Database::connect(&config).await?;
    db.run_migrations().await?;

    let store = Arc::new(PgOutboxStore::new(db.pg.clone()));

    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(outbox_core::metrics::Metrics::new(&registry)?);

    let dispatcher_config = DispatcherConfig {
        max_attempts: config.delivery.max_attempts,
        backoff_base_seconds: config.delivery.backoff_base_seconds,
        poll_interval: config.delivery.poll_interval,
        request_timeout: config.delivery.request_timeout,
    };
    let dispatcher = Dispatcher::new(store.clone(), store.clone(), store.clone(), dispatcher_config)
        .with_metrics(metrics.clone());

    tokio::spawn(async move {
        if let Err(err) = dispatcher.start().await {
            tracing::error!(error = %err, "dispatcher loop exited");
        }
    });

    let state = AppState {
        store,
        config: config.clone(),
        metrics,
        registry,
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api/v1", api::routes())
        .layer(middleware::from_fn_with_state(state.clone(), record_http_metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(%addr, "starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn record_http_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    state.metrics.record_http_request(&method, &path, response.status().as_u16());
    response
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgOutboxStore>,
    pub config: Config,
    pub metrics: Arc<outbox_core::metrics::Metrics>,
    pub registry: Arc<Registry>,
    pub http: reqwest::Client,
}
