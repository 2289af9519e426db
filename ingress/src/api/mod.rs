mod admin;
mod events;
mod subscriptions;

use axum::Router;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/subscriptions", subscriptions::routes())
        .nest("/events", events::routes())
        .nest("/admin", admin::routes())
}
