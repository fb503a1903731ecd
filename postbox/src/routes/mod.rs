//! HTTP API.

mod auth;
mod campaigns;
mod cron;
mod tracking;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::routing::ResourceRouter;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let campaign_routes = ResourceRouter::new()
        .list(campaigns::list)
        .create(campaigns::create)
        .delete(campaigns::delete)
        .member("/jobs", get(campaigns::jobs))
        .into_router();

    Router::new()
        .route("/health", get(health))
        .route("/api/cron/process", get(cron::process).post(cron::process))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .nest("/api/campaigns", campaign_routes)
        .route("/api/jobs/:id/cancel", post(campaigns::cancel_job))
        .route("/api/track/:tracking_id", get(tracking::open))
        .route("/api/survey/:tracking_id", post(tracking::survey))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}
