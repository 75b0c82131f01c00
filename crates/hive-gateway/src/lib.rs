// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
pub mod metrics_exporter;
mod routes;
mod state;
mod ws;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies above this size are rejected before JSON decoding.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build the HTTP/WS router.  Construction is pure; the composition root
/// binds and serves it.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/sessions", post(routes::create_session).get(routes::list_sessions))
        .route("/api/sessions/:id", get(routes::get_session).delete(routes::end_session))
        .route("/api/sessions/:id/messages", post(routes::send_message))
        .route("/api/sessions/:id/export", get(routes::export_session))
        .route("/api/agents", get(routes::list_agents))
        .route("/api/agents/:id", get(routes::get_agent).patch(routes::patch_agent))
        .route("/api/cron/jobs", get(routes::list_jobs))
        .route("/api/cron/jobs/:id", get(routes::get_job).patch(routes::patch_job))
        .route("/api/cron/jobs/:id/enable", post(routes::enable_job))
        .route("/api/cron/jobs/:id/disable", post(routes::disable_job))
        .route("/api/cron/jobs/:id/history", get(routes::job_history))
        .route("/api/cron/reload", post(routes::reload_jobs))
        .route("/ws/chat/:session_id", get(ws::ws_handler))
        .layer(axum::middleware::from_fn(routes::track_request_metrics))
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
