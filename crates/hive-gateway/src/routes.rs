// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! REST surface: sessions, agents, cron jobs, health.

use std::time::Instant;

use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use hive_core::{ChatResponse, SendOptions};
use hive_store::{
    export_jsonl, export_markdown, AgentPatch, JobPatch, NewSession, SessionStatus, SessionType,
};

use crate::{ApiError, AppState};

// ── Request metrics ───────────────────────────────────────────────────────────

/// Record request totals and duration per route template.
pub async fn track_request_metrics(req: Request, next: Next) -> Response {
    let operation = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::counter!("hive_http_requests_total", "operation" => operation.clone()).increment(1);
    metrics::histogram!("hive_http_request_duration_seconds", "operation" => operation)
        .record(start.elapsed().as_secs_f64());
    response
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let database = state.store.ping().await;
    let sessions = state.store.count_sessions().await.unwrap_or(0);
    let agents = state.store.list_agents().await.map(|a| a.len()).unwrap_or(0);
    Ok(Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "database": database,
        "sessions": sessions,
        "cron_jobs": state.scheduler.job_count().await,
        "agents": agents,
    })))
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub agent_id: String,
    #[serde(default)]
    pub session_type: Option<SessionType>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<i64>,
    pub context_window: Option<i64>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = &state.config.chat;
    let new = NewSession {
        agent_id: body.agent_id,
        session_type: body.session_type.unwrap_or(SessionType::Interactive),
        model_override: body.model,
        system_prompt_override: body.system_prompt,
        temperature: body.temperature.unwrap_or(chat.temperature),
        max_output_tokens: body.max_output_tokens.unwrap_or(chat.max_output_tokens),
        context_window: body.context_window.unwrap_or(chat.context_window),
        metadata: json!({}),
    };
    let session = state.store.create_session(new).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub agent_id: Option<String>,
    pub status: Option<SessionStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(q): Query<ListSessionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = state
        .store
        .list_sessions(q.agent_id.as_deref(), q.status, q.page, q.page_size)
        .await?;
    Ok(Json(json!({
        "sessions": sessions,
        "page": q.page,
        "page_size": q.page_size,
    })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.store.get_session(&id).await?;
    let messages = state.store.session_messages(&id).await?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
    #[serde(default)]
    pub enable_thinking: bool,
    #[serde(default = "default_true")]
    pub enable_tools: bool,
}

fn default_true() -> bool {
    true
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let opts = SendOptions {
        enable_thinking: body.enable_thinking,
        enable_tools: body.enable_tools,
    };
    let response = state.engine.send_message(&id, &body.content, opts).await?;
    Ok(Json(response))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.store.end_session(&id).await?;
    Ok(Json(json!({ "session": session })))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_format")]
    pub format: String,
}

fn default_export_format() -> String {
    "jsonl".into()
}

pub async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let session = state.store.get_session(&id).await?;
    let messages = state.store.session_messages(&id).await?;

    let (body, content_type, extension) = match q.format.as_str() {
        "jsonl" => (export_jsonl(&session, &messages), "application/x-ndjson", "jsonl"),
        "markdown" => (export_markdown(&session, &messages), "text/markdown", "md"),
        other => return Err(ApiError::bad_request(format!("unknown export format '{other}'"))),
    };

    let disposition = format!("attachment; filename=\"session-{id}.{extension}\"");
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// ── Agents ────────────────────────────────────────────────────────────────────

pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agents = state.store.list_agents().await?;
    Ok(Json(json!({ "agents": agents })))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = state.store.get_agent(&id).await?;
    Ok(Json(json!({ "agent": agent })))
}

pub async fn patch_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = state.store.patch_agent(&id, patch).await?;
    Ok(Json(json!({ "agent": agent })))
}

// ── Cron ──────────────────────────────────────────────────────────────────────

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let jobs = state.store.list_jobs(false).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.store.get_job(&id).await?;
    Ok(Json(json!({ "job": job })))
}

pub async fn patch_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(schedule) = &patch.schedule {
        hive_scheduler::parse_schedule(schedule)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
    }
    let job = state.store.patch_job(&id, patch).await?;
    state.scheduler.reload().await.map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: e.to_string(),
    })?;
    Ok(Json(json!({ "job": job })))
}

pub async fn enable_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.store.set_job_enabled(&id, true).await?;
    let _ = state.scheduler.reload().await;
    Ok(Json(json!({ "job": job })))
}

pub async fn disable_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.store.set_job_enabled(&id, false).await?;
    let _ = state.scheduler.reload().await;
    Ok(Json(json!({ "job": job })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

pub async fn job_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // 404 for unknown jobs rather than an empty history.
    let _ = state.store.get_job(&id).await?;
    let history = state.store.job_history(&id, q.page, q.page_size).await?;
    Ok(Json(json!({ "history": history, "page": q.page, "page_size": q.page_size })))
}

pub async fn reload_jobs(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.scheduler.reload().await.map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: e.to_string(),
    })?;
    Ok(Json(json!({ "jobs_registered": count })))
}
