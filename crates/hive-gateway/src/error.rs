// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use hive_core::ChatError;
use hive_model::LlmError;
use hive_store::StoreError;

/// REST error envelope: `{ "detail": "…" }`.  Status codes map the
/// distinguished failure kinds; no stack traces reach clients.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("hive_http_errors_total", "status" => self.status.as_u16().to_string())
            .increment(1);
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match &e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::SessionEnded(_) | StoreError::DeleteActive(_) => StatusCode::CONFLICT,
            StoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, detail: e.to_string() }
    }
}

impl From<LlmError> for ApiError {
    fn from(e: LlmError) -> Self {
        // Model-side faults surface as a bad gateway; the message stays
        // human-readable.
        Self { status: StatusCode::BAD_GATEWAY, detail: e.to_string() }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Store(e) => e.into(),
            ChatError::Llm(e) => e.into(),
        }
    }
}
