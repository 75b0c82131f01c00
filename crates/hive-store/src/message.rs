// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::{db::Store, StoreError};

/// A tool call as persisted on an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, verbatim from the model.
    pub arguments: String,
}

/// One stored turn.  Append-only: rows are never mutated after insert and
/// are removed only by session-delete cascade.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Option<Json<Vec<ToolCallRecord>>>,
    pub tool_call_id: Option<String>,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
    pub embedding: Option<Json<Vec<f32>>>,
}

/// Insert parameters for one turn.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub tool_call_id: Option<String>,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub latency_ms: i64,
    pub embedding: Option<Vec<f32>>,
}

impl NewMessage {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role: "user".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role: "assistant".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn tool(
        session_id: impl Into<String>,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            role: "tool".into(),
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            ..Default::default()
        }
    }
}

impl Store {
    /// Append one message.  The store assigns id and creation timestamp;
    /// strict `created_at` ordering within a session follows from the
    /// engine being the sole writer.
    pub async fn append_message(&self, new: NewMessage) -> Result<MessageRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, thinking, tool_calls, \
             tool_call_id, model, input_tokens, output_tokens, cost, latency_ms, created_at, \
             embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.session_id)
        .bind(&new.role)
        .bind(&new.content)
        .bind(&new.thinking)
        .bind(new.tool_calls.map(Json))
        .bind(&new.tool_call_id)
        .bind(&new.model)
        .bind(new.input_tokens)
        .bind(new.output_tokens)
        .bind(new.cost)
        .bind(new.latency_ms)
        .bind(now)
        .bind(new.embedding.map(Json))
        .execute(&self.pool)
        .await?;

        metrics::counter!("hive_messages_total", "role" => new.role.clone()).increment(1);
        self.get_message(&id).await
    }

    pub async fn get_message(&self, id: &str) -> Result<MessageRecord, StoreError> {
        sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }

    /// All messages of a session in creation order.
    pub async fn session_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Keyset-paginated history: messages created strictly after `after`,
    /// ascending, up to `limit` rows.  Pass `None` to start from the top.
    pub async fn message_history(
        &self,
        session_id: &str,
        after: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages \
             WHERE session_id = ?1 AND (?2 IS NULL OR created_at > ?2) \
             ORDER BY created_at ASC, id ASC LIMIT ?3",
        )
        .bind(session_id)
        .bind(after)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The most recent `limit` messages of a session, returned in
    /// chronological order.  This is the context-window read.
    pub async fn recent_messages(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages WHERE session_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Substring search over message content, newest matches first.
    pub async fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query_as::<_, MessageRecord>(
            "SELECT * FROM messages \
             WHERE content LIKE ?1 ESCAPE '\\' AND (?2 IS NULL OR session_id = ?2) \
             ORDER BY created_at DESC LIMIT ?3",
        )
        .bind(pattern)
        .bind(session_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_messages(&self, session_id: &str) -> Result<i64, StoreError> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(n)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
