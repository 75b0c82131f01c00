// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use crate::{db::Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionType {
    Interactive,
    Cron,
    Agent,
    Roundtable,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Cron => "cron",
            Self::Agent => "agent",
            Self::Roundtable => "roundtable",
        }
    }
}

/// A conversation owned by one agent.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub session_type: SessionType,
    pub model_override: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: i64,
    /// Count of most-recent messages retained for prompting.
    pub context_window: i64,
    pub system_prompt_override: Option<String>,
    pub status: SessionStatus,
    pub title: Option<String>,
    pub message_count: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub metadata: Json<serde_json::Value>,
}

/// Parameters for creating a session; unspecified fields take the
/// runtime defaults recorded in the schema.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub agent_id: String,
    pub session_type: SessionType,
    pub model_override: Option<String>,
    pub system_prompt_override: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: i64,
    pub context_window: i64,
    pub metadata: serde_json::Value,
}

impl NewSession {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_type: SessionType::Interactive,
            model_override: None,
            system_prompt_override: None,
            temperature: 0.7,
            max_output_tokens: 4096,
            context_window: 50,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_type(mut self, t: SessionType) -> Self {
        self.session_type = t;
        self
    }
}

/// Optional field-set for `update_session`; `None` fields are untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub model_override: Option<String>,
    pub system_prompt_override: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<i64>,
    pub context_window: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

impl Store {
    /// Create a session, enforcing the per-minute creation cap.
    pub async fn create_session(&self, new: NewSession) -> Result<Session, StoreError> {
        self.check_rate_limit()?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (id, agent_id, session_type, model_override, temperature, \
             max_output_tokens, context_window, system_prompt_override, status, created_at, \
             updated_at, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.agent_id)
        .bind(new.session_type)
        .bind(&new.model_override)
        .bind(new.temperature)
        .bind(new.max_output_tokens)
        .bind(new.context_window)
        .bind(&new.system_prompt_override)
        .bind(now)
        .bind(now)
        .bind(Json(new.metadata))
        .execute(&self.pool)
        .await?;

        metrics::counter!("hive_sessions_created_total").increment(1);
        debug!(session = %id, agent = %new.agent_id, "session created");
        self.get_session(&id).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    /// List sessions newest-updated first with optional filters.
    /// `page` is 1-based.
    pub async fn list_sessions(
        &self,
        agent_id: Option<&str>,
        status: Option<SessionStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<Session>, StoreError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let rows = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions \
             WHERE (?1 IS NULL OR agent_id = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY updated_at DESC LIMIT ?3 OFFSET ?4",
        )
        .bind(agent_id)
        .bind(status.map(|s| s.as_str()))
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Apply a field-set update and bump `updated_at`.
    pub async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<Session, StoreError> {
        // Verify existence first so patches of unknown ids report NotFound.
        let _ = self.get_session(id).await?;

        let mut qb = sqlx::QueryBuilder::new("UPDATE sessions SET updated_at = ");
        qb.push_bind(Utc::now());
        if let Some(v) = patch.title {
            qb.push(", title = ").push_bind(v);
        }
        if let Some(v) = patch.model_override {
            qb.push(", model_override = ").push_bind(v);
        }
        if let Some(v) = patch.system_prompt_override {
            qb.push(", system_prompt_override = ").push_bind(v);
        }
        if let Some(v) = patch.temperature {
            qb.push(", temperature = ").push_bind(v);
        }
        if let Some(v) = patch.max_output_tokens {
            qb.push(", max_output_tokens = ").push_bind(v);
        }
        if let Some(v) = patch.context_window {
            qb.push(", context_window = ").push_bind(v);
        }
        if let Some(v) = patch.metadata {
            qb.push(", metadata = ").push_bind(Json(v));
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;

        self.get_session(id).await
    }

    /// End a session: status=ended, ended_at=now.  Idempotent.
    pub async fn end_session(&self, id: &str) -> Result<Session, StoreError> {
        let _ = self.get_session(id).await?;
        sqlx::query(
            "UPDATE sessions SET status = 'ended', ended_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_session(id).await
    }

    /// Delete an ended session and cascade its messages.
    ///
    /// Deleting an active session is refused so transcripts cannot vanish
    /// under a live conversation.
    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let session = self.get_session(id).await?;
        if session.status == SessionStatus::Active {
            return Err(StoreError::DeleteActive(id.to_string()));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(session = %id, "session deleted");
        Ok(())
    }

    /// Return the newest active session for the agent, creating one if none
    /// exists.
    pub async fn get_or_create_session(&self, agent_id: &str) -> Result<Session, StoreError> {
        let existing = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE agent_id = ? AND status = 'active' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        match existing {
            Some(s) => Ok(s),
            None => self.create_session(NewSession::for_agent(agent_id)).await,
        }
    }

    /// Atomic counter bump applied after each turn.  A single UPDATE keeps
    /// concurrent writers (streaming + cron collision) from losing updates.
    pub async fn bump_session_counters(
        &self,
        id: &str,
        message_delta: i64,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sessions SET \
             message_count = message_count + ?, \
             total_input_tokens = total_input_tokens + ?, \
             total_output_tokens = total_output_tokens + ?, \
             total_cost = total_cost + ?, \
             updated_at = ? \
             WHERE id = ?",
        )
        .bind(message_delta)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(cost)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set the auto-derived title unless one is already present.
    pub async fn set_title_if_absent(&self, id: &str, title: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET title = ? WHERE id = ? AND title IS NULL")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_sessions(&self) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    fn check_rate_limit(&self) -> Result<(), StoreError> {
        let mut recent = self.recent_creations.lock().unwrap();
        let cutoff = Instant::now() - Duration::from_secs(60);
        while recent.front().is_some_and(|t| *t < cutoff) {
            recent.pop_front();
        }
        if recent.len() >= self.session_rate_limit as usize {
            metrics::counter!("hive_errors_total", "kind" => "rate_limited").increment(1);
            return Err(StoreError::RateLimited(self.session_rate_limit));
        }
        recent.push_back(Instant::now());
        Ok(())
    }
}

/// Derive a session title from the first user message: first line,
/// whitespace-collapsed, truncated to 80 chars with an ellipsis.
pub fn derive_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("");
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= 80 {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(79).collect();
        format!("{truncated}…")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        let s = store.create_session(NewSession::for_agent("main")).await.unwrap();
        assert_eq!(s.agent_id, "main");
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.message_count, 0);

        let fetched = store.get_session(&s.id).await.unwrap();
        assert_eq!(fetched.id, s.id);
        assert_eq!(fetched.context_window, 50);
    }

    #[tokio::test]
    async fn get_unknown_session_is_not_found() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(matches!(
            store.get_session("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_active_session_is_refused() {
        let store = Store::open_in_memory().await.unwrap();
        let s = store.create_session(NewSession::for_agent("main")).await.unwrap();
        assert!(matches!(
            store.delete_session(&s.id).await,
            Err(StoreError::DeleteActive(_))
        ));
        // Ending first makes deletion legal.
        store.end_session(&s.id).await.unwrap();
        store.delete_session(&s.id).await.unwrap();
        assert!(store.get_session(&s.id).await.is_err());
    }

    #[tokio::test]
    async fn end_session_sets_status_and_timestamp() {
        let store = Store::open_in_memory().await.unwrap();
        let s = store.create_session(NewSession::for_agent("main")).await.unwrap();
        let ended = store.end_session(&s.id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());
    }

    #[tokio::test]
    async fn get_or_create_is_stable_until_ended() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store.get_or_create_session("main").await.unwrap();
        let b = store.get_or_create_session("main").await.unwrap();
        assert_eq!(a.id, b.id);

        store.end_session(&a.id).await.unwrap();
        let c = store.get_or_create_session("main").await.unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn rate_limit_rejects_eleventh_creation() {
        let store = Store::open_in_memory().await.unwrap();
        for _ in 0..10 {
            store.create_session(NewSession::for_agent("main")).await.unwrap();
        }
        assert!(matches!(
            store.create_session(NewSession::for_agent("main")).await,
            Err(StoreError::RateLimited(10))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_agent_and_status() {
        let store = Store::open_in_memory().await.unwrap();
        let a = store.create_session(NewSession::for_agent("alpha")).await.unwrap();
        let _b = store.create_session(NewSession::for_agent("beta")).await.unwrap();
        store.end_session(&a.id).await.unwrap();

        let alpha = store.list_sessions(Some("alpha"), None, 1, 20).await.unwrap();
        assert_eq!(alpha.len(), 1);

        let ended = store
            .list_sessions(None, Some(SessionStatus::Ended), 1, 20)
            .await
            .unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].id, a.id);

        let active = store
            .list_sessions(None, Some(SessionStatus::Active), 1, 20)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn counters_accumulate_atomically() {
        let store = Store::open_in_memory().await.unwrap();
        let s = store.create_session(NewSession::for_agent("main")).await.unwrap();
        store.bump_session_counters(&s.id, 2, 100, 50, 0.01).await.unwrap();
        store.bump_session_counters(&s.id, 2, 10, 5, 0.001).await.unwrap();
        let s = store.get_session(&s.id).await.unwrap();
        assert_eq!(s.message_count, 4);
        assert_eq!(s.total_input_tokens, 110);
        assert_eq!(s.total_output_tokens, 55);
        assert!((s.total_cost - 0.011).abs() < 1e-9);
        assert!(s.updated_at >= s.created_at);
    }

    #[tokio::test]
    async fn patch_updates_only_named_fields() {
        let store = Store::open_in_memory().await.unwrap();
        let s = store.create_session(NewSession::for_agent("main")).await.unwrap();
        let patched = store
            .update_session(
                &s.id,
                SessionPatch { context_window: Some(5), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(patched.context_window, 5);
        assert_eq!(patched.temperature, s.temperature);
    }

    #[tokio::test]
    async fn title_set_only_once() {
        let store = Store::open_in_memory().await.unwrap();
        let s = store.create_session(NewSession::for_agent("main")).await.unwrap();
        store.set_title_if_absent(&s.id, "first").await.unwrap();
        store.set_title_if_absent(&s.id, "second").await.unwrap();
        let s = store.get_session(&s.id).await.unwrap();
        assert_eq!(s.title.as_deref(), Some("first"));
    }

    #[test]
    fn derive_title_takes_first_line_collapsed() {
        assert_eq!(derive_title("Hello   world\nsecond line"), "Hello world");
    }

    #[test]
    fn derive_title_truncates_to_eighty_chars() {
        let long = "x".repeat(200);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), 80);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn derive_title_of_short_text_is_verbatim() {
        assert_eq!(derive_title("Hello"), "Hello");
    }
}
