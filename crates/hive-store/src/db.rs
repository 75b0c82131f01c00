// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::StoreError;

/// Embedded schema, applied idempotently at startup.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id                     TEXT PRIMARY KEY,
    agent_id               TEXT NOT NULL,
    session_type           TEXT NOT NULL DEFAULT 'interactive',
    model_override         TEXT,
    temperature            REAL NOT NULL DEFAULT 0.7,
    max_output_tokens      INTEGER NOT NULL DEFAULT 4096,
    context_window         INTEGER NOT NULL DEFAULT 50,
    system_prompt_override TEXT,
    status                 TEXT NOT NULL DEFAULT 'active',
    title                  TEXT,
    message_count          INTEGER NOT NULL DEFAULT 0,
    total_input_tokens     INTEGER NOT NULL DEFAULT 0,
    total_output_tokens    INTEGER NOT NULL DEFAULT 0,
    total_cost             REAL NOT NULL DEFAULT 0,
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL,
    ended_at               TEXT,
    metadata               TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_sessions_agent_updated
    ON sessions (agent_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id            TEXT PRIMARY KEY,
    session_id    TEXT NOT NULL REFERENCES sessions (id),
    role          TEXT NOT NULL,
    content       TEXT NOT NULL,
    thinking      TEXT,
    tool_calls    TEXT,
    tool_call_id  TEXT,
    model         TEXT,
    input_tokens  INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost          REAL NOT NULL DEFAULT 0,
    latency_ms    INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    embedding     TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_session_created
    ON messages (session_id, created_at);

CREATE TABLE IF NOT EXISTS agents (
    id                   TEXT PRIMARY KEY,
    display_name         TEXT NOT NULL,
    model                TEXT NOT NULL,
    system_prompt        TEXT NOT NULL DEFAULT '',
    focus                TEXT NOT NULL DEFAULT '',
    status               TEXT NOT NULL DEFAULT 'idle',
    pheromone            REAL NOT NULL DEFAULT 0.5,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_active          TEXT,
    current_session      TEXT,
    current_task         TEXT
);

CREATE TABLE IF NOT EXISTS cron_jobs (
    id                TEXT PRIMARY KEY,
    schedule          TEXT NOT NULL,
    agent_id          TEXT NOT NULL,
    enabled           INTEGER NOT NULL DEFAULT 1,
    payload_type      TEXT NOT NULL DEFAULT 'prompt',
    payload           TEXT NOT NULL,
    session_mode      TEXT NOT NULL DEFAULT 'isolated',
    max_duration_secs INTEGER NOT NULL DEFAULT 300,
    retry_count       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS job_executions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    status      TEXT NOT NULL,
    result      TEXT,
    error       TEXT,
    duration_ms INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_job_executions_job
    ON job_executions (job_id, started_at DESC);
"#;

/// All durable state behind one handle.
///
/// The pool is bounded and health-checked before acquire, so transient
/// connection faults are retried at this layer rather than surfacing to
/// callers.
pub struct Store {
    pub(crate) pool: SqlitePool,
    /// Sliding window of recent session creations for the per-minute cap.
    pub(crate) recent_creations: Mutex<VecDeque<Instant>>,
    pub(crate) session_rate_limit: u32,
}

impl Store {
    /// Open (and create if missing) the database at `url`, apply the schema,
    /// and return a ready store.
    pub async fn open(url: &str, session_rate_limit: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // A `:memory:` database exists per connection, so the pool must stay
        // at a single connection for it to behave like one database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&pool).await?;
            }
        }
        info!(url, "database ready");

        Ok(Self {
            pool,
            recent_creations: Mutex::new(VecDeque::new()),
            session_rate_limit,
        })
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:", 10).await
    }

    /// Quick connectivity probe for the health endpoint.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
