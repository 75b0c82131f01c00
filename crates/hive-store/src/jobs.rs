// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{db::Store, StoreError};

/// How a job's runs map onto sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionMode {
    /// A fresh session per run, never reused.
    Isolated,
    /// One session shared by all runs of this (agent, job) pair.
    Shared,
    /// The agent's persistent cron session, shared across jobs.
    Persistent,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Shared => "shared",
            Self::Persistent => "persistent",
        }
    }
}

/// A scheduled unit of work.  The job table is the scheduler's source of
/// truth; rows are (re)loaded on start and on explicit reload.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CronJob {
    /// Human key, e.g. "healthcheck".
    pub id: String,
    /// `Nm`/`Nh` interval shorthand or a 6-field cron expression.
    pub schedule: String,
    pub agent_id: String,
    pub enabled: bool,
    /// Currently only "prompt".
    pub payload_type: String,
    pub payload: String,
    pub session_mode: SessionMode,
    pub max_duration_secs: i64,
    pub retry_count: i64,
}

/// Append-only execution history entry.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobExecution {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// success | error | timeout
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Editable job fields for the cron REST surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub schedule: Option<String>,
    pub agent_id: Option<String>,
    pub payload: Option<String>,
    pub session_mode: Option<SessionMode>,
    pub max_duration_secs: Option<i64>,
    pub retry_count: Option<i64>,
}

// ── YAML migration file format ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JobsFile {
    jobs: Vec<YamlJob>,
}

fn default_enabled() -> bool {
    true
}

fn default_session_mode() -> SessionMode {
    SessionMode::Isolated
}

fn default_max_duration() -> i64 {
    300
}

#[derive(Debug, Deserialize)]
struct YamlJob {
    id: String,
    schedule: String,
    agent: String,
    payload: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_session_mode")]
    session_mode: SessionMode,
    #[serde(default = "default_max_duration")]
    max_duration_secs: i64,
    #[serde(default)]
    retry_count: i64,
}

impl Store {
    pub async fn list_jobs(&self, enabled_only: bool) -> Result<Vec<CronJob>, StoreError> {
        let rows = sqlx::query_as::<_, CronJob>(
            "SELECT * FROM cron_jobs WHERE (?1 = 0 OR enabled = 1) ORDER BY id",
        )
        .bind(enabled_only as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_job(&self, id: &str) -> Result<CronJob, StoreError> {
        sqlx::query_as::<_, CronJob>("SELECT * FROM cron_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("cron job {id}")))
    }

    /// Insert or replace a job row.  Idempotent: upserting identical data
    /// twice leaves the row byte-identical.
    pub async fn upsert_job(&self, job: &CronJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cron_jobs (id, schedule, agent_id, enabled, payload_type, \
             payload, session_mode, max_duration_secs, retry_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.schedule)
        .bind(&job.agent_id)
        .bind(job.enabled)
        .bind(&job.payload_type)
        .bind(&job.payload)
        .bind(job.session_mode)
        .bind(job.max_duration_secs)
        .bind(job.retry_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_job_enabled(&self, id: &str, enabled: bool) -> Result<CronJob, StoreError> {
        let _ = self.get_job(id).await?;
        sqlx::query("UPDATE cron_jobs SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_job(id).await
    }

    pub async fn patch_job(&self, id: &str, patch: JobPatch) -> Result<CronJob, StoreError> {
        let _ = self.get_job(id).await?;
        let mut qb = sqlx::QueryBuilder::new("UPDATE cron_jobs SET id = id");
        if let Some(v) = patch.schedule {
            qb.push(", schedule = ").push_bind(v);
        }
        if let Some(v) = patch.agent_id {
            qb.push(", agent_id = ").push_bind(v);
        }
        if let Some(v) = patch.payload {
            qb.push(", payload = ").push_bind(v);
        }
        if let Some(v) = patch.session_mode {
            qb.push(", session_mode = ").push_bind(v);
        }
        if let Some(v) = patch.max_duration_secs {
            qb.push(", max_duration_secs = ").push_bind(v);
        }
        if let Some(v) = patch.retry_count {
            qb.push(", retry_count = ").push_bind(v);
        }
        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await?;
        self.get_job(id).await
    }

    /// Record one run.  History rows belong to the scheduler alone.
    pub async fn record_execution(&self, exec: NewExecution) -> Result<(), StoreError> {
        let duration_ms = (exec.finished_at - exec.started_at).num_milliseconds().max(0);
        sqlx::query(
            "INSERT INTO job_executions (job_id, started_at, finished_at, status, result, \
             error, duration_ms) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&exec.job_id)
        .bind(exec.started_at)
        .bind(exec.finished_at)
        .bind(&exec.status)
        .bind(&exec.result)
        .bind(&exec.error)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        metrics::counter!("hive_job_executions_total", "status" => exec.status.clone())
            .increment(1);
        Ok(())
    }

    /// Execution history for a job, newest first.  `page` is 1-based.
    pub async fn job_history(
        &self,
        job_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<JobExecution>, StoreError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let rows = sqlx::query_as::<_, JobExecution>(
            "SELECT * FROM job_executions WHERE job_id = ? \
             ORDER BY started_at DESC LIMIT ? OFFSET ?",
        )
        .bind(job_id)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_enabled_jobs(&self) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cron_jobs WHERE enabled = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Upsert every job from a YAML definition file.  Running the migration
    /// twice yields identical rows.
    pub async fn migrate_jobs_yaml(&self, yaml: &str) -> Result<usize, StoreError> {
        let file: JobsFile = serde_yaml::from_str(yaml)
            .map_err(|e| StoreError::Invalid(format!("jobs file: {e}")))?;
        let count = file.jobs.len();
        for j in file.jobs {
            self.upsert_job(&CronJob {
                id: j.id,
                schedule: j.schedule,
                agent_id: j.agent,
                enabled: j.enabled,
                payload_type: "prompt".into(),
                payload: j.payload,
                session_mode: j.session_mode,
                max_duration_secs: j.max_duration_secs,
                retry_count: j.retry_count,
            })
            .await?;
        }
        info!(count, "job migration applied");
        Ok(count)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
