// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable job executor.
//!
//! The cron_jobs table is the source of truth: `reload` re-reads it and
//! rebuilds the trigger table.  Fires run through the chat engine with a
//! per-job overlap lock (concurrent fires of one job are dropped, not
//! queued) and a wall-clock budget enforced by cancellation.  History rows
//! belong to the scheduler alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hive_config::SchedulerConfig;
use hive_core::{ChatEngine, SendOptions};
use hive_store::{CronJob, NewExecution, NewSession, SessionMode, SessionType, Store};

use crate::trigger::{parse_schedule, ScheduleError, Trigger};

/// Retry backoff cap.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

struct Registered {
    job: CronJob,
    trigger: Trigger,
    next_at: DateTime<Utc>,
}

pub struct Scheduler {
    store: Arc<Store>,
    engine: Arc<ChatEngine>,
    config: SchedulerConfig,
    triggers: Mutex<HashMap<String, Registered>>,
    /// Per-job execution locks; `try_lock` failure means an overlapping fire.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, engine: Arc<ChatEngine>, config: SchedulerConfig) -> Self {
        Self {
            store,
            engine,
            config,
            triggers: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Rebuild the trigger table from enabled job rows.  Jobs with bad
    /// schedules or unknown agents are skipped with a warning; they stay in
    /// the table for the operator to fix.
    pub async fn reload(&self) -> anyhow::Result<usize> {
        let jobs = self.store.list_jobs(true).await?;
        let now = Utc::now();
        let mut table = HashMap::new();

        for job in jobs {
            match self.validate(&job) {
                Ok(trigger) => {
                    let Some(next_at) = trigger.next_after(now) else {
                        warn!(job = %job.id, "schedule never fires; skipping");
                        continue;
                    };
                    debug!(job = %job.id, schedule = %job.schedule, %next_at, "job registered");
                    table.insert(job.id.clone(), Registered { job, trigger, next_at });
                }
                Err(e) => {
                    warn!(job = %job.id, error = %e, "skipping invalid job");
                    metrics::counter!("hive_errors_total", "kind" => "schedule_fault")
                        .increment(1);
                }
            }
        }

        let count = table.len();
        *self.triggers.lock().await = table;
        metrics::gauge!("hive_scheduler_jobs").set(count as f64);
        info!(count, "scheduler reloaded");
        Ok(count)
    }

    fn validate(&self, job: &CronJob) -> Result<Trigger, ScheduleError> {
        if job.payload_type != "prompt" {
            return Err(ScheduleError::BadPayload(job.payload_type.clone()));
        }
        parse_schedule(&job.schedule)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub async fn job_count(&self) -> usize {
        self.triggers.lock().await.len()
    }

    /// Drive the trigger table until shutdown.  Intended to be spawned by
    /// the composition root.
    pub async fn run(self: Arc<Self>) {
        let tick = Duration::from_secs(self.config.tick_secs.max(1));
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if self.shutting_down.load(Ordering::Relaxed) {
                info!("scheduler stopped");
                return;
            }
            self.fire_due(Utc::now()).await;
        }
    }

    /// Launch every due job.  Fires run as independent tasks: one job's
    /// failure or overrun never affects its siblings in the same epoch.
    pub async fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let mut due = Vec::new();
        {
            let mut table = self.triggers.lock().await;
            for reg in table.values_mut() {
                if reg.next_at <= now {
                    due.push(reg.job.clone());
                    match reg.trigger.next_after(now) {
                        Some(next) => reg.next_at = next,
                        None => reg.next_at = now + chrono::Duration::days(3650),
                    }
                }
            }
        }

        let fired = due.len();
        for job in due {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.execute_job(job).await;
            });
        }
        fired
    }

    /// One run of one job: overlap gate, session resolution, dispatch with
    /// wall-clock budget, retries with exponential backoff, one history row.
    pub async fn execute_job(&self, job: CronJob) {
        if self.shutting_down.load(Ordering::Relaxed) {
            return;
        }

        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(job.id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let Ok(_guard) = lock.try_lock() else {
            // At most one concurrent execution per job id; overlapping fires
            // are dropped and recorded.
            warn!(job = %job.id, "overlapping fire dropped");
            metrics::counter!("hive_job_overlaps_total", "job" => job.id.clone()).increment(1);
            let now = Utc::now();
            let _ = self
                .store
                .record_execution(NewExecution {
                    job_id: job.id.clone(),
                    started_at: now,
                    finished_at: now,
                    status: "error".into(),
                    result: None,
                    error: Some("dropped: previous execution still running".into()),
                })
                .await;
            return;
        };

        let started_at = Utc::now();
        let budget = Duration::from_secs(job.max_duration_secs.max(1) as u64);

        let session_id = match self.resolve_session(&job).await {
            Ok(id) => id,
            Err(e) => {
                let _ = self
                    .store
                    .record_execution(NewExecution {
                        job_id: job.id.clone(),
                        started_at,
                        finished_at: Utc::now(),
                        status: "error".into(),
                        result: None,
                        error: Some(format!("session resolution failed: {e}")),
                    })
                    .await;
                return;
            }
        };

        // Dispatch with retry on error.  A timeout ends the run: its budget
        // is already spent.
        let mut attempt: i64 = 0;
        let (status, result, error) = loop {
            let run = tokio::time::timeout(
                budget,
                self.engine.send_message(&session_id, &job.payload, SendOptions::default()),
            )
            .await;

            match run {
                Ok(Ok(resp)) => break ("success", Some(resp.content), None),
                Err(_) => {
                    break (
                        "timeout",
                        None,
                        Some(format!("exceeded {}s budget", budget.as_secs())),
                    )
                }
                Ok(Err(e)) => {
                    if attempt >= job.retry_count {
                        break ("error", None, Some(e.to_string()));
                    }
                    let backoff =
                        Duration::from_secs(1u64 << attempt.clamp(0, 6) as u32).min(MAX_BACKOFF);
                    warn!(job = %job.id, attempt, error = %e, backoff_s = backoff.as_secs(), "job failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        };

        let finished_at = Utc::now();
        debug!(job = %job.id, status, "job run finished");
        let _ = self
            .store
            .record_execution(NewExecution {
                job_id: job.id.clone(),
                started_at,
                finished_at,
                status: status.into(),
                result,
                error,
            })
            .await;
    }

    /// Map `session_mode` onto a session id.
    ///
    /// - isolated: a fresh cron session per run.
    /// - shared: one session per (agent, job) pair, tagged in metadata.
    /// - persistent: the agent's single persistent cron session.
    async fn resolve_session(&self, job: &CronJob) -> anyhow::Result<String> {
        let marker = match job.session_mode {
            SessionMode::Isolated => {
                let mut new = NewSession::for_agent(&job.agent_id).with_type(SessionType::Cron);
                new.metadata = serde_json::json!({ "job_id": job.id });
                let session = self.store.create_session(new).await?;
                return Ok(session.id);
            }
            SessionMode::Shared => serde_json::json!({ "job_id": job.id, "shared": true }),
            SessionMode::Persistent => serde_json::json!({ "cron_persistent": true }),
        };

        // Reuse the matching active cron session when one exists.
        let sessions = self.store.list_sessions(Some(&job.agent_id), None, 1, 100).await?;
        for s in sessions {
            if s.session_type == SessionType::Cron
                && s.status == hive_store::SessionStatus::Active
                && s.metadata.0 == marker
            {
                return Ok(s.id);
            }
        }
        let mut new = NewSession::for_agent(&job.agent_id).with_type(SessionType::Cron);
        new.metadata = marker;
        let session = self.store.create_session(new).await?;
        Ok(session.id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use hive_core::PromptAssembler;
    use hive_model::{FlakyMockProvider, LlmGateway, ModelProvider, ScriptedMockProvider};
    use hive_store::SessionStatus;
    use hive_tools::ToolRegistry;

    use super::*;

    async fn scheduler_with(provider: Arc<dyn ModelProvider>) -> Arc<Scheduler> {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let mut providers: StdHashMap<String, Arc<dyn ModelProvider>> = StdHashMap::new();
        providers.insert("mock".into(), provider);
        let gateway = Arc::new(LlmGateway::new(providers, Vec::new()));
        let tools = Arc::new(ToolRegistry::new(Duration::from_secs(5), 2));
        let assembler = Arc::new(PromptAssembler::new("/no/identity.md", "/no/soul.md"));
        let engine = Arc::new(ChatEngine::new(
            store.clone(),
            gateway,
            tools,
            assembler,
            hive_config::ChatConfig::default(),
            "mock".into(),
        ));
        Arc::new(Scheduler::new(store, engine, SchedulerConfig::default()))
    }

    fn job(id: &str, mode: SessionMode) -> CronJob {
        CronJob {
            id: id.into(),
            schedule: "0 0 0 * * *".into(),
            agent_id: "main".into(),
            enabled: true,
            payload_type: "prompt".into(),
            payload: "Run the health check".into(),
            session_mode: mode,
            max_duration_secs: 30,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn reload_registers_enabled_jobs_only() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        scheduler.store.upsert_job(&job("a", SessionMode::Isolated)).await.unwrap();
        let mut disabled = job("b", SessionMode::Isolated);
        disabled.enabled = false;
        scheduler.store.upsert_job(&disabled).await.unwrap();

        assert_eq!(scheduler.reload().await.unwrap(), 1);
        assert_eq!(scheduler.job_count().await, 1);
    }

    #[tokio::test]
    async fn reload_skips_malformed_schedules() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        let mut bad = job("bad", SessionMode::Isolated);
        bad.schedule = "whenever".into();
        scheduler.store.upsert_job(&bad).await.unwrap();
        scheduler.store.upsert_job(&job("good", SessionMode::Isolated)).await.unwrap();
        assert_eq!(scheduler.reload().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn isolated_run_creates_cron_session_and_history() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::always_text("all good")))
            .await;
        let j = job("healthcheck", SessionMode::Isolated);
        scheduler.execute_job(j.clone()).await;

        let sessions = scheduler.store.list_sessions(Some("main"), None, 1, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_type, SessionType::Cron);
        assert_eq!(sessions[0].status, SessionStatus::Active);

        let messages = scheduler.store.session_messages(&sessions[0].id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Run the health check");
        assert_eq!(messages[1].role, "assistant");

        let history = scheduler.store.job_history("healthcheck", 1, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "success");
        assert!(history[0].finished_at >= history[0].started_at);
    }

    #[tokio::test]
    async fn isolated_runs_never_share_sessions() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        let j = job("healthcheck", SessionMode::Isolated);
        scheduler.execute_job(j.clone()).await;
        scheduler.execute_job(j).await;
        let sessions = scheduler.store.list_sessions(Some("main"), None, 1, 10).await.unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn shared_mode_reuses_one_session_per_job() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        let j = job("digest", SessionMode::Shared);
        scheduler.execute_job(j.clone()).await;
        scheduler.execute_job(j).await;
        let sessions = scheduler.store.list_sessions(Some("main"), None, 1, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(scheduler.store.count_messages(&sessions[0].id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn persistent_mode_is_shared_across_jobs() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        scheduler.execute_job(job("one", SessionMode::Persistent)).await;
        scheduler.execute_job(job("two", SessionMode::Persistent)).await;
        let sessions = scheduler.store.list_sessions(Some("main"), None, 1, 10).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_fire_is_dropped_and_recorded() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        let j = job("busy", SessionMode::Isolated);

        // Hold the job lock to simulate a run in progress.
        let lock = {
            let mut locks = scheduler.locks.lock().await;
            locks.entry("busy".into()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().await;

        scheduler.execute_job(j).await;
        let history = scheduler.store.job_history("busy", 1, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "error");
        assert!(history[0].error.as_deref().unwrap().contains("dropped"));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        // First attempt fails, the retry succeeds.
        let scheduler = scheduler_with(Arc::new(FlakyMockProvider::new(1, "recovered"))).await;
        let mut j = job("flaky", SessionMode::Isolated);
        j.retry_count = 1;
        scheduler.execute_job(j).await;
        let history = scheduler.store.job_history("flaky", 1, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "success");
        assert_eq!(history[0].result.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn exhausted_retries_record_error() {
        let scheduler = scheduler_with(Arc::new(FlakyMockProvider::new(100, "never"))).await;
        let mut j = job("doomed", SessionMode::Isolated);
        j.retry_count = 1;
        scheduler.execute_job(j).await;
        let history = scheduler.store.job_history("doomed", 1, 10).await.unwrap();
        assert_eq!(history[0].status, "error");
        assert!(history[0].error.is_some());
    }

    #[tokio::test]
    async fn fire_due_advances_next_fire_time() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        let mut j = job("tick", SessionMode::Isolated);
        j.schedule = "5m".into();
        scheduler.store.upsert_job(&j).await.unwrap();
        scheduler.reload().await.unwrap();

        // Not due yet: registered 5 minutes out.
        assert_eq!(scheduler.fire_due(Utc::now()).await, 0);
        // Due once we look past the period; next_at then advances again.
        let later = Utc::now() + chrono::Duration::seconds(301);
        assert_eq!(scheduler.fire_due(later).await, 1);
        assert_eq!(scheduler.fire_due(later).await, 0);
    }

    #[tokio::test]
    async fn shutdown_skips_fires() {
        let scheduler = scheduler_with(Arc::new(ScriptedMockProvider::echo())).await;
        scheduler.begin_shutdown();
        scheduler.execute_job(job("late", SessionMode::Isolated)).await;
        assert!(scheduler.store.job_history("late", 1, 10).await.unwrap().is_empty());
    }
}
