// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent pool: a bounded concurrency manager over the agent population.
//!
//! The pool is the exclusive owner of agent runtime status and pheromone
//! score.  Work runs under structured groups with caller-selected failure
//! propagation: `spawn` is fail-fast (one bad config cancels pending
//! siblings), `run_parallel` is collect-all (every task reports its own
//! outcome, in input order).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

use hive_config::PoolConfig;
use hive_core::{ChatEngine, SendOptions};
use hive_store::{AgentStatus, Store};

/// Startup description of one agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub id: String,
    pub display_name: String,
    /// Model alias; must resolve against the catalogue.
    pub model: String,
    pub system_prompt: String,
    pub focus: String,
}

/// One unit of work for `run_parallel`.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub agent_id: String,
    pub prompt: String,
    /// Target session; the agent's newest active session when absent.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Timeout,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Per-task result from `run_parallel`, reported independently of siblings.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub agent_id: String,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub tokens: i64,
}

pub struct AgentPool {
    store: Arc<Store>,
    engine: Arc<ChatEngine>,
    config: PoolConfig,
    /// Caps concurrently executing agent tasks.
    semaphore: Arc<Semaphore>,
    /// Gates new work once shutdown begins.
    shutting_down: AtomicBool,
    /// Abort handles of in-flight tasks, for shutdown cancellation.
    active: Mutex<HashMap<u64, AbortHandle>>,
    next_task_id: std::sync::atomic::AtomicU64,
}

impl AgentPool {
    pub fn new(store: Arc<Store>, engine: Arc<ChatEngine>, config: PoolConfig) -> Self {
        let max = config.max_concurrent.max(1);
        Self {
            store,
            engine,
            config,
            semaphore: Arc::new(Semaphore::new(max)),
            shutting_down: AtomicBool::new(false),
            active: Mutex::new(HashMap::new()),
            next_task_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    // ── Spawn ─────────────────────────────────────────────────────────────────

    /// Register agents in parallel under a fail-fast group.
    ///
    /// Returns a per-agent status map: `"running"`, `"error: …"`, or
    /// `"cancelled"` for siblings aborted after the first failure.
    pub async fn spawn(self: &Arc<Self>, specs: Vec<AgentSpec>) -> HashMap<String, String> {
        let mut group = JoinSet::new();
        for spec in specs.clone() {
            let pool = Arc::clone(self);
            group.spawn(async move {
                let result = pool.spawn_one(&spec).await;
                (spec.id, result)
            });
        }

        let mut report: HashMap<String, String> = HashMap::new();
        let mut failed = false;
        while let Some(joined) = group.join_next().await {
            match joined {
                Ok((id, Ok(()))) => {
                    report.insert(id, "running".into());
                }
                Ok((id, Err(e))) => {
                    warn!(agent = %id, error = %e, "agent spawn failed; cancelling siblings");
                    report.insert(id, format!("error: {e}"));
                    failed = true;
                    group.abort_all();
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => warn!(error = %join_err, "spawn task panicked"),
            }
        }
        if failed {
            for spec in &specs {
                report.entry(spec.id.clone()).or_insert_with(|| "cancelled".into());
            }
        }
        metrics::gauge!("hive_agents_registered").set(report.len() as f64);
        report
    }

    async fn spawn_one(&self, spec: &AgentSpec) -> anyhow::Result<()> {
        if hive_model::resolve(&spec.model).is_none() {
            anyhow::bail!("unknown model alias '{}'", spec.model);
        }
        self.store
            .upsert_agent(
                &spec.id,
                &spec.display_name,
                &spec.model,
                &spec.system_prompt,
                &spec.focus,
            )
            .await?;
        self.store
            .update_agent_runtime(&spec.id, AgentStatus::Idle, None, None)
            .await?;
        info!(agent = %spec.id, model = %spec.model, "agent spawned");
        Ok(())
    }

    // ── Parallel execution ────────────────────────────────────────────────────

    /// Run tasks concurrently with a per-task deadline.  One task's failure
    /// never cancels siblings; outcomes come back in input order.
    pub async fn run_parallel(
        self: &Arc<Self>,
        tasks: Vec<AgentTask>,
        timeout: Duration,
    ) -> Vec<TaskOutcome> {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let pool = Arc::clone(self);
            let agent_id = task.agent_id.clone();
            let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
            let handle = tokio::spawn(async move {
                let outcome = pool.run_one(task, timeout).await;
                pool.active.lock().await.remove(&task_id);
                outcome
            });
            self.active.lock().await.insert(task_id, handle.abort_handle());
            handles.push((agent_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (agent_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                // Aborted (shutdown) or panicked: report, don't propagate.
                Err(e) => TaskOutcome {
                    agent_id,
                    status: TaskStatus::Error,
                    output: None,
                    error: Some(if e.is_cancelled() {
                        "cancelled".into()
                    } else {
                        format!("task panicked: {e}")
                    }),
                    latency_ms: 0,
                    tokens: 0,
                },
            };
            metrics::counter!("hive_agent_tasks_total", "status" => outcome.status.as_str())
                .increment(1);
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_one(&self, task: AgentTask, timeout: Duration) -> TaskOutcome {
        let start = Instant::now();
        let fail = |status: TaskStatus, error: String, start: Instant| TaskOutcome {
            agent_id: task.agent_id.clone(),
            status,
            output: None,
            error: Some(error),
            latency_ms: start.elapsed().as_millis() as u64,
            tokens: 0,
        };

        if self.is_shutting_down() {
            return fail(TaskStatus::Error, "pool is shutting down".into(), start);
        }
        let _permit = match self.semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => return fail(TaskStatus::Error, "pool closed".into(), start),
        };

        let session_id = match &task.session_id {
            Some(id) => id.clone(),
            None => match self.store.get_or_create_session(&task.agent_id).await {
                Ok(s) => s.id,
                Err(e) => return fail(TaskStatus::Error, e.to_string(), start),
            },
        };

        let _ = self
            .store
            .update_agent_runtime(
                &task.agent_id,
                AgentStatus::Busy,
                Some(&session_id),
                Some(&task.prompt),
            )
            .await;

        let result = tokio::time::timeout(
            timeout,
            self.engine.send_message(&session_id, &task.prompt, SendOptions::default()),
        )
        .await;

        let outcome = match result {
            Ok(Ok(resp)) => {
                self.record_outcome(&task.agent_id, true).await;
                let _ = self
                    .store
                    .update_agent_runtime(&task.agent_id, AgentStatus::Idle, None, None)
                    .await;
                TaskOutcome {
                    agent_id: task.agent_id.clone(),
                    status: TaskStatus::Success,
                    output: Some(resp.content),
                    error: None,
                    latency_ms: start.elapsed().as_millis() as u64,
                    tokens: resp.input_tokens + resp.output_tokens,
                }
            }
            Ok(Err(e)) => {
                self.record_outcome(&task.agent_id, false).await;
                let _ = self
                    .store
                    .update_agent_runtime(&task.agent_id, AgentStatus::Error, None, None)
                    .await;
                fail(TaskStatus::Error, e.to_string(), start)
            }
            Err(_) => {
                self.record_outcome(&task.agent_id, false).await;
                let _ = self
                    .store
                    .update_agent_runtime(&task.agent_id, AgentStatus::Idle, None, None)
                    .await;
                fail(
                    TaskStatus::Timeout,
                    format!("task exceeded {}s", timeout.as_secs()),
                    start,
                )
            }
        };
        debug!(agent = %outcome.agent_id, status = outcome.status.as_str(), "agent task finished");
        outcome
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Pick the highest-pheromone agent that can take work (idle or busy).
    /// Falls back to the configured coordinator when nothing qualifies.
    pub async fn route_to_best(&self, description: &str) -> String {
        let candidates = match self.store.list_agents().await {
            Ok(agents) => agents,
            Err(_) => Vec::new(),
        };
        let best = candidates
            .into_iter()
            .filter(|a| matches!(a.status, AgentStatus::Idle | AgentStatus::Busy))
            .max_by(|a, b| {
                a.pheromone.partial_cmp(&b.pheromone).unwrap_or(std::cmp::Ordering::Equal)
            });
        match best {
            Some(agent) => {
                debug!(agent = %agent.id, score = agent.pheromone, task = description, "routed");
                agent.id
            }
            None => self.config.coordinator.clone(),
        }
    }

    // ── Pheromone scoring ─────────────────────────────────────────────────────

    async fn record_outcome(&self, agent_id: &str, success: bool) {
        let Ok(agent) = self.store.get_agent(agent_id).await else {
            return;
        };
        let (score, failures) = if success {
            (agent.pheromone + self.config.pheromone_gain, 0)
        } else {
            (agent.pheromone - self.config.pheromone_gain, agent.consecutive_failures + 1)
        };
        let _ = self.store.update_agent_score(agent_id, score, failures).await;
        metrics::gauge!("hive_agent_pheromone", "agent" => agent_id.to_string())
            .set(score.clamp(0.0, 1.0));
    }

    /// Decay every score toward the 0.5 neutral point.  Driven periodically
    /// by the composition root.
    pub async fn decay_sweep(&self) {
        let Ok(agents) = self.store.list_agents().await else {
            return;
        };
        for agent in agents {
            let decayed = agent.pheromone + (0.5 - agent.pheromone) * self.config.pheromone_decay;
            let _ = self
                .store
                .update_agent_score(&agent.id, decayed, agent.consecutive_failures)
                .await;
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Stop accepting work, cancel in-flight tasks, and wait (bounded) for
    /// them to unwind.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::Relaxed);
        let handles: Vec<AbortHandle> = {
            let mut active = self.active.lock().await;
            active.drain().map(|(_, h)| h).collect()
        };
        let n = handles.len().max(1) as u32;
        let per_task = timeout / n;
        for handle in handles {
            handle.abort();
        }
        // Bounded wait for tasks to observe their abort.
        let deadline = Instant::now() + per_task * n;
        while Instant::now() < deadline {
            if self.active.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("agent pool shut down");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
