// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// Every section has defaults so an empty (or absent) config file produces a
/// working instance.  Fields map 1:1 onto `hive.yaml`:
///
/// ```yaml
/// server:
///   bind: 127.0.0.1:8600
///   metrics_bind: 127.0.0.1:9600
/// models:
///   default: qwen-local
///   fallbacks: [claude-fast]
///   providers:
///     openai_compat:
///       base_url: http://localhost:8080/v1
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP + WebSocket bind address.
    pub bind: String,
    /// Prometheus exposition bind address (dedicated port).
    pub metrics_bind: String,
    /// Keepalive beacon interval on chat WebSockets, in seconds.
    pub ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8600".into(),
            metrics_bind: "127.0.0.1:9600".into(),
            ping_interval_secs: 30,
        }
    }
}

/// Per-provider connection settings, keyed by provider family id in
/// [`ModelsConfig::providers`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL override.  Hosted providers have sane defaults; local
    /// OpenAI-compatible servers (llama.cpp, vLLM, Ollama) must set this.
    pub base_url: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Free-form provider-specific body fields forwarded as-is to the driver.
    #[serde(default)]
    pub driver_options: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Default model alias used when neither the session nor the agent sets one.
    pub default: String,
    /// Ordered fallback aliases consulted on hard provider errors.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: "qwen-local".into(),
            fallbacks: Vec::new(),
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messages of history included when a session does not override it.
    pub context_window: i64,
    /// Hard cap on model → tool → model iterations per user turn.
    pub max_tool_rounds: u32,
    /// Session creations allowed per minute, process-wide.
    pub session_rate_limit: u32,
    /// Default sampling temperature for new sessions.
    pub temperature: f64,
    /// Default max output tokens for new sessions.
    pub max_output_tokens: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_window: 50,
            max_tool_rounds: 10,
            session_rate_limit: 10,
            temperature: 0.7,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-execution timeout in seconds.
    pub exec_timeout_secs: u64,
    /// Concurrent blocking-handler executions.
    pub worker_pool_size: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 300,
            worker_pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrently executing agent tasks.
    pub max_concurrent: usize,
    /// Agent that receives work when routing finds no available candidate.
    pub coordinator: String,
    /// Pheromone delta applied on task success (subtracted on failure).
    pub pheromone_gain: f64,
    /// Fraction of the distance to 0.5 removed per decay sweep.
    pub pheromone_decay: f64,
    /// Seconds between decay sweeps.
    pub decay_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            coordinator: "main".into(),
            pheromone_gain: 0.1,
            pheromone_decay: 0.05,
            decay_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Trigger evaluation resolution in seconds.  Cron schedules carry a
    /// seconds field, so this must stay at 1 for them to fire accurately.
    pub tick_secs: u64,
    /// Default per-run wall-clock budget when a job does not set one.
    pub default_max_duration_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 1,
            default_max_duration_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite database URL.
    pub database_url: String,
    /// Identity file (read-only; highest-priority prompt section).
    pub identity_file: PathBuf,
    /// Soul file (read-only).
    pub soul_file: PathBuf,
    /// Directory scanned for skill manifests at startup.
    pub skills_dir: PathBuf,
    /// Writable directory for transcript exports.
    pub export_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:hive.db".into(),
            identity_file: PathBuf::from("identity.md"),
            soul_file: PathBuf::from("soul.md"),
            skills_dir: PathBuf::from("skills"),
            export_dir: PathBuf::from("exports"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
