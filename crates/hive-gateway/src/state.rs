// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Instant;

use hive_config::HiveConfig;
use hive_core::ChatEngine;
use hive_pool::AgentPool;
use hive_scheduler::Scheduler;
use hive_store::Store;

/// Shared handles injected into every route and socket handler.
///
/// Built once by the composition root; there are no process-wide globals.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub engine: Arc<ChatEngine>,
    pub scheduler: Arc<Scheduler>,
    pub pool: Arc<AgentPool>,
    pub config: Arc<HiveConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<ChatEngine>,
        scheduler: Arc<Scheduler>,
        pool: Arc<AgentPool>,
        config: Arc<HiveConfig>,
    ) -> Self {
        Self { store, engine, scheduler, pool, config, started_at: Instant::now() }
    }
}
