// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, ExportFormat};
use hive_config::HiveConfig;
use hive_core::{ChatEngine, PromptAssembler};
use hive_gateway::AppState;
use hive_pool::AgentPool;
use hive_scheduler::Scheduler;
use hive_store::Store;
use hive_tools::{builtin::builtin_handlers, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(hive_config::load(cli.config.as_deref())?);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::MigrateJobs { file } => migrate_jobs(&config, &file).await,
        Commands::Export { session_id, format } => export_session(&config, &session_id, format).await,
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(config.as_ref()).unwrap_or_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("HIVE_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// ── Composition root ──────────────────────────────────────────────────────────

/// Construct every component and wire them together.  All handles flow
/// through [`AppState`]; there are no process-wide mutable globals.
async fn build_runtime(config: &Arc<HiveConfig>) -> anyhow::Result<AppState> {
    let store = Arc::new(
        Store::open(&config.paths.database_url, config.chat.session_rate_limit)
            .await
            .context("opening database")?,
    );

    let gateway = Arc::new(hive_model::gateway_from_config(&config.models));

    let mut registry = ToolRegistry::new(
        Duration::from_secs(config.tools.exec_timeout_secs),
        config.tools.worker_pool_size,
    );
    let discovered = registry
        .discover(&config.paths.skills_dir, &builtin_handlers())
        .context("discovering skills")?;
    info!(tools = discovered, "tool registry ready");
    let tools = Arc::new(registry);

    let assembler = Arc::new(PromptAssembler::new(
        config.paths.identity_file.clone(),
        config.paths.soul_file.clone(),
    ));

    let engine = Arc::new(ChatEngine::new(
        store.clone(),
        gateway,
        tools,
        assembler,
        config.chat.clone(),
        config.models.default.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(store.clone(), engine.clone(), config.scheduler.clone()));
    let pool = Arc::new(AgentPool::new(store.clone(), engine.clone(), config.pool.clone()));

    Ok(AppState::new(store, engine, scheduler, pool, config.clone()))
}

async fn serve(config: Arc<HiveConfig>) -> anyhow::Result<()> {
    let metrics_addr = config
        .server
        .metrics_bind
        .parse()
        .context("parsing server.metrics_bind")?;
    hive_gateway::metrics_exporter::install(metrics_addr)?;

    let state = build_runtime(&config).await?;

    // Scheduler: load the job table and start the trigger loop.
    state.scheduler.reload().await?;
    tokio::spawn(state.scheduler.clone().run());

    // Pheromone decay sweep.
    {
        let pool = state.pool.clone();
        let period = Duration::from_secs(config.pool.decay_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                pool.decay_sweep().await;
            }
        });
    }

    let app = hive_gateway::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(bind = %config.server.bind, "hive runtime listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down");
    state.scheduler.begin_shutdown();
    state.pool.shutdown(Duration::from_secs(5)).await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler; running until killed");
        std::future::pending::<()>().await;
    }
}

// ── One-shot subcommands ──────────────────────────────────────────────────────

async fn migrate_jobs(config: &HiveConfig, file: &std::path::Path) -> anyhow::Result<()> {
    let yaml = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let store = Store::open(&config.paths.database_url, config.chat.session_rate_limit).await?;
    let count = store.migrate_jobs_yaml(&yaml).await?;
    println!("{count} job(s) upserted");
    Ok(())
}

async fn export_session(
    config: &HiveConfig,
    session_id: &str,
    format: ExportFormat,
) -> anyhow::Result<()> {
    let store = Store::open(&config.paths.database_url, config.chat.session_rate_limit).await?;
    let session = store.get_session(session_id).await?;
    let messages = store.session_messages(session_id).await?;

    let (body, extension) = match format {
        ExportFormat::Jsonl => (hive_store::export_jsonl(&session, &messages), "jsonl"),
        ExportFormat::Markdown => (hive_store::export_markdown(&session, &messages), "md"),
    };

    std::fs::create_dir_all(&config.paths.export_dir)?;
    let path = config.paths.export_dir.join(format!("session-{session_id}.{extension}"));
    std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}
