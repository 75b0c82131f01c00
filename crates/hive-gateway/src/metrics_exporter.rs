// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prometheus exposition on a dedicated port, plus process-level gauges.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the global recorder and start the exposition listener.
///
/// Must be called once, before any metrics are recorded, from the
/// composition root.
pub fn install(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing prometheus exporter")?;
    describe();
    tokio::spawn(sample_process_gauges());
    info!(%addr, "metrics exposition listening");
    Ok(())
}

fn describe() {
    metrics::describe_counter!("hive_http_requests_total", "HTTP requests by route template");
    metrics::describe_histogram!(
        "hive_http_request_duration_seconds",
        "HTTP request latency by route template"
    );
    metrics::describe_counter!("hive_llm_requests_total", "Model calls by alias and outcome");
    metrics::describe_histogram!("hive_llm_request_duration_seconds", "Model call latency");
    metrics::describe_counter!("hive_llm_tokens_total", "Prompt/completion tokens by alias");
    metrics::describe_histogram!("hive_llm_cost_dollars", "Provider-reported cost per call");
    metrics::describe_gauge!(
        "hive_llm_breaker_state",
        "Circuit breaker state per alias (0 closed, 1 open, 2 half-open)"
    );
    metrics::describe_counter!("hive_sessions_created_total", "Sessions created");
    metrics::describe_counter!("hive_messages_total", "Messages persisted by role");
    metrics::describe_counter!("hive_tool_executions_total", "Tool executions by outcome");
    metrics::describe_histogram!("hive_tool_duration_seconds", "Tool execution latency");
    metrics::describe_gauge!("hive_scheduler_jobs", "Registered cron jobs");
    metrics::describe_counter!("hive_job_executions_total", "Job runs by status");
    metrics::describe_counter!("hive_job_overlaps_total", "Dropped overlapping job fires");
    metrics::describe_counter!("hive_agent_tasks_total", "Agent pool tasks by status");
    metrics::describe_gauge!("hive_agent_pheromone", "Pheromone score per agent");
    metrics::describe_counter!("hive_errors_total", "Errors by kind");
    metrics::describe_counter!("hive_ws_connections_total", "WebSocket connections accepted");
    metrics::describe_gauge!("hive_resident_memory_bytes", "Resident set size");
}

/// Periodically sample the resident set size from /proc.
async fn sample_process_gauges() {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        if let Some(rss) = resident_memory_bytes() {
            metrics::gauge!("hive_resident_memory_bytes").set(rss as f64);
        }
    }
}

#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    #[cfg(target_os = "linux")]
    #[test]
    fn resident_memory_is_readable_on_linux() {
        let rss = super::resident_memory_bytes().expect("statm must parse");
        assert!(rss > 0);
    }
}
