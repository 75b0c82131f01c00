// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios across the composed runtime: store, engine, pool,
//! scheduler, and the HTTP surface, all on an in-memory database with a
//! scripted mock model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use hive_config::HiveConfig;
use hive_core::{ChatEngine, PromptAssembler, SendOptions};
use hive_gateway::AppState;
use hive_model::{LlmGateway, ModelProvider, ScriptedMockProvider};
use hive_pool::{AgentPool, AgentSpec, AgentTask, TaskStatus};
use hive_scheduler::Scheduler;
use hive_store::{CronJob, NewSession, SessionMode, SessionStatus, SessionType, Store};
use hive_tools::{builtin::builtin_handlers, ToolDefinition, ToolRegistry};

struct Runtime {
    state: AppState,
}

async fn runtime_with(provider: Arc<dyn ModelProvider>) -> Runtime {
    let config = Arc::new(HiveConfig::default());
    let store = Arc::new(Store::open_in_memory().await.unwrap());

    let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
    providers.insert("mock".into(), provider);
    let gateway = Arc::new(LlmGateway::new(providers, Vec::new()));

    let mut registry = ToolRegistry::new(Duration::from_secs(5), 2);
    for (name, handler) in builtin_handlers() {
        let skill = name.split("__").next().unwrap_or("misc").to_string();
        registry.register(ToolDefinition {
            name: name.clone(),
            description: format!("builtin {name}"),
            parameters: json!({ "type": "object", "properties": {} }),
            skill,
            handler: Some(handler),
        });
    }
    let tools = Arc::new(registry);

    let assembler = Arc::new(PromptAssembler::new("/no/identity.md", "/no/soul.md"));
    let engine = Arc::new(ChatEngine::new(
        store.clone(),
        gateway,
        tools,
        assembler,
        config.chat.clone(),
        "mock".into(),
    ));
    let scheduler = Arc::new(Scheduler::new(store.clone(), engine.clone(), config.scheduler.clone()));
    let pool = Arc::new(AgentPool::new(store.clone(), engine.clone(), config.pool.clone()));

    Runtime { state: AppState::new(store, engine, scheduler, pool, config) }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// E1 — a simple turn over the full HTTP surface.
#[tokio::test]
async fn simple_turn_end_to_end() {
    let rt = runtime_with(Arc::new(ScriptedMockProvider::always_text("Hello back"))).await;
    let app = hive_gateway::router(rt.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sessions")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "agent_id": "main", "model": "mock" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/sessions/{id}/messages"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "content": "Hello" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let chat = body_json(response).await;
    assert_eq!(chat["content"], "Hello back");

    let session = rt.state.store.get_session(&id).await.unwrap();
    assert_eq!(session.message_count, 2);
    assert_eq!(session.title.as_deref(), Some("Hello"));
    assert!(session.updated_at >= session.created_at);
}

/// E2 — the tool loop: assistant tool call, tool result, final answer.
#[tokio::test]
async fn tool_loop_end_to_end() {
    let provider = ScriptedMockProvider::tool_then_text(
        "call-1",
        "echo__say",
        json!({ "text": "Found: X" }).to_string(),
        "Found: X",
    );
    let rt = runtime_with(Arc::new(provider)).await;

    let mut new = NewSession::for_agent("main");
    new.model_override = Some("mock".into());
    let session = rt.state.store.create_session(new).await.unwrap();

    let resp = rt
        .state
        .engine
        .send_message(&session.id, "Search for X", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(resp.content, "Found: X");

    let messages = rt.state.store.session_messages(&session.id).await.unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
    assert_eq!(
        messages[2].tool_call_id.as_deref(),
        Some(messages[1].tool_calls.as_ref().unwrap().0[0].id.as_str()),
    );

    // Invariant 1: counter equals the stored row count.
    let session = rt.state.store.get_session(&session.id).await.unwrap();
    assert_eq!(session.message_count, messages.len() as i64);
}

/// E4 — an isolated cron run creates a fresh cron session and a history row.
#[tokio::test]
async fn cron_isolated_run_end_to_end() {
    let rt = runtime_with(Arc::new(ScriptedMockProvider::always_text("all healthy"))).await;
    let job = CronJob {
        id: "healthcheck".into(),
        schedule: "0 0 0 * * *".into(),
        agent_id: "main".into(),
        enabled: true,
        payload_type: "prompt".into(),
        payload: "Run the health check".into(),
        session_mode: SessionMode::Isolated,
        max_duration_secs: 30,
        retry_count: 0,
    };
    rt.state.store.upsert_job(&job).await.unwrap();
    rt.state.scheduler.reload().await.unwrap();

    rt.state.scheduler.execute_job(job).await;

    let sessions = rt.state.store.list_sessions(Some("main"), None, 1, 10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_type, SessionType::Cron);
    assert_eq!(sessions[0].status, SessionStatus::Active);

    let messages = rt.state.store.session_messages(&sessions[0].id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Run the health check");

    let history = rt.state.store.job_history("healthcheck", 1, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "success");
}

/// E6 — parallel spawn with one failing config, then a clean shutdown.
#[tokio::test]
async fn parallel_spawn_with_one_failure() {
    let rt = runtime_with(Arc::new(ScriptedMockProvider::echo())).await;
    let spec = |id: &str, model: &str| AgentSpec {
        id: id.into(),
        display_name: id.to_uppercase(),
        model: model.into(),
        system_prompt: String::new(),
        focus: String::new(),
    };

    let report = rt
        .state
        .pool
        .spawn(vec![spec("a1", "mock"), spec("a2", "not-a-model"), spec("a3", "mock")])
        .await;
    assert!(report["a2"].starts_with("error:"));
    assert_eq!(report.len(), 3);

    // Survivors still take work.
    let survivors: Vec<String> = ["a1", "a3"]
        .iter()
        .filter(|id| report[**id] == "running")
        .map(|id| id.to_string())
        .collect();
    if let Some(agent_id) = survivors.first() {
        let outcomes = rt
            .state
            .pool
            .run_parallel(
                vec![AgentTask { agent_id: agent_id.clone(), prompt: "ping".into(), session_id: None }],
                Duration::from_secs(10),
            )
            .await;
        assert_eq!(outcomes[0].status, TaskStatus::Success);
    }

    rt.state.pool.shutdown(Duration::from_secs(1)).await;
    assert!(rt.state.pool.is_shutting_down());
}

/// Export-then-parse reproduces the message list (round-trip property).
#[tokio::test]
async fn export_round_trip() {
    let rt = runtime_with(Arc::new(ScriptedMockProvider::echo())).await;
    let mut new = NewSession::for_agent("main");
    new.model_override = Some("mock".into());
    let session = rt.state.store.create_session(new).await.unwrap();
    for text in ["first", "second"] {
        rt.state
            .engine
            .send_message(&session.id, text, SendOptions::default())
            .await
            .unwrap();
    }

    let session = rt.state.store.get_session(&session.id).await.unwrap();
    let messages = rt.state.store.session_messages(&session.id).await.unwrap();
    let jsonl = hive_store::export_jsonl(&session, &messages);

    let lines: Vec<Value> =
        jsonl.trim_end().lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), messages.len() + 1);
    for (line, original) in lines[1..].iter().zip(&messages) {
        assert_eq!(line["role"], original.role);
        assert_eq!(line["content"], original.content);
        assert_eq!(
            line["created_at"].as_str().unwrap(),
            original.created_at.to_rfc3339(),
        );
    }
}
