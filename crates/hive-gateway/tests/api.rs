// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! REST surface tests against an in-memory runtime with a mock model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use hive_config::HiveConfig;
use hive_core::{ChatEngine, PromptAssembler};
use hive_gateway::{router, AppState};
use hive_model::{LlmGateway, ModelProvider, ScriptedMockProvider};
use hive_pool::AgentPool;
use hive_scheduler::Scheduler;
use hive_store::{CronJob, SessionMode, Store};
use hive_tools::ToolRegistry;

async fn test_app() -> (Router, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    let mut providers: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
    providers.insert("mock".into(), Arc::new(ScriptedMockProvider::echo()));
    let gateway = Arc::new(LlmGateway::new(providers, Vec::new()));
    let tools = Arc::new(ToolRegistry::new(Duration::from_secs(5), 2));
    let assembler = Arc::new(PromptAssembler::new("/no/identity.md", "/no/soul.md"));
    let config = Arc::new(HiveConfig::default());
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
    let state = AppState::new(store.clone(), engine, scheduler, pool, config);
    (router(state), store)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_runtime_counts() {
    let (app, _store) = test_app().await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["status"], "ok");
    assert_eq!(v["database"], true);
    assert_eq!(v["sessions"], 0);
}

#[tokio::test]
async fn session_lifecycle_over_rest() {
    let (app, _store) = test_app().await;

    // Create.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/sessions",
            json!({ "agent_id": "main", "model": "mock" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let session = body_json(response).await;
    let id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["status"], "active");

    // Send a message; the mock echoes it back.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/sessions/{id}/messages"),
            json!({ "content": "Hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let chat = body_json(response).await;
    assert_eq!(chat["content"], "MOCK: Hello");
    assert_eq!(chat["finish_reason"], "stop");

    // Fetch with embedded messages.
    let response = app.clone().oneshot(get(&format!("/api/sessions/{id}"))).await.unwrap();
    let v = body_json(response).await;
    assert_eq!(v["messages"].as_array().unwrap().len(), 2);
    assert_eq!(v["session"]["title"], "Hello");

    // List with filter.
    let response = app
        .clone()
        .oneshot(get("/api/sessions?agent_id=main&status=active"))
        .await
        .unwrap();
    let v = body_json(response).await;
    assert_eq!(v["sessions"].as_array().unwrap().len(), 1);

    // DELETE ends the session.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/sessions/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["session"]["status"], "ended");

    // Messaging an ended session conflicts.
    let response = app
        .oneshot(post_json(
            &format!("/api/sessions/{id}/messages"),
            json!({ "content": "too late" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_session_is_404_with_detail_envelope() {
    let (app, _store) = test_app().await;
    let response = app.oneshot(get("/api/sessions/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let v = body_json(response).await;
    assert!(v["detail"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn export_jsonl_parses_back_to_message_list() {
    let (app, store) = test_app().await;
    let session = store
        .create_session({
            let mut s = hive_store::NewSession::for_agent("main");
            s.model_override = Some("mock".into());
            s
        })
        .await
        .unwrap();
    let id = session.id.clone();
    app.clone()
        .oneshot(post_json(&format!("/api/sessions/{id}/messages"), json!({ "content": "hi" })))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/sessions/{id}/export?format=jsonl")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("attachment"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<Value> =
        text.trim_end().lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    // Header + user + assistant.
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["role"], "user");
    assert_eq!(lines[2]["role"], "assistant");

    let response = app
        .oneshot(get(&format!("/api/sessions/{id}/export?format=csv")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn agent_endpoints_round_trip() {
    let (app, store) = test_app().await;
    store.upsert_agent("main", "Main", "mock", "be helpful", "general").await.unwrap();

    let response = app.clone().oneshot(get("/api/agents")).await.unwrap();
    let v = body_json(response).await;
    assert_eq!(v["agents"].as_array().unwrap().len(), 1);
    assert_eq!(v["agents"][0]["status"], "idle");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/agents/main")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "system_prompt": "be terse" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["agent"]["system_prompt"], "be terse");

    let response = app.oneshot(get("/api/agents/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cron_endpoints_manage_jobs() {
    let (app, store) = test_app().await;
    store
        .upsert_job(&CronJob {
            id: "digest".into(),
            schedule: "30m".into(),
            agent_id: "main".into(),
            enabled: true,
            payload_type: "prompt".into(),
            payload: "Summarize".into(),
            session_mode: SessionMode::Isolated,
            max_duration_secs: 60,
            retry_count: 0,
        })
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/api/cron/jobs")).await.unwrap();
    let v = body_json(response).await;
    assert_eq!(v["jobs"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(post_json("/api/cron/jobs/digest/disable", json!({})))
        .await
        .unwrap();
    let v = body_json(response).await;
    assert_eq!(v["job"]["enabled"], false);

    let response = app.clone().oneshot(post_json("/api/cron/reload", json!({}))).await.unwrap();
    let v = body_json(response).await;
    assert_eq!(v["jobs_registered"], 0);

    let response = app
        .clone()
        .oneshot(post_json("/api/cron/jobs/digest/enable", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Patching with a malformed schedule is rejected before touching the row.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/cron/jobs/digest")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "schedule": "nonsense" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.clone().oneshot(get("/api/cron/jobs/digest/history")).await.unwrap();
    let v = body_json(response).await;
    assert_eq!(v["history"].as_array().unwrap().len(), 0);

    let response = app.oneshot(get("/api/cron/jobs/ghost/history")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
