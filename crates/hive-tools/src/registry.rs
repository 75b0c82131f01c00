// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    manifest::{load_manifest, qualified_name},
    tool::{ToolDefinition, ToolHandler, ToolResult, ToolSchema},
};

/// Central registry holding every discovered tool.
///
/// Read-mostly after startup: discovery happens once, then `execute` calls
/// run concurrently without mutual exclusion.  A semaphore bounds how many
/// blocking handlers occupy worker threads at once.
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    exec_timeout: Duration,
    workers: Arc<Semaphore>,
}

impl ToolRegistry {
    pub fn new(exec_timeout: Duration, worker_pool_size: usize) -> Self {
        Self {
            tools: HashMap::new(),
            exec_timeout,
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    pub fn register(&mut self, def: ToolDefinition) {
        self.tools.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Walk the skills directory and register every manifest-listed tool.
    ///
    /// `handlers` maps qualified names to callables.  A manifest entry with
    /// no matching handler is still registered (it appears in schemas) but
    /// rejects execution.  Returns the number of tools registered.
    pub fn discover(
        &mut self,
        skills_dir: &Path,
        handlers: &HashMap<String, ToolHandler>,
    ) -> anyhow::Result<usize> {
        let mut count = 0;
        if !skills_dir.is_dir() {
            debug!(dir = %skills_dir.display(), "skills directory absent, no tools discovered");
            return Ok(0);
        }
        let mut entries: Vec<_> = std::fs::read_dir(skills_dir)?.filter_map(Result::ok).collect();
        entries.sort_by_key(|e| e.path());

        for entry in entries {
            let manifest_path = entry.path().join("manifest.yaml");
            if !manifest_path.is_file() {
                continue;
            }
            let manifest = match load_manifest(&manifest_path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "skipping bad manifest");
                    continue;
                }
            };
            for tool in &manifest.tools {
                let name = qualified_name(&manifest.slug, &tool.method);
                let handler = handlers.get(&name).cloned();
                if handler.is_none() {
                    warn!(tool = %name, "manifest lists tool with no handler; calls will fail");
                }
                self.register(ToolDefinition {
                    name: name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                    skill: manifest.slug.clone(),
                    handler,
                });
                count += 1;
            }
        }
        debug!(count, "tool discovery complete");
        Ok(count)
    }

    /// Schemas for registered tools, optionally filtered to a skill subset.
    pub fn schemas(&self, skills: Option<&[&str]>) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|d| skills.map_or(true, |set| set.contains(&d.skill.as_str())))
            .map(|d| ToolSchema {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.parameters.clone(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a call whose arguments arrive as a model-emitted JSON string.
    ///
    /// Arguments that fail JSON decoding are passed through as a single
    /// positional value under the `input` key.
    pub async fn execute_raw(&self, call_id: &str, name: &str, raw_args: &str) -> ToolResult {
        let args = match serde_json::from_str::<Value>(raw_args) {
            Ok(v) if v.is_object() => v,
            Ok(v) => json!({ "input": v }),
            Err(_) => json!({ "input": raw_args }),
        };
        self.execute(call_id, name, args).await
    }

    /// Execute a call with already-decoded arguments.
    pub async fn execute(&self, call_id: &str, name: &str, args: Value) -> ToolResult {
        let start = Instant::now();

        let Some(def) = self.tools.get(name) else {
            metrics::counter!("hive_tool_executions_total", "tool" => name.to_string(), "outcome" => "unknown")
                .increment(1);
            return ToolResult::failure(
                call_id,
                name,
                format!("Unknown tool: {name}"),
                start.elapsed().as_millis() as u64,
            );
        };
        let Some(handler) = def.handler.clone() else {
            metrics::counter!("hive_tool_executions_total", "tool" => name.to_string(), "outcome" => "no_handler")
                .increment(1);
            return ToolResult::failure(
                call_id,
                name,
                format!("Tool has no executable handler: {name}"),
                start.elapsed().as_millis() as u64,
            );
        };

        let outcome = tokio::time::timeout(self.exec_timeout, self.run_handler(handler, args)).await;
        let duration = start.elapsed();
        metrics::histogram!("hive_tool_duration_seconds", "tool" => name.to_string())
            .record(duration.as_secs_f64());

        let result = match outcome {
            Err(_) => {
                metrics::counter!("hive_tool_executions_total", "tool" => name.to_string(), "outcome" => "timeout")
                    .increment(1);
                ToolResult::failure(
                    call_id,
                    name,
                    format!("Tool timed out after {}s", self.exec_timeout.as_secs()),
                    duration.as_millis() as u64,
                )
            }
            Ok(Err(e)) => {
                metrics::counter!("hive_tool_executions_total", "tool" => name.to_string(), "outcome" => "error")
                    .increment(1);
                ToolResult::failure(call_id, name, e.to_string(), duration.as_millis() as u64)
            }
            Ok(Ok(value)) => {
                metrics::counter!("hive_tool_executions_total", "tool" => name.to_string(), "outcome" => "ok")
                    .increment(1);
                let (content, success) = normalize_output(value);
                if success {
                    ToolResult::ok(call_id, name, content, duration.as_millis() as u64)
                } else {
                    ToolResult {
                        tool_call_id: call_id.to_string(),
                        name: name.to_string(),
                        content,
                        success: false,
                        duration_ms: duration.as_millis() as u64,
                    }
                }
            }
        };
        debug!(tool = name, success = result.success, ms = result.duration_ms, "tool executed");
        result
    }

    async fn run_handler(&self, handler: ToolHandler, args: Value) -> anyhow::Result<Value> {
        match handler {
            ToolHandler::Async(tool) => tool.invoke(args).await,
            ToolHandler::Blocking(f) => {
                // Bound concurrent blocking handlers so they cannot exhaust
                // the runtime's blocking-thread budget.
                let permit = self.workers.clone().acquire_owned().await?;
                let join = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f(args)
                })
                .await;
                match join {
                    Ok(r) => r,
                    Err(e) => anyhow::bail!("tool panicked: {e}"),
                }
            }
        }
    }
}

/// Map a handler's return value to the persisted content string.
///
/// - `{success, data}` shapes unwrap: content is the data (JSON-encoded when
///   structured), success taken from the flag.
/// - Other structured containers are JSON-encoded.
/// - Scalars are stringified without quoting.
fn normalize_output(value: Value) -> (String, bool) {
    if let Some(obj) = value.as_object() {
        if let Some(success) = obj.get("success").and_then(|s| s.as_bool()) {
            if let Some(data) = obj.get("data") {
                let content = match data {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return (content, success);
            }
        }
    }
    match value {
        Value::String(s) => (s, true),
        Value::Null => (String::new(), true),
        Value::Bool(b) => (b.to_string(), true),
        Value::Number(n) => (n.to_string(), true),
        structured => (structured.to_string(), true),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::AsyncTool;

    struct EchoArgs;

    #[async_trait]
    impl AsyncTool for EchoArgs {
        async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
            Ok(json!({ "echo": args }))
        }
    }

    struct Failing;

    #[async_trait]
    impl AsyncTool for Failing {
        async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
            anyhow::bail!("handler exploded")
        }
    }

    struct Slow;

    #[async_trait]
    impl AsyncTool for Slow {
        async fn invoke(&self, _args: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("never"))
        }
    }

    fn registry_with(name: &str, handler: ToolHandler) -> ToolRegistry {
        let mut reg = ToolRegistry::new(Duration::from_secs(5), 2);
        reg.register(ToolDefinition {
            name: name.into(),
            description: "test tool".into(),
            parameters: json!({ "type": "object" }),
            skill: name.split("__").next().unwrap_or("test").into(),
            handler: Some(handler),
        });
        reg
    }

    #[tokio::test]
    async fn execute_unknown_tool_fails_with_message() {
        let reg = ToolRegistry::new(Duration::from_secs(5), 2);
        let r = reg.execute("c1", "nope__never", json!({})).await;
        assert!(!r.success);
        assert!(r.content.contains("Unknown tool: nope__never"));
    }

    #[tokio::test]
    async fn execute_handlerless_tool_rejects() {
        let mut reg = ToolRegistry::new(Duration::from_secs(5), 2);
        reg.register(ToolDefinition {
            name: "ghost__walk".into(),
            description: String::new(),
            parameters: json!({ "type": "object" }),
            skill: "ghost".into(),
            handler: None,
        });
        let r = reg.execute("c1", "ghost__walk", json!({})).await;
        assert!(!r.success);
        assert!(r.content.contains("no executable handler"));
    }

    #[tokio::test]
    async fn execute_async_handler_encodes_structured_result() {
        let reg = registry_with("test__echo", ToolHandler::Async(Arc::new(EchoArgs)));
        let r = reg.execute("c1", "test__echo", json!({ "x": 1 })).await;
        assert!(r.success);
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["echo"]["x"], 1);
        assert_eq!(r.tool_call_id, "c1");
        assert_eq!(r.name, "test__echo");
    }

    #[tokio::test]
    async fn execute_handler_error_is_json_error_body() {
        let reg = registry_with("test__fail", ToolHandler::Async(Arc::new(Failing)));
        let r = reg.execute("c1", "test__fail", json!({})).await;
        assert!(!r.success);
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["error"], "handler exploded");
    }

    #[tokio::test(start_paused = true)]
    async fn execute_enforces_timeout() {
        let reg = registry_with("test__slow", ToolHandler::Async(Arc::new(Slow)));
        let r = reg.execute("c1", "test__slow", json!({})).await;
        assert!(!r.success);
        assert!(r.content.contains("timed out after 5s"));
    }

    #[tokio::test]
    async fn execute_blocking_handler_runs_on_worker_pool() {
        let f: Arc<crate::tool::BlockingFn> =
            Arc::new(|args: Value| Ok(json!(format!("got {}", args["input"]))));
        let reg = registry_with("test__block", ToolHandler::Blocking(f));
        let r = reg.execute("c1", "test__block", json!({ "input": "x" })).await;
        assert!(r.success);
        assert!(r.content.contains("got"));
    }

    #[tokio::test]
    async fn execute_raw_decodes_json_arguments() {
        let reg = registry_with("test__echo", ToolHandler::Async(Arc::new(EchoArgs)));
        let r = reg.execute_raw("c1", "test__echo", r#"{"q":"rust"}"#).await;
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["echo"]["q"], "rust");
    }

    #[tokio::test]
    async fn execute_raw_wraps_non_json_as_input_key() {
        let reg = registry_with("test__echo", ToolHandler::Async(Arc::new(EchoArgs)));
        let r = reg.execute_raw("c1", "test__echo", "plain text").await;
        let v: Value = serde_json::from_str(&r.content).unwrap();
        assert_eq!(v["echo"]["input"], "plain text");
    }

    #[test]
    fn normalize_scalar_is_unquoted() {
        assert_eq!(normalize_output(json!("hi")), ("hi".into(), true));
        assert_eq!(normalize_output(json!(42)), ("42".into(), true));
        assert_eq!(normalize_output(json!(true)), ("true".into(), true));
    }

    #[test]
    fn normalize_success_data_shape_unwraps() {
        let (content, success) = normalize_output(json!({ "success": false, "data": "partial" }));
        assert_eq!(content, "partial");
        assert!(!success);
    }

    #[test]
    fn normalize_container_is_json_encoded() {
        let (content, success) = normalize_output(json!([1, 2, 3]));
        assert_eq!(content, "[1,2,3]");
        assert!(success);
    }

    #[test]
    fn discover_registers_manifest_tools() {
        let dir = tempfile::tempdir().unwrap();
        let skill = dir.path().join("search");
        std::fs::create_dir(&skill).unwrap();
        std::fs::write(
            skill.join("manifest.yaml"),
            "slug: search\ntools:\n  - method: web\n    description: Search\n",
        )
        .unwrap();

        let mut handlers: HashMap<String, ToolHandler> = HashMap::new();
        handlers.insert("search__web".into(), ToolHandler::Async(Arc::new(EchoArgs)));

        let mut reg = ToolRegistry::new(Duration::from_secs(5), 2);
        let n = reg.discover(dir.path(), &handlers).unwrap();
        assert_eq!(n, 1);
        assert!(reg.get("search__web").is_some());
        assert!(reg.get("search__web").unwrap().handler.is_some());
    }

    #[test]
    fn discover_keeps_handlerless_tools_visible() {
        let dir = tempfile::tempdir().unwrap();
        let skill = dir.path().join("orphan");
        std::fs::create_dir(&skill).unwrap();
        std::fs::write(skill.join("manifest.yaml"), "slug: orphan\ntools:\n  - method: run\n")
            .unwrap();

        let mut reg = ToolRegistry::new(Duration::from_secs(5), 2);
        reg.discover(dir.path(), &HashMap::new()).unwrap();
        let def = reg.get("orphan__run").unwrap();
        assert!(def.handler.is_none());
        assert_eq!(reg.schemas(None).len(), 1);
    }

    #[test]
    fn schemas_filter_by_skill() {
        let mut reg = ToolRegistry::new(Duration::from_secs(5), 2);
        for name in ["a__one", "b__two"] {
            reg.register(ToolDefinition {
                name: name.into(),
                description: String::new(),
                parameters: json!({ "type": "object" }),
                skill: name.split("__").next().unwrap().into(),
                handler: None,
            });
        }
        let filtered = reg.schemas(Some(&["a"]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "a__one");
        assert_eq!(reg.schemas(None).len(), 2);
    }

    #[test]
    fn missing_skills_dir_is_empty_not_error() {
        let mut reg = ToolRegistry::new(Duration::from_secs(5), 2);
        let n = reg.discover(Path::new("/no/such/dir"), &HashMap::new()).unwrap();
        assert_eq!(n, 0);
    }
}
