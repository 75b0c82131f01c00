// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

/// Trait for cooperative (non-blocking) tool implementations.
#[async_trait]
pub trait AsyncTool: Send + Sync {
    /// Execute with the decoded keyword arguments.  Errors become a failed
    /// tool result; they never abort the surrounding chat turn.
    async fn invoke(&self, args: Value) -> anyhow::Result<Value>;
}

/// Signature for synchronous handlers.  These run on the blocking worker
/// pool so they cannot stall the async runtime.
pub type BlockingFn = dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync;

/// The callable behind a registered tool.
#[derive(Clone)]
pub enum ToolHandler {
    Async(Arc<dyn AsyncTool>),
    Blocking(Arc<BlockingFn>),
}

/// A tool discovered from a skill manifest.
///
/// `handler` is `None` when the manifest lists a tool the runtime has no
/// implementation for; such tools still appear in schemas but reject calls.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Qualified name: `{skill}__{method}`.  Unique process-wide.
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object, verbatim from the manifest.
    pub parameters: Value,
    /// Owning skill slug.
    pub skill: String,
    pub handler: Option<ToolHandler>,
}

/// A tool schema as handed to the model layer.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// Render the OpenAI-style function envelope.
    pub fn as_function_object(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// The outcome of one tool execution, as persisted into the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    /// Normalized text content; a JSON error body on failure.
    pub content: String,
    pub success: bool,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            success: true,
            duration_ms,
        }
    }

    /// Failed execution; `content` becomes a JSON error body the model can
    /// read and recover from.
    pub fn failure(
        call_id: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_call_id: call_id.into(),
            name: name.into(),
            content: json!({ "error": message.into() }).to_string(),
            success: false,
            duration_ms,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
