// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Driver for the Anthropic messages API.
//!
//! Claude exposes reasoning through the extended-thinking API: the request
//! carries a `thinking` directive with a token budget, and the response
//! interleaves `thinking` content blocks (streaming: `thinking_delta`)
//! with the visible answer.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog::ThinkingStyle,
    provider::{EventStream, ModelProvider, ProviderRequest, ProviderResponse},
    ChatMessage, FinishReason, LlmError, Role, StreamEvent, ToolCallSpec,
};

/// Reasoning-token budget sent with the thinking directive.
const THINKING_BUDGET_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &ProviderRequest, stream: bool) -> Value {
        let (system_text, messages) = build_anthropic_messages(&req.messages);

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream": stream,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if req.thinking == ThinkingStyle::Claude {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": THINKING_BUDGET_TOKENS,
            });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let key = self.api_key.as_deref().ok_or_else(|| LlmError::Provider {
            provider: "anthropic".into(),
            message: "ANTHROPIC_API_KEY not set".into(),
        })?;
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                provider: "anthropic".into(),
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "anthropic".into(),
                message: format!("{status}: {text}"),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, req: ProviderRequest) -> Result<ProviderResponse, LlmError> {
        let body = self.build_body(&req, false);
        debug!(model = %req.model, tools = req.tools.len(), "anthropic completion");

        let resp = self.send(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        parse_message(&v)
    }

    async fn stream(&self, req: ProviderRequest) -> Result<EventStream, LlmError> {
        let body = self.build_body(&req, true);
        debug!(model = %req.model, "anthropic stream");

        let resp = self.send(&body).await?;
        let byte_stream = resp.bytes_stream();
        // SSE lines can be split across TCP chunks; carry a remainder buffer
        // forward and parse only complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<StreamEvent, LlmError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        let mut events = Vec::new();
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                    if let Some(ev) = parse_stream_event(&v) {
                                        events.push(Ok(ev));
                                    }
                                }
                            }
                        }
                        events
                    }
                    Err(e) => vec![Err(LlmError::Provider {
                        provider: "anthropic".into(),
                        message: e.to_string(),
                    })],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

/// Split messages into (system text, anthropic message array).
///
/// Anthropic takes the system prompt as a top-level field.  Assistant tool
/// calls become `tool_use` content blocks; tool results become `tool_result`
/// blocks inside a user turn.
pub(crate) fn build_anthropic_messages(messages: &[ChatMessage]) -> (String, Vec<Value>) {
    let mut system = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&m.content);
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let mut blocks: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in &m.tool_calls {
                    let input: Value =
                        serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": input,
                    }));
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.content,
                    }],
                }));
            }
            Role::User => out.push(json!({ "role": "user", "content": m.content })),
            Role::Assistant => out.push(json!({ "role": "assistant", "content": m.content })),
        }
    }

    (system, out)
}

/// Normalize a non-streaming messages-API response.
pub(crate) fn parse_message(v: &Value) -> Result<ProviderResponse, LlmError> {
    let blocks = v
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::Decode("response has no content blocks".into()))?;

    let mut content = String::new();
    let mut thinking = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block["type"].as_str().unwrap_or("") {
            "text" => content.push_str(block["text"].as_str().unwrap_or("")),
            "thinking" => thinking.push_str(block["thinking"].as_str().unwrap_or("")),
            "tool_use" => {
                let name = block["name"].as_str().unwrap_or("");
                if name.is_empty() {
                    return Err(LlmError::MalformedToolCall(block.to_string()));
                }
                tool_calls.push(ToolCallSpec {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: name.to_string(),
                    arguments: block["input"].to_string(),
                });
            }
            _ => {}
        }
    }

    let finish_reason = v["stop_reason"].as_str().map(FinishReason::parse);
    let usage = &v["usage"];
    Ok(ProviderResponse {
        content,
        thinking: if thinking.is_empty() { None } else { Some(thinking) },
        tool_calls,
        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
        cost: 0.0,
        finish_reason,
    })
}

/// Map one Anthropic SSE event to a [`StreamEvent`], or `None` for events
/// that carry nothing the runtime consumes (pings, block starts).
pub(crate) fn parse_stream_event(v: &Value) -> Option<StreamEvent> {
    match v["type"].as_str().unwrap_or("") {
        "content_block_delta" => {
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    Some(StreamEvent::TextDelta(delta["text"].as_str().unwrap_or("").to_string()))
                }
                "thinking_delta" => {
                    let t = delta["thinking"].as_str().unwrap_or("");
                    if t.is_empty() {
                        None
                    } else {
                        Some(StreamEvent::ThinkingDelta(t.to_string()))
                    }
                }
                // signature_delta authenticates the thinking block; it is not
                // readable text and must never surface.
                _ => None,
            }
        }
        "message_delta" => {
            let mut out = None;
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                out = Some(StreamEvent::Finish(FinishReason::parse(reason)));
            }
            if out.is_none() {
                if let Some(usage) = v.get("usage") {
                    out = Some(StreamEvent::Usage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                        cost: 0.0,
                    });
                }
            }
            out
        }
        "message_stop" => Some(StreamEvent::Done),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
