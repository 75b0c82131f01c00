// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver for OpenAI-compatible chat completion APIs.
//!
//! Hosted gateways and local servers (llama.cpp, vLLM, Ollama, DashScope,
//! DeepSeek) all speak the same `/chat/completions` wire format, so one
//! driver configured with a base URL and optional key covers the lot.
//!
//! # Thinking activation
//! Qwen/DeepSeek-family models take an `enable_thinking` flag in the request
//! body; the reasoning text then arrives in `reasoning_content` (dedicated
//! field) or, on some servers, inline as a `<think>` block which the gateway
//! strips during normalization.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog::ThinkingStyle,
    provider::{EventStream, ModelProvider, ProviderRequest, ProviderResponse},
    ChatMessage, FinishReason, LlmError, Role, StreamEvent, ToolCallSpec,
};

pub struct OpenAiCompatProvider {
    chat_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    /// Extra key-value pairs merged verbatim into the request body
    /// (e.g. `reasoning_format: "deepseek"` for llama.cpp).
    extra_body: Value,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: Option<String>, extra_body: Value) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
            api_key,
            client: reqwest::Client::new(),
            extra_body,
        }
    }

    fn build_body(&self, req: &ProviderRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": req.model,
            "messages": build_wire_messages(&req.messages),
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if req.thinking == ThinkingStyle::Qwen {
            body["enable_thinking"] = json!(true);
        }
        // User-supplied driver options win over anything set above.
        if let Some(map) = self.extra_body.as_object() {
            for (k, v) in map {
                body[k.as_str()] = v.clone();
            }
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut http_req = self.client.post(&self.chat_url).json(body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }
        let resp = http_req.send().await.map_err(|e| LlmError::Provider {
            provider: "openai_compat".into(),
            message: e.to_string(),
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "openai_compat".into(),
                message: format!("{status}: {text}"),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn complete(&self, req: ProviderRequest) -> Result<ProviderResponse, LlmError> {
        let body = self.build_body(&req, false);
        debug!(model = %req.model, tools = req.tools.len(), "openai_compat completion");

        let resp = self.send(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        parse_completion(&v)
    }

    async fn stream(&self, req: ProviderRequest) -> Result<EventStream, LlmError> {
        let body = self.build_body(&req, true);
        debug!(model = %req.model, "openai_compat stream");

        let resp = self.send(&body).await?;
        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets.  Keep a line buffer
        // across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<StreamEvent, LlmError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(LlmError::Provider {
                        provider: "openai_compat".into(),
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

fn role_str(r: &Role) -> &'static str {
    r.as_str()
}

/// Convert chat messages into the OpenAI wire-format JSON array.
///
/// Assistant turns with tool calls render a `tool_calls` array (content key
/// omitted when empty, as some servers reject `content: ""` alongside
/// tool_calls); tool turns carry `tool_call_id`.
pub(crate) fn build_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            if m.role == Role::Assistant && !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect();
                let mut v = json!({ "role": "assistant", "tool_calls": calls });
                if !m.content.is_empty() {
                    v["content"] = json!(m.content);
                }
                v
            } else if m.role == Role::Tool {
                json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                })
            } else {
                json!({ "role": role_str(&m.role), "content": m.content })
            }
        })
        .collect()
}

/// Normalize a non-streaming `/chat/completions` response.
pub(crate) fn parse_completion(v: &Value) -> Result<ProviderResponse, LlmError> {
    let choice = v
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::Decode("response has no choices".into()))?;
    let message = &choice["message"];

    let content = message["content"].as_str().unwrap_or("").to_string();

    // Reasoning probes in priority order: dedicated `reasoning_content`
    // (llama.cpp, Qwen3, DeepSeek-R1), then `reasoning` (OpenRouter), then
    // `thinking`.  Inline `<think>` extraction is the gateway's job.
    let thinking = ["reasoning_content", "reasoning", "thinking"]
        .iter()
        .find_map(|k| message.get(*k).and_then(|t| t.as_str()))
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in calls {
            let name = tc["function"]["name"].as_str().unwrap_or("");
            if name.is_empty() {
                return Err(LlmError::MalformedToolCall(tc.to_string()));
            }
            tool_calls.push(ToolCallSpec {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: name.to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
            });
        }
    }

    let finish_reason = choice["finish_reason"].as_str().map(FinishReason::parse);

    let usage = &v["usage"];
    Ok(ProviderResponse {
        content,
        thinking,
        tool_calls,
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        // OpenRouter-style gateways report a dollar cost on usage; absent → 0.
        cost: usage["cost"].as_f64().unwrap_or(0.0),
        finish_reason,
    })
}

/// Parse a single complete SSE `data:` line into a [`StreamEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<Result<StreamEvent, LlmError>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<Result<StreamEvent, LlmError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

pub(crate) fn parse_sse_chunk(v: &Value) -> StreamEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return StreamEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cost: usage["cost"].as_f64().unwrap_or(0.0),
        };
    }

    let choice = &v["choices"][0];

    if let Some(reason) = choice["finish_reason"].as_str() {
        return StreamEvent::Finish(FinishReason::parse(reason));
    }

    let delta = &choice["delta"];

    // Tool-call delta.  Streamed tool calls are unreliable across servers, so
    // the stream manager re-requests them non-streaming on a tool_calls
    // finish; this event is still surfaced for consumers that want it.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return StreamEvent::ToolCall {
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        };
    }

    // Thinking delta: `reasoning_content` (llama.cpp, Qwen3, DeepSeek-R1)
    // or `reasoning` (OpenRouter-style aggregators).
    let thinking_text = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(thinking) = thinking_text {
        if !thinking.is_empty() {
            return StreamEvent::ThinkingDelta(thinking.to_string());
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return StreamEvent::TextDelta(text.to_string());
    }

    StreamEvent::TextDelta(String::new())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Request body ──────────────────────────────────────────────────────────

    fn make_provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("http://localhost:9999/v1".into(), None, Value::Null)
    }

    #[test]
    fn chat_url_appends_path() {
        let p = make_provider();
        assert_eq!(p.chat_url, "http://localhost:9999/v1/chat/completions");
    }

    #[test]
    fn base_url_trailing_slash_stripped() {
        let p = OpenAiCompatProvider::new("http://localhost:1234/v1/".into(), None, Value::Null);
        assert_eq!(p.chat_url, "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn qwen_thinking_sets_enable_flag() {
        let p = make_provider();
        let req = ProviderRequest {
            model: "qwen3-14b".into(),
            messages: vec![ChatMessage::user("hi")],
            thinking: ThinkingStyle::Qwen,
            ..Default::default()
        };
        let body = p.build_body(&req, false);
        assert_eq!(body["enable_thinking"], json!(true));
    }

    #[test]
    fn no_thinking_flag_without_qwen_style() {
        let p = make_provider();
        let req = ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let body = p.build_body(&req, false);
        assert!(body.get("enable_thinking").is_none());
    }

    #[test]
    fn extra_body_overrides_computed_keys() {
        let p = OpenAiCompatProvider::new(
            "http://localhost/v1".into(),
            None,
            json!({ "temperature": 0.9, "reasoning_format": "deepseek" }),
        );
        let req = ProviderRequest {
            model: "m".into(),
            temperature: 0.2,
            ..Default::default()
        };
        let body = p.build_body(&req, true);
        assert_eq!(body["temperature"], json!(0.9));
        assert_eq!(body["reasoning_format"], json!("deepseek"));
    }

    #[test]
    fn streaming_body_requests_usage() {
        let p = make_provider();
        let body = p.build_body(&ProviderRequest::default(), true);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["stream_options"]["include_usage"], json!(true));
    }

    // ── Message serialization ─────────────────────────────────────────────────

    #[test]
    fn assistant_tool_calls_render_array() {
        let msgs = vec![ChatMessage::assistant_with_calls(
            "",
            vec![ToolCallSpec {
                id: "call_1".into(),
                name: "search__web".into(),
                arguments: r#"{"q":"x"}"#.into(),
            }],
        )];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["tool_calls"][0]["id"], json!("call_1"));
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], json!("search__web"));
        assert!(wire[0].get("content").is_none());
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msgs = vec![ChatMessage::tool_result("call_1", "result body")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], json!("tool"));
        assert_eq!(wire[0]["tool_call_id"], json!("call_1"));
        assert_eq!(wire[0]["content"], json!("result body"));
    }

    #[test]
    fn plain_turns_keep_role_and_content() {
        let msgs = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], json!("system"));
        assert_eq!(wire[1]["content"], json!("hi"));
    }

    // ── Completion parsing ────────────────────────────────────────────────────

    #[test]
    fn parse_plain_completion() {
        let v = json!({
            "choices": [{
                "message": { "content": "hello" },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 },
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.content, "hello");
        assert_eq!(r.input_tokens, 12);
        assert_eq!(r.output_tokens, 3);
        assert_eq!(r.finish_reason, Some(FinishReason::Stop));
        assert_eq!(r.cost, 0.0);
    }

    #[test]
    fn parse_completion_prefers_reasoning_content_field() {
        let v = json!({
            "choices": [{
                "message": {
                    "content": "answer",
                    "reasoning_content": "primary",
                    "reasoning": "secondary",
                },
                "finish_reason": "stop",
            }],
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.thinking.as_deref(), Some("primary"));
    }

    #[test]
    fn parse_completion_falls_back_to_thinking_field() {
        let v = json!({
            "choices": [{
                "message": { "content": "answer", "thinking": "cot" },
                "finish_reason": "stop",
            }],
        });
        let r = parse_completion(&v).unwrap();
        assert_eq!(r.thinking.as_deref(), Some("cot"));
    }

    #[test]
    fn parse_completion_with_tool_calls() {
        let v = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "function": { "name": "clock__now", "arguments": "{}" },
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let r = parse_completion(&v).unwrap();
        assert!(r.content.is_empty());
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].name, "clock__now");
        assert_eq!(r.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn parse_completion_rejects_nameless_tool_call() {
        let v = json!({
            "choices": [{
                "message": { "tool_calls": [{ "id": "x", "function": {} }] },
            }],
        });
        assert!(matches!(
            parse_completion(&v),
            Err(LlmError::MalformedToolCall(_))
        ));
    }

    #[test]
    fn parse_completion_without_choices_is_decode_error() {
        assert!(matches!(
            parse_completion(&json!({})),
            Err(LlmError::Decode(_))
        ));
    }

    // ── SSE parsing ───────────────────────────────────────────────────────────

    #[test]
    fn sse_text_delta() {
        let ev = parse_sse_chunk(&json!({ "choices": [{ "delta": { "content": "hi" } }] }));
        assert!(matches!(ev, StreamEvent::TextDelta(t) if t == "hi"));
    }

    #[test]
    fn sse_thinking_delta() {
        let ev = parse_sse_chunk(
            &json!({ "choices": [{ "delta": { "reasoning_content": "hmm" } }] }),
        );
        assert!(matches!(ev, StreamEvent::ThinkingDelta(t) if t == "hmm"));
    }

    #[test]
    fn sse_finish_reason_tool_calls() {
        let ev = parse_sse_chunk(&json!({ "choices": [{ "finish_reason": "tool_calls" }] }));
        assert!(matches!(ev, StreamEvent::Finish(FinishReason::ToolCalls)));
    }

    #[test]
    fn sse_usage_chunk() {
        let ev = parse_sse_chunk(&json!({
            "choices": [],
            "usage": { "prompt_tokens": 7, "completion_tokens": 2, "cost": 0.001 },
        }));
        match ev {
            StreamEvent::Usage { input_tokens, output_tokens, cost } => {
                assert_eq!(input_tokens, 7);
                assert_eq!(output_tokens, 2);
                assert!((cost - 0.001).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn drain_keeps_incomplete_trailing_line() {
        let mut buf = "data: [DONE]\ndata: {\"cho".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done)));
        assert_eq!(buf, "data: {\"cho");
    }

    #[test]
    fn drain_handles_crlf_lines() {
        let mut buf = "data: [DONE]\r\n".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_ignores_comment_and_blank_lines() {
        let mut buf = ": keep-alive\n\ndata: [DONE]\n".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
    }
}
