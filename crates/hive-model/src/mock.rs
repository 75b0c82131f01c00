// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::{EventStream, ModelProvider, ProviderRequest, ProviderResponse},
    FinishReason, LlmError, Role, StreamEvent,
};

/// A pre-scripted mock provider.  Each call pops the next event script from
/// the front of the queue, so tests can specify exact sequences — including
/// tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<ProviderRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from an ordered list of per-call event scripts.
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Provider that echoes the last user message on every call.  Used as
    /// the default driver behind the `mock` catalogue alias.
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            StreamEvent::TextDelta(r),
            StreamEvent::Usage { input_tokens: 5, output_tokens: 5, cost: 0.0 },
            StreamEvent::Finish(FinishReason::Stop),
            StreamEvent::Done,
        ]])
    }

    /// Convenience: provider that returns a tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            // Round 1 – model emits a tool call
            vec![
                StreamEvent::ToolCall {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                StreamEvent::Finish(FinishReason::ToolCalls),
                StreamEvent::Done,
            ],
            // Round 2 – model responds after the tool result
            vec![
                StreamEvent::TextDelta(final_text.into()),
                StreamEvent::Usage { input_tokens: 5, output_tokens: 5, cost: 0.0 },
                StreamEvent::Finish(FinishReason::Stop),
                StreamEvent::Done,
            ],
        ])
    }

    fn next_script(&self, req: &ProviderRequest) -> Vec<StreamEvent> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            let reply = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_else(|| "[no input]".into());
            vec![
                StreamEvent::TextDelta(format!("MOCK: {reply}")),
                StreamEvent::Usage { input_tokens: 10, output_tokens: 10, cost: 0.0 },
                StreamEvent::Finish(FinishReason::Stop),
                StreamEvent::Done,
            ]
        } else {
            scripts.remove(0)
        }
    }
}

/// Fold an event script into the response shape `complete` returns.
fn collect_events(events: &[StreamEvent]) -> ProviderResponse {
    let mut resp = ProviderResponse::default();
    for ev in events {
        match ev {
            StreamEvent::TextDelta(t) => resp.content.push_str(t),
            StreamEvent::ThinkingDelta(t) => {
                resp.thinking.get_or_insert_with(String::new).push_str(t)
            }
            StreamEvent::ToolCall { id, name, arguments } => {
                resp.tool_calls.push(crate::ToolCallSpec {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                })
            }
            StreamEvent::Usage { input_tokens, output_tokens, cost } => {
                resp.input_tokens = *input_tokens;
                resp.output_tokens = *output_tokens;
                resp.cost = *cost;
            }
            StreamEvent::Finish(reason) => resp.finish_reason = Some(*reason),
            StreamEvent::Done => {}
        }
    }
    resp
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, req: ProviderRequest) -> Result<ProviderResponse, LlmError> {
        Ok(collect_events(&self.next_script(&req)))
    }

    async fn stream(&self, req: ProviderRequest) -> Result<EventStream, LlmError> {
        let events: Vec<Result<StreamEvent, LlmError>> =
            self.next_script(&req).into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Fails the first `fail_count` calls with a provider error, then behaves
/// like [`ScriptedMockProvider::always_text`].  Exercises circuit breaker
/// and fallback paths.
pub struct FlakyMockProvider {
    fail_count: u32,
    calls: AtomicU32,
    reply: String,
}

impl FlakyMockProvider {
    pub fn new(fail_count: u32, reply: impl Into<String>) -> Self {
        Self { fail_count, calls: AtomicU32::new(0), reply: reply.into() }
    }

    pub fn calls_made(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), LlmError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        if n < self.fail_count {
            Err(LlmError::Provider { provider: "mock".into(), message: "injected failure".into() })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ModelProvider for FlakyMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _req: ProviderRequest) -> Result<ProviderResponse, LlmError> {
        self.check()?;
        Ok(ProviderResponse {
            content: self.reply.clone(),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        })
    }

    async fn stream(&self, _req: ProviderRequest) -> Result<EventStream, LlmError> {
        self.check()?;
        let events: Vec<Result<StreamEvent, LlmError>> = vec![
            Ok(StreamEvent::TextDelta(self.reply.clone())),
            Ok(StreamEvent::Finish(FinishReason::Stop)),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    fn req(text: &str) -> ProviderRequest {
        ProviderRequest { messages: vec![ChatMessage::user(text)], ..Default::default() }
    }

    #[tokio::test]
    async fn echo_reflects_last_user_message() {
        let p = ScriptedMockProvider::echo();
        let r = p.complete(req("hi")).await.unwrap();
        assert_eq!(r.content, "MOCK: hi");
    }

    #[tokio::test]
    async fn scripted_text_reply() {
        let p = ScriptedMockProvider::always_text("hello world");
        let r = p.complete(req("x")).await.unwrap();
        assert_eq!(r.content, "hello world");
        assert_eq!(r.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn tool_then_text_spans_two_calls() {
        let p = ScriptedMockProvider::tool_then_text("c1", "clock__now", "{}", "done");
        let first = p.complete(req("x")).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.finish_reason, Some(FinishReason::ToolCalls));
        let second = p.complete(req("x")).await.unwrap();
        assert_eq!(second.content, "done");
    }

    #[tokio::test]
    async fn last_request_is_captured() {
        let p = ScriptedMockProvider::always_text("y");
        let _ = p.complete(req("inspect me")).await.unwrap();
        let captured = p.last_request.lock().unwrap();
        assert_eq!(captured.as_ref().unwrap().messages[0].content, "inspect me");
    }

    #[tokio::test]
    async fn flaky_fails_then_recovers() {
        let p = FlakyMockProvider::new(2, "ok");
        assert!(p.complete(req("a")).await.is_err());
        assert!(p.complete(req("b")).await.is_err());
        let r = p.complete(req("c")).await.unwrap();
        assert_eq!(r.content, "ok");
        assert_eq!(p.calls_made(), 3);
    }
}
