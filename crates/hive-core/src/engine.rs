// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The chat engine: message → context → model → tool loop → persistence.
//!
//! One engine instance serves every session.  Within a session the engine is
//! the sole writer of message rows, and it persists in strict causal order:
//! user turn, assistant-with-tool-calls, tool results, final assistant.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hive_config::ChatConfig;
use hive_model::{
    ChatMessage, FinishReason, LlmError, LlmGateway, LlmRequest, Role, ToolCallSpec,
};
use hive_store::{
    derive_title, MessageRecord, NewMessage, Session, SessionStatus, Store, StoreError,
    ToolCallRecord,
};
use hive_tools::{ToolRegistry, ToolResult};

use crate::{events::ChatEvent, prompt::AssembleRequest, PromptAssembler};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Per-send flags.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    pub enable_thinking: bool,
    pub enable_tools: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self { enable_thinking: false, enable_tools: true }
    }
}

/// Summary of the final assistant turn returned by `send_message`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatResponse {
    pub message_id: String,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResult>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub finish_reason: FinishReason,
}

pub struct ChatEngine {
    store: Arc<Store>,
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    assembler: Arc<PromptAssembler>,
    config: ChatConfig,
    default_model: String,
}

/// Internal per-turn accounting shared by both pipelines.
#[derive(Default)]
struct TurnTotals {
    messages: i64,
    input_tokens: i64,
    output_tokens: i64,
    cost: f64,
}

impl ChatEngine {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<LlmGateway>,
        tools: Arc<ToolRegistry>,
        assembler: Arc<PromptAssembler>,
        config: ChatConfig,
        default_model: String,
    ) -> Self {
        Self { store, gateway, tools, assembler, config, default_model }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    // ── One-shot pipeline ─────────────────────────────────────────────────────

    /// Run one user turn to completion and return the final assistant turn.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        opts: SendOptions,
    ) -> Result<ChatResponse, ChatError> {
        let (session, user_msg, mut context, request) =
            self.prepare_turn(session_id, content, opts).await?;

        let mut totals = TurnTotals { messages: 1, ..Default::default() };
        let mut thinking_acc = String::new();
        let mut all_calls: Vec<ToolCallRecord> = Vec::new();
        let mut all_results: Vec<ToolResult> = Vec::new();

        let mut round = 0u32;
        let outcome = loop {
            round += 1;
            let mut req = request.clone();
            req.messages = context.clone();
            let resp = match self.gateway.complete(&req).await {
                Ok(r) => r,
                Err(e) => {
                    self.finish_turn(&session, &user_msg, &totals).await?;
                    return Err(e.into());
                }
            };
            totals.input_tokens += resp.usage.input_tokens as i64;
            totals.output_tokens += resp.usage.output_tokens as i64;
            totals.cost += resp.usage.cost;
            if let Some(t) = &resp.thinking {
                if !thinking_acc.is_empty() {
                    thinking_acc.push('\n');
                }
                thinking_acc.push_str(t);
            }

            // Exit on a plain answer, or when the iteration cap is reached
            // while the model still wants tools: the last content persists,
            // the pending calls do not run.
            if resp.tool_calls.is_empty() || round >= self.config.max_tool_rounds {
                if !resp.tool_calls.is_empty() {
                    warn!(
                        session = session_id,
                        rounds = round,
                        "tool loop cap reached with pending calls; stopping"
                    );
                }
                break resp;
            }

            let calls = to_records(&resp.tool_calls);
            let mut turn = NewMessage::assistant(&session.id, &resp.content);
            turn.tool_calls = Some(calls.clone());
            turn.thinking = resp.thinking.clone();
            turn.model = Some(resp.model.clone());
            turn.input_tokens = resp.usage.input_tokens as i64;
            turn.output_tokens = resp.usage.output_tokens as i64;
            turn.cost = resp.usage.cost;
            turn.latency_ms = resp.latency_ms as i64;
            self.store.append_message(turn).await?;
            totals.messages += 1;
            context.push(ChatMessage::assistant_with_calls(&resp.content, resp.tool_calls.clone()));

            let results = self.run_tool_calls(&resp.tool_calls).await;
            for result in &results {
                let mut msg = NewMessage::tool(&session.id, &result.tool_call_id, &result.content);
                msg.model = Some(resp.model.clone());
                self.store.append_message(msg).await?;
                totals.messages += 1;
                context.push(ChatMessage::tool_result(&result.tool_call_id, &result.content));
            }
            all_calls.extend(calls);
            all_results.extend(results);
        };

        // Final assistant turn with the accumulated thinking.
        let mut final_msg = NewMessage::assistant(&session.id, &outcome.content);
        final_msg.thinking =
            if thinking_acc.is_empty() { None } else { Some(thinking_acc.clone()) };
        final_msg.model = Some(outcome.model.clone());
        final_msg.input_tokens = outcome.usage.input_tokens as i64;
        final_msg.output_tokens = outcome.usage.output_tokens as i64;
        final_msg.cost = outcome.usage.cost;
        final_msg.latency_ms = outcome.latency_ms as i64;
        let persisted = self.store.append_message(final_msg).await?;
        totals.messages += 1;

        self.finish_turn(&session, &user_msg, &totals).await?;
        debug!(session = session_id, rounds = round, "turn complete");

        Ok(ChatResponse {
            message_id: persisted.id,
            content: outcome.content,
            thinking: if thinking_acc.is_empty() { None } else { Some(thinking_acc) },
            tool_calls: all_calls,
            tool_results: all_results,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            cost: totals.cost,
            finish_reason: outcome.finish_reason,
        })
    }

    // ── Streaming pipeline ────────────────────────────────────────────────────

    /// Run one user turn, emitting [`ChatEvent`]s as the model streams.
    ///
    /// Event sends are best-effort: a dropped receiver (client disconnect)
    /// never interrupts the pipeline, so whatever accumulated still persists
    /// as the assistant turn — the partial-recovery contract.
    pub async fn stream_message(
        &self,
        session_id: &str,
        content: &str,
        opts: SendOptions,
        tx: mpsc::Sender<ChatEvent>,
    ) -> Result<(), ChatError> {
        let (session, user_msg, mut context, request) =
            self.prepare_turn(session_id, content, opts).await?;

        let mut totals = TurnTotals { messages: 1, ..Default::default() };
        let mut thinking_acc = String::new();

        let mut round = 0u32;
        loop {
            round += 1;
            let mut req = request.clone();
            req.messages = context.clone();

            let mut rx = match self.gateway.stream(&req).await {
                Ok(rx) => rx,
                Err(e) => {
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                    self.finish_turn(&session, &user_msg, &totals).await?;
                    return Err(e.into());
                }
            };

            let mut acc_content = String::new();
            let mut acc_thinking = String::new();
            let mut finish: Option<FinishReason> = None;
            let mut stream_error: Option<LlmError> = None;

            while let Some(item) = rx.recv().await {
                match item {
                    Ok(chunk) => {
                        if let Some(t) = chunk.content {
                            acc_content.push_str(&t);
                            let _ = tx.send(ChatEvent::TokenDelta(t)).await;
                        }
                        if let Some(t) = chunk.thinking {
                            acc_thinking.push_str(&t);
                            let _ = tx.send(ChatEvent::ThinkingDelta(t)).await;
                        }
                        if let Some(u) = chunk.usage {
                            totals.input_tokens += u.input_tokens as i64;
                            totals.output_tokens += u.output_tokens as i64;
                            totals.cost += u.cost;
                        }
                        if let Some(f) = chunk.finish {
                            finish = Some(f);
                        }
                    }
                    Err(e) => {
                        stream_error = Some(e);
                        break;
                    }
                }
            }

            if !acc_thinking.is_empty() {
                if !thinking_acc.is_empty() {
                    thinking_acc.push('\n');
                }
                thinking_acc.push_str(&acc_thinking);
            }

            if let Some(e) = stream_error {
                // Persist whatever arrived before the fault.
                if !acc_content.is_empty() || !thinking_acc.is_empty() {
                    let mut partial = NewMessage::assistant(&session.id, &acc_content);
                    partial.thinking =
                        if thinking_acc.is_empty() { None } else { Some(thinking_acc.clone()) };
                    partial.model = Some(request.model.clone());
                    self.store.append_message(partial).await?;
                    totals.messages += 1;
                }
                let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                self.finish_turn(&session, &user_msg, &totals).await?;
                return Err(e.into());
            }

            let wants_tools =
                finish == Some(FinishReason::ToolCalls) && round < self.config.max_tool_rounds;

            if !wants_tools {
                let mut final_msg = NewMessage::assistant(&session.id, &acc_content);
                final_msg.thinking =
                    if thinking_acc.is_empty() { None } else { Some(thinking_acc.clone()) };
                final_msg.model = Some(request.model.clone());
                final_msg.input_tokens = totals.input_tokens;
                final_msg.output_tokens = totals.output_tokens;
                final_msg.cost = totals.cost;
                let persisted = self.store.append_message(final_msg).await?;
                totals.messages += 1;
                self.finish_turn(&session, &user_msg, &totals).await?;

                let _ = tx
                    .send(ChatEvent::Usage {
                        input_tokens: totals.input_tokens as u32,
                        output_tokens: totals.output_tokens as u32,
                        cost: totals.cost,
                    })
                    .await;
                let _ = tx
                    .send(ChatEvent::Done {
                        message_id: persisted.id,
                        finish_reason: finish.unwrap_or(FinishReason::Stop).as_str(),
                    })
                    .await;
                debug!(session = session_id, rounds = round, "streamed turn complete");
                return Ok(());
            }

            // Providers do not reliably stream complete tool-call deltas, so
            // re-request the turn non-streaming to get the canonical list.
            let canonical = match self.gateway.complete(&req).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                    self.finish_turn(&session, &user_msg, &totals).await?;
                    return Err(e.into());
                }
            };
            totals.input_tokens += canonical.usage.input_tokens as i64;
            totals.output_tokens += canonical.usage.output_tokens as i64;
            totals.cost += canonical.usage.cost;

            if canonical.tool_calls.is_empty() {
                // The re-request answered in text after all; treat it as the
                // final turn.
                let body = if acc_content.is_empty() { canonical.content } else { acc_content };
                let mut final_msg = NewMessage::assistant(&session.id, &body);
                final_msg.model = Some(request.model.clone());
                let persisted = self.store.append_message(final_msg).await?;
                totals.messages += 1;
                self.finish_turn(&session, &user_msg, &totals).await?;
                let _ = tx
                    .send(ChatEvent::Done {
                        message_id: persisted.id,
                        finish_reason: FinishReason::Stop.as_str(),
                    })
                    .await;
                return Ok(());
            }

            let calls = to_records(&canonical.tool_calls);
            let mut turn = NewMessage::assistant(&session.id, &acc_content);
            turn.tool_calls = Some(calls);
            turn.model = Some(request.model.clone());
            self.store.append_message(turn).await?;
            totals.messages += 1;
            context.push(ChatMessage::assistant_with_calls(
                &acc_content,
                canonical.tool_calls.clone(),
            ));

            for tc in &canonical.tool_calls {
                let _ = tx
                    .send(ChatEvent::ToolCallStarted {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    })
                    .await;
            }
            let results = self.run_tool_calls(&canonical.tool_calls).await;
            for result in results {
                let _ = tx
                    .send(ChatEvent::ToolCallFinished {
                        id: result.tool_call_id.clone(),
                        name: result.name.clone(),
                        content: result.content.clone(),
                        success: result.success,
                    })
                    .await;
                let msg = NewMessage::tool(&session.id, &result.tool_call_id, &result.content);
                self.store.append_message(msg).await?;
                totals.messages += 1;
                context.push(ChatMessage::tool_result(&result.tool_call_id, &result.content));
            }
        }
    }

    // ── Shared plumbing ───────────────────────────────────────────────────────

    /// Steps 1–4 of the pipeline: load + validate the session, persist the
    /// user turn, build the outgoing context, and shape the model request.
    async fn prepare_turn(
        &self,
        session_id: &str,
        content: &str,
        opts: SendOptions,
    ) -> Result<(Session, MessageRecord, Vec<ChatMessage>, LlmRequest), ChatError> {
        let session = self.store.get_session(session_id).await?;
        if session.status == SessionStatus::Ended {
            return Err(StoreError::SessionEnded(session_id.to_string()).into());
        }

        // Persist the incoming user message first so concurrent readers see
        // it before the model call completes.
        let user_msg = self.store.append_message(NewMessage::user(session_id, content)).await?;

        let agent = self.store.get_agent(&session.agent_id).await.ok();
        let model = session
            .model_override
            .clone()
            .or_else(|| agent.as_ref().map(|a| a.model.clone()))
            .unwrap_or_else(|| self.default_model.clone());

        let tools = if opts.enable_tools {
            self.tools
                .schemas(None)
                .into_iter()
                .map(|s| hive_model::ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        } else {
            Vec::new()
        };

        let system_prompt = match &session.system_prompt_override {
            Some(p) => p.clone(),
            None => {
                let req = AssembleRequest {
                    agent_id: session.agent_id.clone(),
                    agent_prompt: agent.as_ref().map(|a| a.system_prompt.clone()),
                    goals: Vec::new(),
                    tools: if opts.enable_tools { self.tools.schemas(None) } else { Vec::new() },
                    include_tools: opts.enable_tools,
                    include_goals: false,
                    override_prompt: None,
                };
                self.assembler.assemble(&req).prompt
            }
        };

        let mut context = vec![ChatMessage::system(system_prompt)];

        // Most recent N messages in chronological order, excluding the user
        // turn just written, which goes last.
        let window = session.context_window.max(0);
        if window > 0 {
            let recent = self.store.recent_messages(session_id, window + 1).await?;
            let mut history: Vec<&MessageRecord> =
                recent.iter().filter(|m| m.id != user_msg.id).collect();
            if history.len() > window as usize {
                let skip = history.len() - window as usize;
                history.drain(..skip);
            }
            for m in history {
                context.push(to_chat_message(m));
            }
        }
        context.push(ChatMessage::user(content));

        let request = LlmRequest {
            messages: Vec::new(),
            model,
            temperature: session.temperature,
            max_tokens: session.max_output_tokens.clamp(1, u32::MAX as i64) as u32,
            tools,
            thinking: opts.enable_thinking,
        };

        Ok((session, user_msg, context, request))
    }

    /// Execute one round of tool calls concurrently, results in input order.
    async fn run_tool_calls(&self, calls: &[ToolCallSpec]) -> Vec<ToolResult> {
        let mut handles = Vec::with_capacity(calls.len());
        for tc in calls {
            let registry = Arc::clone(&self.tools);
            let tc = tc.clone();
            handles.push(tokio::spawn(async move {
                registry.execute_raw(&tc.id, &tc.name, &tc.arguments).await
            }));
        }
        let mut results = Vec::with_capacity(calls.len());
        for (i, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => ToolResult::failure(
                    &calls[i].id,
                    &calls[i].name,
                    format!("tool panicked: {e}"),
                    0,
                ),
            };
            results.push(result);
        }
        results
    }

    /// Step 7: counters and auto-title.
    async fn finish_turn(
        &self,
        session: &Session,
        user_msg: &MessageRecord,
        totals: &TurnTotals,
    ) -> Result<(), ChatError> {
        self.store
            .bump_session_counters(
                &session.id,
                totals.messages,
                totals.input_tokens,
                totals.output_tokens,
                totals.cost,
            )
            .await?;
        if session.title.is_none() {
            let title = derive_title(&user_msg.content);
            if !title.is_empty() {
                self.store.set_title_if_absent(&session.id, &title).await?;
            }
        }
        Ok(())
    }
}

fn to_records(calls: &[ToolCallSpec]) -> Vec<ToolCallRecord> {
    calls
        .iter()
        .map(|tc| ToolCallRecord {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: tc.arguments.clone(),
        })
        .collect()
}

/// Rebuild the outgoing form of a stored message, preserving tool-call
/// metadata and tool_call_id linkage.
fn to_chat_message(m: &MessageRecord) -> ChatMessage {
    let role = m.role.parse().unwrap_or(Role::User);
    let tool_calls = m
        .tool_calls
        .as_ref()
        .map(|calls| {
            calls
                .0
                .iter()
                .map(|c| ToolCallSpec {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    ChatMessage {
        role,
        content: m.content.clone(),
        tool_calls,
        tool_call_id: m.tool_call_id.clone(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
