// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The LLM gateway: one front door for every model call in the runtime.
//!
//! Callers address models by catalogue alias.  The gateway resolves the
//! alias to a provider driver, injects the family-specific thinking
//! activation, guards the call with a per-alias circuit breaker, and walks
//! the configured fallback chain on hard provider errors.  Content-policy
//! refusals are ordinary responses and never trigger fallback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    breaker::CircuitBreaker,
    catalog::{self, ThinkingStyle},
    provider::{ModelProvider, ProviderRequest},
    thinking::split_think_block,
    BreakerState, FinishReason, LlmError, LlmRequest, LlmResponse, StreamChunk, StreamEvent,
    Usage,
};

/// Wall-clock budget for one provider round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Streaming channel depth; slow consumers apply backpressure to the pump.
const STREAM_CHANNEL_CAPACITY: usize = 64;

pub struct LlmGateway {
    /// Driver per provider family id ("openai_compat", "anthropic", "mock").
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    /// Ordered fallback aliases consulted on hard errors.
    fallbacks: Vec<String>,
    /// Breaker per alias, created lazily.
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl LlmGateway {
    pub fn new(providers: HashMap<String, Arc<dyn ModelProvider>>, fallbacks: Vec<String>) -> Self {
        Self { providers, fallbacks, breakers: Mutex::new(HashMap::new()) }
    }

    fn breaker(&self, alias: &str) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock().unwrap();
        map.entry(alias.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new()))
            .clone()
    }

    /// Snapshot of breaker states for metrics and health reporting.
    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        let map = self.breakers.lock().unwrap();
        map.iter().map(|(alias, b)| (alias.clone(), b.state())).collect()
    }

    /// The alias chain tried for a request: the requested alias first, then
    /// each configured fallback not equal to it.
    fn alias_chain<'a>(&'a self, alias: &'a str) -> Vec<&'a str> {
        let mut chain = vec![alias];
        for fb in &self.fallbacks {
            if fb != alias {
                chain.push(fb.as_str());
            }
        }
        chain
    }

    fn provider_request(&self, alias: &str, req: &LlmRequest) -> Result<(Arc<dyn ModelProvider>, ProviderRequest), LlmError> {
        let entry =
            catalog::resolve(alias).ok_or_else(|| LlmError::UnknownAlias(alias.to_string()))?;
        let provider = self
            .providers
            .get(&entry.provider)
            .cloned()
            .ok_or_else(|| LlmError::Provider {
                provider: entry.provider.clone(),
                message: "no driver registered for provider family".into(),
            })?;
        let thinking = if req.thinking { entry.thinking } else { ThinkingStyle::None };
        let preq = ProviderRequest {
            model: entry.model,
            messages: req.messages.clone(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            tools: req.tools.clone(),
            thinking,
        };
        Ok((provider, preq))
    }

    // ── Non-streaming ─────────────────────────────────────────────────────────

    /// One-shot completion with normalization and fallback routing.
    pub async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let chain = self.alias_chain(&req.model);
        let single = chain.len() == 1;
        let mut last_err: Option<LlmError> = None;

        for alias in chain {
            match self.complete_alias(alias, req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_hard() => {
                    warn!(model = alias, error = %e, "model call failed, consulting fallbacks");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let last = last_err.expect("chain is never empty");
        if single {
            Err(last)
        } else {
            Err(LlmError::ExhaustedFallbacks { alias: req.model.clone(), last: last.to_string() })
        }
    }

    async fn complete_alias(&self, alias: &str, req: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let breaker = self.breaker(alias);
        if !breaker.allow() {
            metrics::counter!("hive_llm_requests_total", "model" => alias.to_string(), "outcome" => "circuit_open")
                .increment(1);
            return Err(LlmError::CircuitOpen { alias: alias.to_string() });
        }

        let (provider, preq) = self.provider_request(alias, req)?;
        let start = Instant::now();

        let result = tokio::time::timeout(REQUEST_TIMEOUT, provider.complete(preq))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: provider.name().to_string(),
                seconds: REQUEST_TIMEOUT.as_secs(),
            })
            .and_then(|r| r);

        let latency = start.elapsed();
        metrics::histogram!("hive_llm_request_duration_seconds", "model" => alias.to_string())
            .record(latency.as_secs_f64());

        match result {
            Ok(raw) => {
                breaker.record_success();
                self.record_breaker_gauge(alias);
                metrics::counter!("hive_llm_requests_total", "model" => alias.to_string(), "outcome" => "ok")
                    .increment(1);
                metrics::counter!("hive_llm_tokens_total", "model" => alias.to_string(), "direction" => "input")
                    .increment(raw.input_tokens as u64);
                metrics::counter!("hive_llm_tokens_total", "model" => alias.to_string(), "direction" => "output")
                    .increment(raw.output_tokens as u64);
                metrics::histogram!("hive_llm_cost_dollars", "model" => alias.to_string())
                    .record(raw.cost);

                // Thinking normalization: a dedicated wire field wins; else
                // extract an inline <think> block and strip it from content.
                let (thinking, content) = match raw.thinking {
                    Some(t) => (Some(t), raw.content),
                    None => split_think_block(&raw.content),
                };

                debug!(
                    model = alias,
                    latency_ms = latency.as_millis() as u64,
                    tool_calls = raw.tool_calls.len(),
                    "completion ok"
                );

                Ok(LlmResponse {
                    content,
                    thinking,
                    tool_calls: raw.tool_calls,
                    usage: Usage {
                        input_tokens: raw.input_tokens,
                        output_tokens: raw.output_tokens,
                        cost: raw.cost,
                    },
                    latency_ms: latency.as_millis() as u64,
                    finish_reason: raw.finish_reason.unwrap_or(FinishReason::Stop),
                    model: alias.to_string(),
                })
            }
            Err(e) => {
                if !matches!(e, LlmError::UnknownAlias(_)) {
                    breaker.record_failure();
                }
                self.record_breaker_gauge(alias);
                metrics::counter!("hive_llm_requests_total", "model" => alias.to_string(), "outcome" => "error")
                    .increment(1);
                metrics::counter!("hive_errors_total", "kind" => e.kind()).increment(1);
                Err(e)
            }
        }
    }

    // ── Streaming ─────────────────────────────────────────────────────────────

    /// Streaming completion.  The returned channel yields chunks until the
    /// provider finishes; the channel closing is the end-of-stream signal.
    ///
    /// Fallback routing applies to establishing the stream only — once the
    /// first byte arrives the turn is committed to that provider, and a
    /// mid-stream error surfaces on the channel instead.
    pub async fn stream(
        &self,
        req: &LlmRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, LlmError>>, LlmError> {
        let chain = self.alias_chain(&req.model);
        let single = chain.len() == 1;
        let mut last_err: Option<LlmError> = None;

        for alias in chain {
            match self.open_stream(alias, req).await {
                Ok(rx) => return Ok(rx),
                Err(e) if e.is_hard() => {
                    warn!(model = alias, error = %e, "stream open failed, consulting fallbacks");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let last = last_err.expect("chain is never empty");
        if single {
            Err(last)
        } else {
            Err(LlmError::ExhaustedFallbacks { alias: req.model.clone(), last: last.to_string() })
        }
    }

    async fn open_stream(
        &self,
        alias: &str,
        req: &LlmRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, LlmError>>, LlmError> {
        let breaker = self.breaker(alias);
        if !breaker.allow() {
            metrics::counter!("hive_llm_requests_total", "model" => alias.to_string(), "outcome" => "circuit_open")
                .increment(1);
            return Err(LlmError::CircuitOpen { alias: alias.to_string() });
        }

        let (provider, preq) = self.provider_request(alias, req)?;
        let mut events = match provider.stream(preq).await {
            Ok(s) => s,
            Err(e) => {
                breaker.record_failure();
                metrics::counter!("hive_errors_total", "kind" => e.kind()).increment(1);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let alias_owned = alias.to_string();
        tokio::spawn(async move {
            let mut failed = false;
            while let Some(ev) = events.next().await {
                let send = match ev {
                    Ok(StreamEvent::TextDelta(t)) if t.is_empty() => Ok(()),
                    Ok(StreamEvent::TextDelta(t)) => {
                        tx.send(Ok(StreamChunk { content: Some(t), ..Default::default() })).await
                    }
                    Ok(StreamEvent::ThinkingDelta(t)) => {
                        tx.send(Ok(StreamChunk { thinking: Some(t), ..Default::default() })).await
                    }
                    Ok(StreamEvent::Usage { input_tokens, output_tokens, cost }) => {
                        tx.send(Ok(StreamChunk {
                            usage: Some(Usage { input_tokens, output_tokens, cost }),
                            ..Default::default()
                        }))
                        .await
                    }
                    Ok(StreamEvent::Finish(reason)) => {
                        tx.send(Ok(StreamChunk { finish: Some(reason), ..Default::default() }))
                            .await
                    }
                    // Streamed tool-call deltas are unreliable; the consumer
                    // re-requests the canonical list on a tool_calls finish.
                    Ok(StreamEvent::ToolCall { .. }) => Ok(()),
                    Ok(StreamEvent::Done) => break,
                    Err(e) => {
                        failed = true;
                        metrics::counter!("hive_errors_total", "kind" => e.kind()).increment(1);
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                };
                if send.is_err() {
                    // Consumer dropped the receiver; nothing left to deliver.
                    break;
                }
            }
            if failed {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
            metrics::counter!(
                "hive_llm_requests_total",
                "model" => alias_owned,
                "outcome" => if failed { "stream_error" } else { "ok" }
            )
            .increment(1);
        });

        Ok(rx)
    }

    fn record_breaker_gauge(&self, alias: &str) {
        let state = self.breaker(alias).state();
        metrics::gauge!("hive_llm_breaker_state", "model" => alias.to_string())
            .set(state.as_gauge());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
