// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{
    catalog::ThinkingStyle, ChatMessage, FinishReason, LlmError, StreamEvent, ToolCallSpec,
    ToolSchema,
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// A request addressed to a concrete provider endpoint.
///
/// The gateway has already resolved the alias: `model` is the provider's own
/// model string and `thinking` names the activation mechanism to inject
/// (`ThinkingStyle::None` when thinking is disabled or unsupported).
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub tools: Vec<ToolSchema>,
    pub thinking: ThinkingStyle,
}

/// A fully-formed provider response (non-streaming path).
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub content: String,
    /// Reasoning from a dedicated wire field; `<think>` extraction happens
    /// later in the gateway so it applies uniformly to every driver.
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallSpec>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub finish_reason: Option<FinishReason>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider family id for logs and metrics.
    fn name(&self) -> &str;

    /// One-shot completion: the full normalized response.
    async fn complete(&self, req: ProviderRequest) -> Result<ProviderResponse, LlmError>;

    /// Streaming completion: a lazy, finite event sequence.
    async fn stream(&self, req: ProviderRequest) -> Result<EventStream, LlmError>;
}
