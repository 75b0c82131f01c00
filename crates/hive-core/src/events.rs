// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Events emitted by the chat engine during one user turn.
/// Consumers (the WebSocket stream manager, tests) subscribe to drive their
/// output; sends are best-effort and never gate persistence.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A thinking/reasoning chunk streamed from the model
    ThinkingDelta(String),
    /// A content chunk streamed from the model
    TokenDelta(String),
    /// The model has requested a tool call
    ToolCallStarted { id: String, name: String, arguments: String },
    /// A tool call finished
    ToolCallFinished { id: String, name: String, content: String, success: bool },
    /// Usage for the turn, reported once before Done
    Usage { input_tokens: u32, output_tokens: u32, cost: f64 },
    /// The engine has finished processing the current user turn
    Done { message_id: String, finish_reason: &'static str },
    /// A recoverable error; terminal for the turn, never followed by Done
    Error(String),
}
