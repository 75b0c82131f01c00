// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod engine;
mod events;
mod prompt;

pub use engine::{ChatEngine, ChatError, ChatResponse, SendOptions};
pub use events::ChatEvent;
pub use prompt::{AssembledPrompt, AssembleRequest, PromptAssembler};
