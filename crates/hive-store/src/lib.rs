// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod db;
mod error;
mod export;
mod jobs;
mod message;
mod session;

pub use agent::{AgentPatch, AgentRecord, AgentStatus};
pub use db::Store;
pub use error::StoreError;
pub use export::{export_jsonl, export_markdown};
pub use jobs::{CronJob, JobExecution, JobPatch, NewExecution, SessionMode};
pub use message::{MessageRecord, NewMessage, ToolCallRecord};
pub use session::{derive_title, NewSession, Session, SessionPatch, SessionStatus, SessionType};
