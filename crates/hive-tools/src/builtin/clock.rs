// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::tool::{AsyncTool, ToolHandler};

/// `clock__now` — report the current time.
///
/// Accepts an optional `format` argument (`rfc3339` | `unix`).
pub struct ClockNow;

#[async_trait]
impl AsyncTool for ClockNow {
    async fn invoke(&self, args: Value) -> anyhow::Result<Value> {
        let now = Utc::now();
        match args.get("format").and_then(|f| f.as_str()) {
            Some("unix") => Ok(json!(now.timestamp())),
            _ => Ok(json!(now.to_rfc3339())),
        }
    }
}

pub fn handler() -> ToolHandler {
    ToolHandler::Async(Arc::new(ClockNow))
}
