// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::{json, Value};

use crate::tool::{BlockingFn, ToolHandler};

/// `echo__say` — return the given text.  Registered as a blocking handler to
/// exercise the worker-pool path end to end.
pub fn handler() -> ToolHandler {
    let f: Arc<BlockingFn> = Arc::new(|args: Value| {
        let text = args
            .get("text")
            .and_then(|t| t.as_str())
            .or_else(|| args.get("input").and_then(|t| t.as_str()))
            .unwrap_or("");
        Ok(json!(text))
    });
    ToolHandler::Blocking(f)
}
