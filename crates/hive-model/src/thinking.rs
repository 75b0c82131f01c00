// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Extraction of `<think>…</think>` reasoning blocks embedded in content.
//!
//! Some OpenAI-compatible servers deliver reasoning inline instead of in a
//! dedicated field.  The gateway strips the first such block out of the
//! visible content; stripping is idempotent so re-normalizing a stored
//! message is safe.

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Split the first `<think>…</think>` block out of `content`.
///
/// Returns `(thinking, stripped_content)`.  When no complete block is
/// present the content is returned unchanged and thinking is `None`.
/// An unterminated `<think>` is left in place — truncated output must not
/// silently lose text.
pub fn split_think_block(content: &str) -> (Option<String>, String) {
    let Some(start) = content.find(OPEN) else {
        return (None, content.to_string());
    };
    let after_open = start + OPEN.len();
    let Some(rel_end) = content[after_open..].find(CLOSE) else {
        return (None, content.to_string());
    };
    let end = after_open + rel_end;

    let thinking = content[after_open..end].trim().to_string();
    let mut stripped = String::with_capacity(content.len());
    stripped.push_str(&content[..start]);
    stripped.push_str(&content[end + CLOSE.len()..]);
    let stripped = stripped.trim().to_string();

    let thinking = if thinking.is_empty() { None } else { Some(thinking) };
    (thinking, stripped)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
