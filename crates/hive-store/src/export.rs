// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transcript export: JSONL for machine consumption, Markdown for humans.

use serde_json::{json, Map, Value};

use crate::{MessageRecord, Session};

/// One JSON object per line: a session-header line, then each message in
/// creation order.  Optional keys are omitted rather than nulled so the
/// output parses back to the same message list.
pub fn export_jsonl(session: &Session, messages: &[MessageRecord]) -> String {
    let mut lines = Vec::with_capacity(messages.len() + 1);

    let header = json!({
        "session_id": session.id,
        "agent_id": session.agent_id,
        "session_type": session.session_type,
        "title": session.title,
        "message_count": session.message_count,
        "created_at": session.created_at.to_rfc3339(),
    });
    lines.push(header.to_string());

    for m in messages {
        let mut obj = Map::new();
        obj.insert("role".into(), json!(m.role));
        obj.insert("content".into(), json!(m.content));
        if let Some(t) = &m.thinking {
            obj.insert("thinking".into(), json!(t));
        }
        if let Some(calls) = &m.tool_calls {
            obj.insert("tool_calls".into(), json!(calls.0));
        }
        if let Some(id) = &m.tool_call_id {
            obj.insert("tool_call_id".into(), json!(id));
        }
        if let Some(model) = &m.model {
            obj.insert("model".into(), json!(model));
        }
        if m.input_tokens > 0 {
            obj.insert("tokens_input".into(), json!(m.input_tokens));
        }
        if m.output_tokens > 0 {
            obj.insert("tokens_output".into(), json!(m.output_tokens));
        }
        if m.cost > 0.0 {
            obj.insert("cost".into(), json!(m.cost));
        }
        obj.insert("created_at".into(), json!(m.created_at.to_rfc3339()));
        lines.push(Value::Object(obj).to_string());
    }

    lines.join("\n") + "\n"
}

/// Human-readable transcript: title, metadata block, one section per turn.
/// Tool output is fenced since it is usually JSON.
pub fn export_markdown(session: &Session, messages: &[MessageRecord]) -> String {
    let mut out = String::new();
    let title = session.title.as_deref().unwrap_or("Untitled session");
    out.push_str(&format!("# {title}\n\n"));
    out.push_str(&format!(
        "- **Session**: `{}`\n- **Agent**: {}\n- **Type**: {}\n- **Messages**: {}\n- **Created**: {}\n\n",
        session.id,
        session.agent_id,
        session.session_type.as_str(),
        session.message_count,
        session.created_at.to_rfc3339(),
    ));

    for m in messages {
        out.push_str(&format!("## {}\n\n", heading_for_role(&m.role)));
        if let Some(t) = &m.thinking {
            out.push_str("> ");
            out.push_str(&t.replace('\n', "\n> "));
            out.push_str("\n\n");
        }
        if m.role == "tool" {
            out.push_str("```json\n");
            out.push_str(&m.content);
            out.push_str("\n```\n\n");
        } else {
            out.push_str(&m.content);
            out.push_str("\n\n");
        }
        if let Some(calls) = &m.tool_calls {
            for c in &calls.0 {
                out.push_str(&format!("- called `{}` with `{}`\n", c.name, c.arguments));
            }
            out.push('\n');
        }
    }

    out
}

fn heading_for_role(role: &str) -> &str {
    match role {
        "user" => "User",
        "assistant" => "Assistant",
        "system" => "System",
        "tool" => "Tool result",
        other => other,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
