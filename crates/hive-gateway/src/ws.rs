// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! WebSocket stream manager.
//!
//! One socket drives one turn at a time: inbound `message` frames run the
//! streaming chat pipeline and the resulting events fan out as JSON frames.
//! Frame delivery is best-effort — a dead client stops delivery, never
//! persistence, so a mid-stream disconnect still commits the partial
//! assistant turn (and emits no `done`).

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hive_core::{ChatEvent, SendOptions};
use hive_store::SessionStatus;

use crate::AppState;

/// Server closing code when the engine cannot be reached.
const CLOSE_SERVER_ERROR: u16 = 1011;
/// Server closing code when the runtime is not ready to take turns.
const CLOSE_NOT_READY: u16 = 1013;

// ── Protocol frames ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Message {
        content: String,
        #[serde(default)]
        enable_thinking: bool,
        #[serde(default = "default_true")]
        enable_tools: bool,
    },
    Ping,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Thinking { content: String },
    Token { content: String },
    ToolCall { name: String, arguments: String, id: String },
    ToolResult { name: String, content: String, id: String, success: bool },
    Usage { input_tokens: u32, output_tokens: u32, cost: f64 },
    Done { message_id: String, finish_reason: String },
    Error { message: String },
    Pong,
}

impl From<ChatEvent> for ServerFrame {
    fn from(ev: ChatEvent) -> Self {
        match ev {
            ChatEvent::ThinkingDelta(content) => Self::Thinking { content },
            ChatEvent::TokenDelta(content) => Self::Token { content },
            ChatEvent::ToolCallStarted { id, name, arguments } => {
                Self::ToolCall { name, arguments, id }
            }
            ChatEvent::ToolCallFinished { id, name, content, success } => {
                Self::ToolResult { name, content, id, success }
            }
            ChatEvent::Usage { input_tokens, output_tokens, cost } => {
                Self::Usage { input_tokens, output_tokens, cost }
            }
            ChatEvent::Done { message_id, finish_reason } => {
                Self::Done { message_id, finish_reason: finish_reason.to_string() }
            }
            ChatEvent::Error(message) => Self::Error { message },
        }
    }
}

// ── Connection lifecycle ──────────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, session_id: String) {
    // Validate before taking any turns: the session must exist and be live.
    match state.store.get_session(&session_id).await {
        Ok(s) if s.status == SessionStatus::Active => {}
        Ok(_) => {
            send_frame(
                &mut socket,
                &ServerFrame::Error { message: format!("session {session_id} has ended") },
            )
            .await;
            close(socket, CLOSE_NOT_READY, "session ended").await;
            return;
        }
        Err(e) => {
            send_frame(&mut socket, &ServerFrame::Error { message: e.to_string() }).await;
            close(socket, CLOSE_SERVER_ERROR, "session lookup failed").await;
            return;
        }
    }

    // Connection id for log correlation.
    let conn_id = format!("{session_id}:{:08x}", rand::random::<u32>());
    debug!(conn = %conn_id, "websocket connected");
    metrics::counter!("hive_ws_connections_total").increment(1);

    let ping_interval =
        std::time::Duration::from_secs(state.config.server.ping_interval_secs.max(1));
    let mut keepalive = tokio::time::interval(ping_interval);
    keepalive.reset(); // first beacon one interval out, not immediately

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Ping) => {
                                if !send_frame(&mut socket, &ServerFrame::Pong).await {
                                    break;
                                }
                            }
                            Ok(ClientFrame::Message { content, enable_thinking, enable_tools }) => {
                                let opts = SendOptions { enable_thinking, enable_tools };
                                run_turn(&mut socket, &state, &session_id, content, opts).await;
                            }
                            Err(e) => {
                                let frame = ServerFrame::Error {
                                    message: format!("invalid frame: {e}"),
                                };
                                if !send_frame(&mut socket, &frame).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(conn = %conn_id, "websocket recv error: {e}");
                        break;
                    }
                }
            }
            // Liveness beacon: an unsolicited pong every ping_interval.
            _ = keepalive.tick() => {
                if !send_frame(&mut socket, &ServerFrame::Pong).await {
                    break;
                }
            }
        }
    }

    debug!(conn = %conn_id, "websocket closed");
}

/// Drive one user turn, bridging engine events to socket frames.
///
/// The engine runs in its own task so a client disconnect (send failure)
/// only stops frame delivery; the turn still runs to completion and
/// persists whatever accumulated.
async fn run_turn(
    socket: &mut WebSocket,
    state: &AppState,
    session_id: &str,
    content: String,
    opts: SendOptions,
) {
    let (tx, mut rx) = mpsc::channel::<ChatEvent>(64);
    let engine = state.engine.clone();
    let sid = session_id.to_string();
    let turn = tokio::spawn(async move { engine.stream_message(&sid, &content, opts, tx).await });

    let mut delivering = true;
    while let Some(event) = rx.recv().await {
        if !delivering {
            continue; // keep draining so the engine never blocks on a full channel
        }
        if !send_frame(socket, &ServerFrame::from(event)).await {
            delivering = false;
        }
    }

    match turn.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(session = session_id, "turn failed: {e}"),
        Err(e) => warn!(session = session_id, "turn task panicked: {e}"),
    }
}

/// Best-effort frame send; `false` means the client is gone.
async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let Ok(json) = serde_json::to_string(frame) else {
        return true;
    };
    socket.send(Message::Text(json)).await.is_ok()
}

async fn close(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
        .await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_frame_parses_with_defaults() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","content":"hi"}"#).unwrap();
        match frame {
            ClientFrame::Message { content, enable_thinking, enable_tools } => {
                assert_eq!(content, "hi");
                assert!(!enable_thinking);
                assert!(enable_tools);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn client_ping_frame_parses() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
    }

    #[test]
    fn unknown_client_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn server_frames_serialize_with_type_tags() {
        let token = serde_json::to_value(ServerFrame::Token { content: "x".into() }).unwrap();
        assert_eq!(token["type"], "token");
        assert_eq!(token["content"], "x");

        let done = serde_json::to_value(ServerFrame::Done {
            message_id: "m1".into(),
            finish_reason: "stop".into(),
        })
        .unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["finish_reason"], "stop");

        let pong = serde_json::to_value(ServerFrame::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }

    #[test]
    fn tool_frames_carry_ids() {
        let call = serde_json::to_value(ServerFrame::ToolCall {
            name: "clock__now".into(),
            arguments: "{}".into(),
            id: "c1".into(),
        })
        .unwrap();
        assert_eq!(call["type"], "tool_call");
        assert_eq!(call["id"], "c1");

        let result = serde_json::to_value(ServerFrame::ToolResult {
            name: "clock__now".into(),
            content: "14:00".into(),
            id: "c1".into(),
            success: true,
        })
        .unwrap();
        assert_eq!(result["type"], "tool_result");
        assert_eq!(result["success"], true);
    }

    #[test]
    fn chat_events_map_to_protocol_frames() {
        let frame = ServerFrame::from(ChatEvent::ThinkingDelta("hm".into()));
        assert!(matches!(frame, ServerFrame::Thinking { .. }));
        let frame = ServerFrame::from(ChatEvent::Done { message_id: "m".into(), finish_reason: "stop" });
        assert!(matches!(frame, ServerFrame::Done { .. }));
        let frame = ServerFrame::from(ChatEvent::Error("boom".into()));
        assert!(matches!(frame, ServerFrame::Error { .. }));
    }
}
