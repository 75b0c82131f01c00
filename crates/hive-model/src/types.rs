use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A structured tool invocation emitted by the model.
///
/// `arguments` is the raw JSON-encoded argument object, forwarded verbatim
/// between the provider wire format and the tool executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One turn in the conversation sent to a provider.
///
/// Assistant turns may carry `tool_calls`; tool turns carry the
/// `tool_call_id` they answer.  Both must survive the round trip through
/// persistence so replayed history satisfies provider wire contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: text.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: text.into(), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant turn that requests tool invocations (content may be empty).
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallSpec>) -> Self {
        Self { role: Role::Assistant, content: text.into(), tool_calls: calls, tool_call_id: None }
    }

    /// Tool-role turn answering the call with the given id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Requests and responses ───────────────────────────────────────────────────

/// A gateway request, addressed by model alias.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    /// Alias resolved against the catalogue (not the provider model string).
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub tools: Vec<ToolSchema>,
    /// Ask for the model's reasoning channel where the family supports one.
    pub thinking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
        }
    }

    /// Map a provider-reported reason string; unknown values read as `stop`.
    pub fn parse(s: &str) -> Self {
        match s {
            "tool_calls" | "tool_use" => Self::ToolCalls,
            "length" | "max_tokens" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }
}

/// Token usage and provider-reported cost for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Provider-reported cost estimate; 0.0 when the provider does not report one.
    pub cost: f64,
}

/// Normalized non-streaming gateway response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Visible answer text; may be empty when only tool calls were emitted.
    pub content: String,
    /// Reasoning text, when the model produced a separate thinking channel.
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallSpec>,
    pub usage: Usage,
    pub latency_ms: u64,
    pub finish_reason: FinishReason,
    /// Alias the response was served under (after fallback routing).
    pub model: String,
}

// ─── Streaming ────────────────────────────────────────────────────────────────

/// A single streamed event from a provider driver.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// A thinking/reasoning delta from the model
    ThinkingDelta(String),
    /// The model wants to call a tool
    ToolCall { id: String, name: String, arguments: String },
    /// Final usage statistics
    Usage { input_tokens: u32, output_tokens: u32, cost: f64 },
    /// Terminal reason reported by the provider
    Finish(FinishReason),
    /// The stream finished normally
    Done,
}

/// A gateway-level chunk delivered over the stream channel.
///
/// Each chunk carries zero or one content delta, zero or one thinking delta,
/// and optionally the terminal finish reason / usage.  The channel closing is
/// the end-of-stream signal.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub usage: Option<Usage>,
    pub finish: Option<FinishReason>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
